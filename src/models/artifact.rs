//! Artifact model
//!
//! An artifact is the file produced by a completed export.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::format::ExchangeFormat;
use super::ids::{ArtifactId, UserId};

/// Metadata for a stored export file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: ArtifactId,
    pub owner_id: UserId,
    pub format: ExchangeFormat,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Artifact {
    pub fn new(owner_id: UserId, format: ExchangeFormat, size_bytes: u64, ttl: Duration) -> Self {
        let created_at = Utc::now();
        Self {
            id: ArtifactId::new(),
            owner_id,
            format,
            size_bytes,
            created_at,
            expires_at: created_at + ttl,
        }
    }

    /// Name of the file holding the bytes, relative to the artifacts directory
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.id.as_uuid(), self.format.extension())
    }

    /// Suggested name for a download
    pub fn download_name(&self) -> String {
        format!(
            "export-{}.{}",
            self.created_at.format("%Y%m%d-%H%M%S"),
            self.format.extension()
        )
    }

    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry() {
        let artifact = Artifact::new(
            UserId::from("alice"),
            ExchangeFormat::Csv,
            42,
            Duration::hours(24),
        );
        assert!(!artifact.is_expired(artifact.created_at));
        assert!(artifact.is_expired(artifact.created_at + Duration::hours(24)));
    }

    #[test]
    fn test_file_names() {
        let artifact = Artifact::new(
            UserId::from("alice"),
            ExchangeFormat::Excel,
            0,
            Duration::hours(1),
        );
        assert!(artifact.file_name().ends_with(".xlsx"));
        assert!(artifact.download_name().starts_with("export-"));
        assert_eq!(
            artifact.mime_type(),
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
        );
    }
}
