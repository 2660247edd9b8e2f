//! Artifact store
//!
//! Export files live in a flat directory, one file per artifact, named
//! `<uuid>.<ext>`. Metadata is kept in a JSON index next to the registry.
//! Files are written through a [`PendingArtifact`] (a `.partial` file that
//! only becomes visible on commit) so a cancelled or failed export never
//! leaves a readable artifact behind.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::audit::{AuditAction, AuditEntry, AuditLogger};
use crate::error::{ExchangeError, ExchangeResult};
use crate::models::{Artifact, ArtifactId, ExchangeFormat, UserId};

use super::file_io::{read_json, write_bytes_atomic, write_json_atomic};

const PARTIAL_SUFFIX: &str = "partial";

/// Serializable index contents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ArtifactIndex {
    artifacts: Vec<Artifact>,
}

/// An artifact being written. Dropping it without a commit removes the file.
pub struct PendingArtifact {
    id: ArtifactId,
    owner_id: UserId,
    format: ExchangeFormat,
    partial_path: PathBuf,
    writer: BufWriter<File>,
    written: u64,
    committed: bool,
}

impl PendingArtifact {
    pub fn id(&self) -> ArtifactId {
        self.id
    }

    /// Bytes written so far
    pub fn written(&self) -> u64 {
        self.written
    }
}

impl Write for PendingArtifact {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.writer.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl Drop for PendingArtifact {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.partial_path);
        }
    }
}

/// Readable artifact returned by [`ArtifactStore::open_download`]
pub struct ArtifactDownload {
    pub artifact: Artifact,
    reader: BufReader<File>,
}

impl Read for ArtifactDownload {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

/// Stores export files and their metadata
pub struct ArtifactStore {
    dir: PathBuf,
    index_path: Option<PathBuf>,
    artifacts: RwLock<HashMap<ArtifactId, Artifact>>,
    ttl: Duration,
    persist_lock: Mutex<()>,
    audit: Option<Arc<AuditLogger>>,
}

impl ArtifactStore {
    /// Open a store rooted at `dir`.
    ///
    /// With an index path, metadata survives restarts. Leftover `.partial`
    /// files from an interrupted process are removed either way.
    pub fn open(dir: PathBuf, index_path: Option<PathBuf>, ttl: Duration) -> ExchangeResult<Self> {
        fs::create_dir_all(&dir).map_err(|e| {
            ExchangeError::Storage(format!("Failed to create directory {}: {}", dir.display(), e))
        })?;

        let index: ArtifactIndex = match &index_path {
            Some(path) => read_json(path)?,
            None => ArtifactIndex::default(),
        };
        let artifacts = index
            .artifacts
            .into_iter()
            .map(|artifact| (artifact.id, artifact))
            .collect();

        let store = Self {
            dir,
            index_path,
            artifacts: RwLock::new(artifacts),
            ttl,
            persist_lock: Mutex::new(()),
            audit: None,
        };
        store.remove_partials();
        Ok(store)
    }

    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn remove_partials(&self) {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().map_or(false, |ext| ext == PARTIAL_SUFFIX) {
                debug!(path = %path.display(), "removing abandoned partial artifact");
                let _ = fs::remove_file(&path);
            }
        }
    }

    fn final_path(&self, artifact: &Artifact) -> PathBuf {
        self.dir.join(artifact.file_name())
    }

    /// Store a complete artifact in one call
    pub fn store(&self, owner: &UserId, format: ExchangeFormat, bytes: &[u8]) -> ExchangeResult<Artifact> {
        let artifact = Artifact::new(owner.clone(), format, bytes.len() as u64, self.ttl);
        write_bytes_atomic(self.final_path(&artifact), bytes)?;
        self.insert(artifact)
    }

    /// Start writing an artifact incrementally
    pub fn begin(&self, owner: &UserId, format: ExchangeFormat) -> ExchangeResult<PendingArtifact> {
        let id = ArtifactId::new();
        let partial_path = self
            .dir
            .join(format!("{}.{}.{}", id.as_uuid(), format.extension(), PARTIAL_SUFFIX));
        let file = File::create(&partial_path).map_err(|e| {
            ExchangeError::Storage(format!("Failed to create artifact file: {}", e))
        })?;

        Ok(PendingArtifact {
            id,
            owner_id: owner.clone(),
            format,
            partial_path,
            writer: BufWriter::new(file),
            written: 0,
            committed: false,
        })
    }

    /// Make a pending artifact visible
    pub fn commit(&self, mut pending: PendingArtifact) -> ExchangeResult<Artifact> {
        pending
            .writer
            .flush()
            .map_err(|e| ExchangeError::Storage(format!("Failed to flush artifact: {}", e)))?;
        pending
            .writer
            .get_ref()
            .sync_all()
            .map_err(|e| ExchangeError::Storage(format!("Failed to sync artifact: {}", e)))?;

        let created_at = Utc::now();
        let artifact = Artifact {
            id: pending.id,
            owner_id: pending.owner_id.clone(),
            format: pending.format,
            size_bytes: pending.written,
            created_at,
            expires_at: created_at + self.ttl,
        };

        fs::rename(&pending.partial_path, self.final_path(&artifact))
            .map_err(|e| ExchangeError::Storage(format!("Failed to publish artifact: {}", e)))?;
        pending.committed = true;

        self.insert(artifact)
    }

    fn insert(&self, artifact: Artifact) -> ExchangeResult<Artifact> {
        {
            let mut artifacts = self.artifacts.write().map_err(|e| {
                ExchangeError::Storage(format!("Failed to acquire write lock: {}", e))
            })?;
            artifacts.insert(artifact.id, artifact.clone());
        }

        // An artifact missing from the index would never be swept, so undo
        if let Err(e) = self.persist() {
            if let Ok(mut artifacts) = self.artifacts.write() {
                artifacts.remove(&artifact.id);
            }
            self.remove_file(&artifact);
            return Err(e);
        }

        info!(
            artifact_id = %artifact.id,
            owner_id = %artifact.owner_id,
            format = %artifact.format,
            size_bytes = artifact.size_bytes,
            "artifact stored"
        );
        Ok(artifact)
    }

    /// Metadata without an ownership check
    pub fn get(&self, id: ArtifactId) -> ExchangeResult<Artifact> {
        let artifacts = self.artifacts.read().map_err(|e| {
            ExchangeError::Storage(format!("Failed to acquire read lock: {}", e))
        })?;
        artifacts
            .get(&id)
            .cloned()
            .ok_or_else(|| ExchangeError::artifact_not_found(id.to_string()))
    }

    /// Open an artifact for streaming. Only the owner may read it.
    pub fn open_download(&self, id: ArtifactId, requester: &UserId) -> ExchangeResult<ArtifactDownload> {
        let artifact = self.get(id)?;
        if &artifact.owner_id != requester {
            return Err(ExchangeError::artifact_forbidden(id.to_string()));
        }
        if artifact.is_expired(Utc::now()) {
            return Err(ExchangeError::artifact_not_found(id.to_string()));
        }

        let file = File::open(self.final_path(&artifact)).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                ExchangeError::artifact_not_found(id.to_string())
            } else {
                ExchangeError::Storage(format!("Failed to open artifact: {}", e))
            }
        })?;

        Ok(ArtifactDownload {
            artifact,
            reader: BufReader::new(file),
        })
    }

    /// Remove an artifact and its file
    pub fn delete(&self, id: ArtifactId, action: AuditAction) -> ExchangeResult<Artifact> {
        let artifact = {
            let mut artifacts = self.artifacts.write().map_err(|e| {
                ExchangeError::Storage(format!("Failed to acquire write lock: {}", e))
            })?;
            artifacts
                .remove(&id)
                .ok_or_else(|| ExchangeError::artifact_not_found(id.to_string()))?
        };

        self.remove_file(&artifact);
        if let Some(audit) = &self.audit {
            audit.record(AuditEntry::artifact_deleted(&artifact, action));
        }
        self.persist()?;
        Ok(artifact)
    }

    /// Delete every artifact past its expiry
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> ExchangeResult<Vec<Artifact>> {
        let expired: Vec<Artifact> = {
            let mut artifacts = self.artifacts.write().map_err(|e| {
                ExchangeError::Storage(format!("Failed to acquire write lock: {}", e))
            })?;
            let ids: Vec<ArtifactId> = artifacts
                .values()
                .filter(|artifact| artifact.is_expired(now))
                .map(|artifact| artifact.id)
                .collect();
            ids.iter().filter_map(|id| artifacts.remove(id)).collect()
        };

        if expired.is_empty() {
            return Ok(expired);
        }

        for artifact in &expired {
            self.remove_file(artifact);
        }
        if let Some(audit) = &self.audit {
            let entries: Vec<AuditEntry> = expired
                .iter()
                .map(|artifact| AuditEntry::artifact_deleted(artifact, AuditAction::Expired))
                .collect();
            if let Err(e) = audit.log_batch(&entries) {
                warn!(error = %e, "failed to write audit entries");
            }
        }
        info!(count = expired.len(), "expired artifacts removed");
        self.persist()?;
        Ok(expired)
    }

    /// Number of stored artifacts
    pub fn len(&self) -> usize {
        self.artifacts.read().map(|a| a.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove_file(&self, artifact: &Artifact) {
        let path = self.final_path(artifact);
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(artifact_id = %artifact.id, error = %e, "failed to remove artifact file");
            }
        }
    }

    fn persist(&self) -> ExchangeResult<()> {
        let Some(path) = &self.index_path else {
            return Ok(());
        };
        let _guard = self
            .persist_lock
            .lock()
            .map_err(|e| ExchangeError::Storage(format!("Failed to acquire persist lock: {}", e)))?;
        let mut artifacts: Vec<Artifact> = {
            let artifacts = self.artifacts.read().map_err(|e| {
                ExchangeError::Storage(format!("Failed to acquire read lock: {}", e))
            })?;
            artifacts.values().cloned().collect()
        };
        artifacts.sort_by_key(|a| a.created_at);
        write_json_atomic(path, &ArtifactIndex { artifacts })
    }
}
