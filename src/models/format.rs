//! Interchange formats

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use super::operation::OperationKind;

/// Supported file formats for export and import
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeFormat {
    Csv,
    Json,
    /// Office Open XML spreadsheet (.xlsx)
    Excel,
    /// Printable report (export only)
    Pdf,
}

impl ExchangeFormat {
    pub const ALL: [ExchangeFormat; 4] = [Self::Csv, Self::Json, Self::Excel, Self::Pdf];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
            Self::Excel => "excel",
            Self::Pdf => "pdf",
        }
    }

    /// File extension for artifacts of this format
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
            Self::Excel => "xlsx",
            Self::Pdf => "pdf",
        }
    }

    /// Content type served with downloads
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Csv => "text/csv",
            Self::Json => "application/json",
            Self::Excel => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            Self::Pdf => "application/pdf",
        }
    }

    pub fn supports_import(&self) -> bool {
        !matches!(self, Self::Pdf)
    }

    pub fn supports(&self, kind: OperationKind) -> bool {
        match kind {
            OperationKind::Export => true,
            OperationKind::Import => self.supports_import(),
        }
    }

    /// Detect the format from a file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "csv" | "tsv" => Some(Self::Csv),
            "json" | "ndjson" | "jsonl" => Some(Self::Json),
            "xlsx" | "xlsm" => Some(Self::Excel),
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }
}

impl fmt::Display for ExchangeFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" | "ndjson" | "jsonl" => Ok(Self::Json),
            "excel" | "xlsx" => Ok(Self::Excel),
            "pdf" => Ok(Self::Pdf),
            other => Err(format!("unknown format '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pdf_is_export_only() {
        assert!(ExchangeFormat::Pdf.supports(OperationKind::Export));
        assert!(!ExchangeFormat::Pdf.supports(OperationKind::Import));
        assert!(ExchangeFormat::Excel.supports(OperationKind::Import));
    }

    #[test]
    fn test_from_path() {
        assert_eq!(
            ExchangeFormat::from_path(Path::new("data/q1.XLSX")),
            Some(ExchangeFormat::Excel)
        );
        assert_eq!(ExchangeFormat::from_path(Path::new("notes.txt")), None);
        assert_eq!(ExchangeFormat::from_path(Path::new("no_extension")), None);
    }

    #[test]
    fn test_parse_and_display() {
        for format in ExchangeFormat::ALL {
            assert_eq!(format.to_string().parse::<ExchangeFormat>().unwrap(), format);
        }
        assert_eq!("xlsx".parse::<ExchangeFormat>().unwrap(), ExchangeFormat::Excel);
    }
}
