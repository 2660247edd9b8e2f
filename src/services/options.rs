//! Options discovery
//!
//! Static description of which formats can carry which data types in each
//! direction, used to render choices.

use serde::Serialize;

use crate::models::{DataType, ExchangeFormat, OperationKind};

/// One selectable format
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormatOption {
    pub format: ExchangeFormat,
    pub extension: &'static str,
    pub mime_type: &'static str,
    pub data_types: Vec<DataType>,
}

/// Supported format x data type combinations
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExchangeOptions {
    pub export: Vec<FormatOption>,
    pub import: Vec<FormatOption>,
}

impl ExchangeOptions {
    pub fn for_kind(&self, kind: OperationKind) -> &[FormatOption] {
        match kind {
            OperationKind::Export => &self.export,
            OperationKind::Import => &self.import,
        }
    }

    /// Whether `format` accepts `data_type` in direction `kind`
    pub fn allows(&self, kind: OperationKind, format: ExchangeFormat, data_type: DataType) -> bool {
        self.for_kind(kind)
            .iter()
            .any(|option| option.format == format && option.data_types.contains(&data_type))
    }
}

/// Build the options matrix
pub fn exchange_options() -> ExchangeOptions {
    let export_types: Vec<DataType> = DataType::CONCRETE
        .iter()
        .copied()
        .chain(std::iter::once(DataType::All))
        .collect();

    let option = |format: ExchangeFormat, data_types: &[DataType]| FormatOption {
        format,
        extension: format.extension(),
        mime_type: format.mime_type(),
        data_types: data_types.to_vec(),
    };

    ExchangeOptions {
        export: ExchangeFormat::ALL
            .iter()
            .filter(|f| f.supports(OperationKind::Export))
            .map(|&f| option(f, &export_types))
            .collect(),
        import: ExchangeFormat::ALL
            .iter()
            .filter(|f| f.supports(OperationKind::Import))
            .map(|&f| option(f, &DataType::CONCRETE))
            .collect(),
    }
}
