//! Transaction record
//!
//! A single income or expense entry as it travels through export and import.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ids::TransactionId;
use super::money::Money;

/// Direction of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Income,
    #[default]
    Expense,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Income => "income",
            Self::Expense => "expense",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "income" | "inflow" | "credit" | "deposit" => Ok(Self::Income),
            "expense" | "outflow" | "debit" | "withdrawal" => Ok(Self::Expense),
            other => Err(format!("unknown transaction type '{}'", other)),
        }
    }
}

/// A financial transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Unique identifier
    pub id: TransactionId,

    /// What the money was for
    pub description: String,

    /// Amount (always positive, direction is carried by `kind`)
    pub amount: Money,

    /// Income or expense
    #[serde(rename = "type")]
    pub kind: TransactionType,

    /// Category name
    #[serde(default)]
    pub category: Option<String>,

    /// Transaction date
    pub date: NaiveDate,

    /// Free-form notes
    #[serde(default)]
    pub notes: String,

    /// Attachment references (file names or URLs)
    #[serde(default)]
    pub attachments: Vec<String>,
}

impl TransactionRecord {
    /// Create a new transaction
    pub fn new(
        description: impl Into<String>,
        amount: Money,
        kind: TransactionType,
        date: NaiveDate,
    ) -> Self {
        Self {
            id: TransactionId::new(),
            description: description.into(),
            amount,
            kind,
            category: None,
            date,
            notes: String::new(),
            attachments: Vec::new(),
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Signed amount (negative for expenses)
    pub fn signed_amount(&self) -> Money {
        match self.kind {
            TransactionType::Income => self.amount,
            TransactionType::Expense => -self.amount,
        }
    }

    /// Fingerprint for duplicate detection of id-less imports
    pub fn fingerprint(&self) -> String {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.date.hash(&mut hasher);
        self.signed_amount().cents().hash(&mut hasher);
        self.description.trim().to_lowercase().hash(&mut hasher);
        format!("imp-{:016x}", hasher.finish())
    }
}
