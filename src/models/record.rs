//! Records as seen by the codecs
//!
//! [`Record`] is a typed, validated entity of one of the four data types.
//! [`RawRecord`] is what a decoder yields before validation: a loosely typed
//! field map tagged with its position in the input.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use super::budget::BudgetRecord;
use super::category::CategoryRecord;
use super::goal::GoalRecord;
use super::money::Money;
use super::transaction::TransactionRecord;

/// Kind of data an operation works on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Transactions,
    Budgets,
    Goals,
    Categories,
    /// Every concrete type (export only)
    All,
}

impl DataType {
    /// The four concrete data types, in export order
    pub const CONCRETE: [DataType; 4] = [
        DataType::Transactions,
        DataType::Budgets,
        DataType::Goals,
        DataType::Categories,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transactions => "transactions",
            Self::Budgets => "budgets",
            Self::Goals => "goals",
            Self::Categories => "categories",
            Self::All => "all",
        }
    }

    pub fn is_concrete(&self) -> bool {
        !matches!(self, Self::All)
    }

    /// Concrete types covered by this data type
    pub fn expand(&self) -> Vec<DataType> {
        match self {
            Self::All => Self::CONCRETE.to_vec(),
            other => vec![*other],
        }
    }

    /// Column layout used by tabular formats
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            Self::Transactions => &[
                "id",
                "date",
                "description",
                "amount",
                "type",
                "category",
                "notes",
                "attachments",
            ],
            Self::Budgets => &[
                "id",
                "name",
                "category",
                "amount",
                "period",
                "start_date",
                "end_date",
            ],
            Self::Goals => &[
                "id",
                "name",
                "target_amount",
                "current_amount",
                "deadline",
                "status",
            ],
            Self::Categories => &["id", "name", "type", "color", "icon"],
            Self::All => &[],
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "transactions" | "transaction" => Ok(Self::Transactions),
            "budgets" | "budget" => Ok(Self::Budgets),
            "goals" | "goal" => Ok(Self::Goals),
            "categories" | "category" => Ok(Self::Categories),
            "all" => Ok(Self::All),
            other => Err(format!("unknown data type '{}'", other)),
        }
    }
}

/// One typed value in a tabular row
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Amount(Money),
    Date(NaiveDate),
    List(Vec<String>),
    Empty,
}

impl Cell {
    fn opt_text(value: &Option<String>) -> Self {
        match value {
            Some(s) if !s.is_empty() => Cell::Text(s.clone()),
            _ => Cell::Empty,
        }
    }

    fn opt_date(value: Option<NaiveDate>) -> Self {
        value.map_or(Cell::Empty, Cell::Date)
    }

    /// Plain-text rendering used by CSV and PDF
    pub fn to_text(&self) -> String {
        match self {
            Cell::Text(s) => s.clone(),
            Cell::Amount(m) => m.to_decimal_string(),
            Cell::Date(d) => d.format("%Y-%m-%d").to_string(),
            Cell::List(items) => items.join(";"),
            Cell::Empty => String::new(),
        }
    }

    /// JSON rendering; amounts become numbers
    pub fn to_json(&self) -> Value {
        match self {
            Cell::Text(s) => Value::String(s.clone()),
            Cell::Amount(m) => serde_json::Number::from_f64(m.as_f64())
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(m.to_decimal_string())),
            Cell::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
            Cell::List(items) => Value::Array(items.iter().cloned().map(Value::String).collect()),
            Cell::Empty => Value::Null,
        }
    }
}

/// A validated entity of a concrete data type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "data_type", rename_all = "lowercase")]
pub enum Record {
    Transaction(TransactionRecord),
    Budget(BudgetRecord),
    Goal(GoalRecord),
    Category(CategoryRecord),
}

impl Record {
    pub fn data_type(&self) -> DataType {
        match self {
            Record::Transaction(_) => DataType::Transactions,
            Record::Budget(_) => DataType::Budgets,
            Record::Goal(_) => DataType::Goals,
            Record::Category(_) => DataType::Categories,
        }
    }

    /// Full identifier string, used as the storage key
    pub fn key(&self) -> String {
        match self {
            Record::Transaction(t) => t.id.as_uuid().to_string(),
            Record::Budget(b) => b.id.as_uuid().to_string(),
            Record::Goal(g) => g.id.as_uuid().to_string(),
            Record::Category(c) => c.id.as_uuid().to_string(),
        }
    }

    /// Date used by export date-range filters, if the type has one
    pub fn reference_date(&self) -> Option<NaiveDate> {
        match self {
            Record::Transaction(t) => Some(t.date),
            Record::Budget(b) => Some(b.start_date),
            Record::Goal(g) => g.deadline,
            Record::Category(_) => None,
        }
    }

    /// Drop attachment references (transactions only)
    pub fn strip_attachments(&mut self) {
        if let Record::Transaction(t) = self {
            t.attachments.clear();
        }
    }

    /// Row cells in the order given by [`DataType::columns`]
    pub fn cells(&self) -> Vec<Cell> {
        match self {
            Record::Transaction(t) => vec![
                Cell::Text(t.id.as_uuid().to_string()),
                Cell::Date(t.date),
                Cell::Text(t.description.clone()),
                Cell::Amount(t.amount),
                Cell::Text(t.kind.as_str().to_string()),
                Cell::opt_text(&t.category),
                if t.notes.is_empty() {
                    Cell::Empty
                } else {
                    Cell::Text(t.notes.clone())
                },
                if t.attachments.is_empty() {
                    Cell::Empty
                } else {
                    Cell::List(t.attachments.clone())
                },
            ],
            Record::Budget(b) => vec![
                Cell::Text(b.id.as_uuid().to_string()),
                Cell::Text(b.name.clone()),
                Cell::Text(b.category.clone()),
                Cell::Amount(b.amount),
                Cell::Text(b.period.as_str().to_string()),
                Cell::Date(b.start_date),
                Cell::opt_date(b.end_date),
            ],
            Record::Goal(g) => vec![
                Cell::Text(g.id.as_uuid().to_string()),
                Cell::Text(g.name.clone()),
                Cell::Amount(g.target_amount),
                Cell::Amount(g.current_amount),
                Cell::opt_date(g.deadline),
                Cell::Text(g.status.as_str().to_string()),
            ],
            Record::Category(c) => vec![
                Cell::Text(c.id.as_uuid().to_string()),
                Cell::Text(c.name.clone()),
                Cell::Text(c.kind.as_str().to_string()),
                Cell::opt_text(&c.color),
                Cell::opt_text(&c.icon),
            ],
        }
    }

    /// JSON object keyed by column name, omitting empty cells
    pub fn to_json_object(&self) -> Map<String, Value> {
        self.data_type()
            .columns()
            .iter()
            .zip(self.cells())
            .filter(|(_, cell)| *cell != Cell::Empty)
            .map(|(name, cell)| (name.to_string(), cell.to_json()))
            .collect()
    }
}

/// A decoded but not yet validated record
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    /// Zero-based position among the data records of the input
    pub index: usize,
    /// Field values keyed by normalized field name
    pub fields: Map<String, Value>,
}

impl RawRecord {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            fields: Map::new(),
        }
    }

    /// Insert a field under its normalized name
    pub fn insert(&mut self, name: &str, value: Value) {
        self.fields.insert(normalize_field_name(name), value);
    }

    /// First non-empty value among the given aliases
    pub fn get_any(&self, aliases: &[&str]) -> Option<&Value> {
        aliases
            .iter()
            .filter_map(|alias| self.fields.get(*alias))
            .find(|value| match value {
                Value::Null => false,
                Value::String(s) => !s.trim().is_empty(),
                _ => true,
            })
    }
}

/// Lowercase, trimmed, with spaces and dashes turned into underscores
pub fn normalize_field_name(name: &str) -> String {
    name.trim()
        .trim_start_matches('\u{feff}')
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CategoryKind, TransactionType};

    #[test]
    fn test_data_type_expand() {
        assert_eq!(DataType::All.expand().len(), 4);
        assert_eq!(DataType::Goals.expand(), vec![DataType::Goals]);
        assert!(!DataType::All.is_concrete());
    }

    #[test]
    fn test_columns_match_cells() {
        let date = NaiveDate::from_ymd_opt(2025, 2, 1).unwrap();
        let records = vec![
            Record::Transaction(TransactionRecord::new(
                "Coffee",
                Money::from_cents(450),
                TransactionType::Expense,
                date,
            )),
            Record::Budget(BudgetRecord::new(
                "Food",
                "Groceries",
                Money::from_cents(40000),
                Default::default(),
                date,
            )),
            Record::Goal(GoalRecord::new("Trip", Money::from_cents(200000))),
            Record::Category(CategoryRecord::new("Salary", CategoryKind::Income)),
        ];
        for record in records {
            assert_eq!(record.cells().len(), record.data_type().columns().len());
        }
    }

    #[test]
    fn test_json_object_omits_empty() {
        let date = NaiveDate::from_ymd_opt(2025, 2, 1).unwrap();
        let txn = TransactionRecord::new("Coffee", Money::from_cents(450), TransactionType::Expense, date);
        let obj = Record::Transaction(txn).to_json_object();
        assert_eq!(obj["amount"], serde_json::json!(4.5));
        assert_eq!(obj["type"], "expense");
        assert!(!obj.contains_key("category"));
        assert!(!obj.contains_key("attachments"));
    }

    #[test]
    fn test_raw_record_aliases() {
        let mut raw = RawRecord::new(3);
        raw.insert(" Description ", Value::String("  ".into()));
        raw.insert("Memo", Value::String("Lunch".into()));
        assert_eq!(raw.get_any(&["description", "memo"]).unwrap(), "Lunch");
        assert!(raw.get_any(&["amount"]).is_none());
    }

    #[test]
    fn test_normalize_field_name() {
        assert_eq!(normalize_field_name("\u{feff}Start Date"), "start_date");
        assert_eq!(normalize_field_name("target-amount"), "target_amount");
    }
}
