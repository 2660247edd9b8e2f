//! Import validation
//!
//! Turns loosely typed [`RawRecord`]s into typed [`Record`]s using the same
//! rules that apply when the entity is created by hand. Field names are
//! matched through a short list of aliases so files produced by other tools
//! import without a column mapping step.
//!
//! Validation never fails the whole import: every problem found in a record
//! is collected as a [`FieldError`] and the record is rejected as a unit.

use std::str::FromStr;

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;

use crate::models::{
    BudgetId, BudgetPeriod, BudgetRecord, CategoryId, CategoryKind, CategoryRecord, DataType,
    FieldError, GoalId, GoalRecord, GoalStatus, ImportOptions, Money, RawRecord, Record,
    RecordError, TransactionId, TransactionRecord, TransactionType, MAX_CATEGORY_NAME_LEN,
};

/// Date formats tried after the configured one
const FALLBACK_DATE_FORMATS: [&str; 9] = [
    "%Y-%m-%d", "%m/%d/%Y", "%m/%d/%y", "%d/%m/%Y", "%d/%m/%y", "%Y/%m/%d", "%m-%d-%Y", "%d-%m-%Y",
    "%d.%m.%Y",
];

const ID: &[&str] = &["id"];

/// Result of validating one record
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    Accepted(Record),
    Rejected(Vec<FieldError>),
}

impl ValidationOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

/// Per-data-type validator configured by import options
#[derive(Debug, Clone, Default)]
pub struct Validator {
    options: ImportOptions,
}

impl Validator {
    pub fn new(options: ImportOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ImportOptions {
        &self.options
    }

    /// Validate and normalize one decoded record
    pub fn validate(&self, data_type: DataType, raw: &RawRecord) -> ValidationOutcome {
        let mut fields = Fields::new(raw, self.options.date_format.as_deref());
        let record = match data_type {
            DataType::Transactions => self.transaction(&mut fields).map(Record::Transaction),
            DataType::Budgets => self.budget(&mut fields).map(Record::Budget),
            DataType::Goals => goal(&mut fields).map(Record::Goal),
            DataType::Categories => category(&mut fields).map(Record::Category),
            DataType::All => {
                fields.error("type", "records must have a concrete data type");
                None
            }
        };

        match record {
            Some(record) if fields.errors.is_empty() => ValidationOutcome::Accepted(record),
            _ => ValidationOutcome::Rejected(fields.errors),
        }
    }

    /// Like [`validate`](Self::validate), reporting rejections as a [`RecordError`]
    pub fn check(&self, data_type: DataType, raw: &RawRecord) -> Result<Record, RecordError> {
        match self.validate(data_type, raw) {
            ValidationOutcome::Accepted(record) => Ok(record),
            ValidationOutcome::Rejected(errors) => Err(RecordError::from_fields(raw.index, errors)),
        }
    }

    fn default_category(&self) -> Option<String> {
        self.options
            .default_category
            .as_ref()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
    }

    fn transaction(&self, f: &mut Fields<'_>) -> Option<TransactionRecord> {
        let id = f.id::<TransactionId>();
        let description = f.required_text("description", &["description", "desc", "memo", "payee", "name"]);
        let amount = f.positive_money("amount", &["amount", "value", "sum"], true);
        let kind = f.parsed::<TransactionType>("type", &["type", "kind", "transaction_type"], true);
        let date = f.date("date", &["date", "transaction_date", "posted"], true);
        let category = f
            .text(&["category", "category_name"])
            .or_else(|| self.default_category());
        let notes = f.text(&["notes", "note", "comment"]).unwrap_or_default();
        let attachments = f.list("attachments", &["attachments", "attachment"]);

        Some(TransactionRecord {
            id: id?,
            description: description?,
            amount: amount??,
            kind: kind??,
            category,
            date: date??,
            notes,
            attachments,
        })
    }

    fn budget(&self, f: &mut Fields<'_>) -> Option<BudgetRecord> {
        let id = f.id::<BudgetId>();
        let name = f.required_text("name", &["name", "title"]);
        let category = match f.text(&["category", "category_name"]).or_else(|| self.default_category()) {
            Some(category) => Some(category),
            None => {
                f.error("category", "is required");
                None
            }
        };
        let amount = f.positive_money("amount", &["amount", "limit", "budget"], true);
        let period = f.parsed::<BudgetPeriod>("period", &["period", "frequency"], false);
        let start_date = f.date("start_date", &["start_date", "start", "date"], true);
        let end_date = f.date("end_date", &["end_date", "end"], false);

        if let (Some(Some(start)), Some(Some(end))) = (start_date, end_date) {
            if end < start {
                f.error("end_date", "must not be before start_date");
            }
        }

        Some(BudgetRecord {
            id: id?,
            name: name?,
            category: category?,
            amount: amount??,
            period: period?.unwrap_or_default(),
            start_date: start_date??,
            end_date: end_date?,
        })
    }
}

fn goal(f: &mut Fields<'_>) -> Option<GoalRecord> {
    let id = f.id::<GoalId>();
    let name = f.required_text("name", &["name", "title"]);
    let target_amount = f.positive_money("target_amount", &["target_amount", "target", "goal_amount"], true);
    let current_amount = f.money("current_amount", &["current_amount", "current", "saved", "saved_amount"], false);
    if let Some(Some(current)) = current_amount {
        if current.is_negative() {
            f.error("current_amount", "must not be negative");
        }
    }
    let deadline = f.date("deadline", &["deadline", "target_date", "due_date"], false);
    let status = f.parsed::<GoalStatus>("status", &["status", "state"], false);

    Some(GoalRecord {
        id: id?,
        name: name?,
        target_amount: target_amount??,
        current_amount: current_amount?.unwrap_or_default(),
        deadline: deadline?,
        status: status?.unwrap_or_default(),
    })
}

fn category(f: &mut Fields<'_>) -> Option<CategoryRecord> {
    let id = f.id::<CategoryId>();
    let name = f.required_text("name", &["name", "category", "title"]);
    if let Some(name) = &name {
        if name.chars().count() > MAX_CATEGORY_NAME_LEN {
            f.error(
                "name",
                format!("must be at most {} characters", MAX_CATEGORY_NAME_LEN),
            );
        }
    }
    let kind = f.parsed::<CategoryKind>("type", &["type", "kind"], false);
    let color = f.text(&["color", "colour"]);
    if let Some(color) = &color {
        if !is_hex_color(color) {
            f.error("color", "must be a hex color such as #4caf50");
        }
    }
    let icon = f.text(&["icon"]);

    Some(CategoryRecord {
        id: id?,
        name: name?,
        kind: kind?.unwrap_or_default(),
        color,
        icon,
    })
}

fn is_hex_color(value: &str) -> bool {
    let Some(hex) = value.strip_prefix('#') else {
        return false;
    };
    matches!(hex.len(), 3 | 6) && hex.chars().all(|c| c.is_ascii_hexdigit())
}

/// Parse a date with the preferred format first, then common formats
pub fn parse_date(value: &str, preferred: Option<&str>) -> Option<NaiveDate> {
    let value = value.trim();
    // Timestamps such as 2025-01-31T00:00:00Z keep only their date part
    let value = match value.split_once('T') {
        Some((date, _)) if date.len() == 10 => date,
        _ => value,
    };
    preferred
        .into_iter()
        .chain(FALLBACK_DATE_FORMATS)
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
}

/// Field accessor that records every problem it meets.
///
/// Getters return `None` when the field produced an error, so the record
/// builders can bail with `?` after all fields have been examined.
struct Fields<'a> {
    raw: &'a RawRecord,
    date_format: Option<&'a str>,
    errors: Vec<FieldError>,
}

impl<'a> Fields<'a> {
    fn new(raw: &'a RawRecord, date_format: Option<&'a str>) -> Self {
        Self {
            raw,
            date_format,
            errors: Vec::new(),
        }
    }

    fn error(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(FieldError::new(field, message));
    }

    fn text(&self, aliases: &[&str]) -> Option<String> {
        match self.raw.get_any(aliases)? {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    fn required_text(&mut self, field: &str, aliases: &[&str]) -> Option<String> {
        let value = self.text(aliases);
        if value.is_none() {
            self.error(field, "is required");
        }
        value
    }

    /// Missing optional fields yield `Some(None)`; bad values yield `None`
    fn money(&mut self, field: &str, aliases: &[&str], required: bool) -> Option<Option<Money>> {
        let parsed = match self.raw.get_any(aliases) {
            None if required => Err("is required".to_string()),
            None => return Some(None),
            Some(Value::Number(n)) => n
                .as_f64()
                .filter(|v| v.is_finite() && v.abs() < 9.0e13)
                .map(|v| Money::from_cents((v * 100.0).round() as i64))
                .ok_or_else(|| "is out of range".to_string()),
            Some(Value::String(s)) => Money::parse(s).map_err(|_| format!("'{}' is not an amount", s.trim())),
            Some(_) => Err("must be a number".to_string()),
        };
        match parsed {
            Ok(money) => Some(Some(money)),
            Err(message) => {
                self.error(field, message);
                None
            }
        }
    }

    fn positive_money(&mut self, field: &str, aliases: &[&str], required: bool) -> Option<Option<Money>> {
        let money = self.money(field, aliases, required)?;
        if let Some(amount) = money {
            if !amount.is_positive() {
                self.error(field, "must be greater than zero");
                return None;
            }
        }
        Some(money)
    }

    fn date(&mut self, field: &str, aliases: &[&str], required: bool) -> Option<Option<NaiveDate>> {
        let parsed = match self.raw.get_any(aliases) {
            None if required => Err("is required".to_string()),
            None => return Some(None),
            Some(Value::String(s)) => {
                parse_date(s, self.date_format).ok_or_else(|| format!("'{}' is not a date", s.trim()))
            }
            Some(_) => Err("must be a date string".to_string()),
        };
        match parsed {
            Ok(date) => Some(Some(date)),
            Err(message) => {
                self.error(field, message);
                None
            }
        }
    }

    fn parsed<T: FromStr<Err = String>>(
        &mut self,
        field: &str,
        aliases: &[&str],
        required: bool,
    ) -> Option<Option<T>> {
        match self.text(aliases) {
            None if required => {
                self.error(field, "is required");
                None
            }
            None => Some(None),
            Some(text) => match text.parse::<T>() {
                Ok(value) => Some(Some(value)),
                Err(message) => {
                    self.error(field, message);
                    None
                }
            },
        }
    }

    /// Parse the record id, or generate one when absent
    fn id<T: FromStr + Default>(&mut self) -> Option<T> {
        match self.text(ID) {
            None => Some(T::default()),
            Some(text) => match text.parse::<T>() {
                Ok(id) => Some(id),
                Err(_) => {
                    self.error("id", format!("'{}' is not a valid id", text));
                    None
                }
            },
        }
    }

    fn list(&mut self, field: &str, aliases: &[&str]) -> Vec<String> {
        match self.raw.get_any(aliases) {
            None => Vec::new(),
            Some(Value::Array(items)) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::String(s) if !s.trim().is_empty() => out.push(s.trim().to_string()),
                        Value::String(_) | Value::Null => {}
                        _ => self.error(field, "must contain only strings"),
                    }
                }
                out
            }
            Some(Value::String(s)) => s
                .split([';', '|'])
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            Some(_) => {
                self.error(field, "must be a list of strings");
                Vec::new()
            }
        }
    }
}

/// Aggregated outcome of validating a whole payload without committing it
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ValidationSummary {
    pub total: u64,
    pub accepted: u64,
    /// Decode and validation failures, ordered by record index
    pub errors: Vec<RecordError>,
}

impl ValidationSummary {
    pub fn rejected(&self) -> usize {
        self.errors.len()
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

impl Validator {
    /// Run every record of a decoded stream through the validator
    pub fn validate_stream<I>(&self, data_type: DataType, stream: I) -> ValidationSummary
    where
        I: IntoIterator<Item = Result<RawRecord, RecordError>>,
    {
        let mut summary = ValidationSummary::default();
        for item in stream {
            summary.total += 1;
            match item.and_then(|raw| self.check(data_type, &raw)) {
                Ok(_) => summary.accepted += 1,
                Err(error) => summary.errors.push(error),
            }
        }
        summary
    }
}

/// Whether the raw record names an id of its own
pub fn has_explicit_id(raw: &RawRecord) -> bool {
    raw.get_any(ID).is_some()
}
