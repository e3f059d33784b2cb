use crate::error::{EtlError, Result};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

/// A column label as delivered by the provider.
///
/// Quote, company and catalog tables carry flat labels; the quarterly ratio tables carry two
/// levels, `(category, name)`, e.g. `("Chỉ tiêu khả năng sinh lợi", "ROE (%)")`.
///
/// ```json
/// "columns": ["time", "MaCK", ["Meta", "CP"], ["Chỉ tiêu định giá", "P/E"]]
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Label {
    Flat(String),
    Nested(String, String),
}

impl Label {
    /// The innermost label, which is the one every mapping is keyed on.
    pub fn name(&self) -> &str {
        match self {
            Label::Flat(name) => name,
            Label::Nested(_, name) => name,
        }
    }

    pub fn category(&self) -> Option<&str> {
        match self {
            Label::Flat(_) => None,
            Label::Nested(category, _) => Some(category),
        }
    }
}

impl From<&str> for Label {
    fn from(name: &str) -> Self {
        Label::Flat(name.to_string())
    }
}

impl From<(&str, &str)> for Label {
    fn from((category, name): (&str, &str)) -> Self {
        Label::Nested(category.to_string(), name.to_string())
    }
}

/// The in-memory tabular structure exchanged with the extraction collaborator: a header of
/// column labels and row-major JSON cells. A `null` cell is a missing value.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Frame {
    pub columns: Vec<Label>,
    pub rows: Vec<Vec<Value>>,
}

impl Frame {
    pub fn new(columns: Vec<Label>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Build a frame with flat labels; handy for small, hand-written tables.
    pub fn flat(columns: &[&str], rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns: columns.iter().map(|&name| Label::from(name)).collect(),
            rows,
        }
    }

    pub fn push_row(&mut self, row: Vec<Value>) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Innermost label of every column, in header order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(Label::name)
    }

    /// Index of the first column whose innermost label is `name`.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|label| label.name() == name)
    }

    /// Cell at (`row`, `col`); short rows read as `null`.
    pub fn cell(&self, row: usize, col: usize) -> &Value {
        self.rows
            .get(row)
            .and_then(|cells| cells.get(col))
            .unwrap_or(&Value::Null)
    }

    /// Index of the column `name`, or the stage-aborting error naming the missing field.
    pub(crate) fn require(&self, table: &'static str, name: &str) -> Result<usize> {
        self.position(name).ok_or_else(|| EtlError::MissingField {
            table,
            field: name.to_string(),
        })
    }

    pub(crate) fn decimal(
        &self,
        table: &'static str,
        row: usize,
        col: usize,
    ) -> Result<Option<Decimal>> {
        as_decimal(self.cell(row, col)).map_err(|value| self.invalid(table, col, value))
    }

    pub(crate) fn int(&self, table: &'static str, row: usize, col: usize) -> Result<Option<i64>> {
        as_int(self.cell(row, col)).map_err(|value| self.invalid(table, col, value))
    }

    pub(crate) fn text(
        &self,
        table: &'static str,
        row: usize,
        col: usize,
    ) -> Result<Option<String>> {
        as_text(self.cell(row, col)).map_err(|value| self.invalid(table, col, value))
    }

    fn invalid(&self, table: &'static str, col: usize, value: String) -> EtlError {
        EtlError::InvalidCell {
            table,
            field: self.columns[col].name().to_string(),
            value,
        }
    }
}

// cell coercion
// ----------------------------------------------------------------------------
//
// Each helper returns `Ok(None)` for a missing cell and `Err(rendered)` for a cell that holds
// something other than the requested type; callers turn the latter into
// `EtlError::InvalidCell` with their own table & field names.

fn is_missing(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => {
            let s = s.trim();
            s.is_empty() || s.eq_ignore_ascii_case("nan")
        }
        _ => false,
    }
}

/// Parse a decimal from its textual form, accepting scientific notation.
fn parse_decimal(s: &str) -> Option<Decimal> {
    Decimal::from_str(s)
        .ok()
        .or_else(|| Decimal::from_scientific(s).ok())
}

pub(crate) fn as_decimal(value: &Value) -> std::result::Result<Option<Decimal>, String> {
    if is_missing(value) {
        return Ok(None);
    }
    match value {
        // the textual form of a JSON number is exact; going through f64 is the fallback
        Value::Number(n) => parse_decimal(&n.to_string())
            .or_else(|| n.as_f64().and_then(Decimal::from_f64))
            .map(Some)
            .ok_or_else(|| value.to_string()),
        Value::String(s) => parse_decimal(s.trim())
            .map(Some)
            .ok_or_else(|| value.to_string()),
        _ => Err(value.to_string()),
    }
}

pub(crate) fn as_int(value: &Value) -> std::result::Result<Option<i64>, String> {
    if is_missing(value) {
        return Ok(None);
    }
    match value {
        Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(Some(i)),
            // pandas hands integers with missing neighbours over as floats, e.g. 2024.0
            None => match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(Some(f as i64)),
                _ => Err(value.to_string()),
            },
        },
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| value.to_string()),
        _ => Err(value.to_string()),
    }
}

pub(crate) fn as_text(value: &Value) -> std::result::Result<Option<String>, String> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.trim().to_string())),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Bool(b) => Ok(Some(b.to_string())),
        _ => Err(value.to_string()),
    }
}

//////////////////////////////////////////////////////////////
// -- TESTS --
//////////////////////////////////////////////////////////////

#[test]
fn nested_and_flat_labels_deserialize() {
    let frame: Frame = serde_json::from_str(
        r#"{
            "columns": ["time", ["Meta", "CP"], ["Chỉ tiêu định giá", "P/E"]],
            "rows": [["2024-01-02", "ACB", 7.1]]
        }"#,
    )
    .unwrap();

    assert_eq!(frame.columns[0], Label::from("time"));
    assert_eq!(frame.columns[1].category(), Some("Meta"));
    assert_eq!(frame.names().collect::<Vec<_>>(), vec!["time", "CP", "P/E"]);
    assert_eq!(frame.position("P/E"), Some(2));
}

#[test]
fn typed_cells_report_their_field() {
    use serde_json::json;

    let frame = Frame::flat(&["symbol", "rating"], vec![vec![json!("ACB"), json!("high")]]);
    assert_eq!(frame.text("company", 0, 0).unwrap().as_deref(), Some("ACB"));
    assert!(matches!(
        frame.decimal("company", 0, 1),
        Err(EtlError::InvalidCell { field, .. }) if field == "rating"
    ));
    // short rows read as missing
    let frame = Frame::flat(&["a", "b"], vec![vec![json!(1)]]);
    assert_eq!(frame.int("t", 0, 1).unwrap(), None);
    assert!(matches!(frame.require("t", "c"), Err(EtlError::MissingField { .. })));
}

#[test]
fn decimal_coercion() {
    use serde_json::json;

    assert_eq!(as_decimal(&json!(15.2)), Ok(Some(Decimal::new(152, 1))));
    assert_eq!(as_decimal(&json!("0.35")), Ok(Some(Decimal::new(35, 2))));
    assert_eq!(as_decimal(&json!(1e-7)), Ok(Some(Decimal::new(1, 7))));
    assert_eq!(as_decimal(&json!(null)), Ok(None));
    assert_eq!(as_decimal(&json!("NaN")), Ok(None));
    assert!(as_decimal(&json!("n/a")).is_err());
    assert!(as_decimal(&json!([1])).is_err());
}

#[test]
fn int_coercion_accepts_whole_floats() {
    use serde_json::json;

    assert_eq!(as_int(&json!(2024)), Ok(Some(2024)));
    assert_eq!(as_int(&json!(2024.0)), Ok(Some(2024)));
    assert_eq!(as_int(&json!(" 3 ")), Ok(Some(3)));
    assert!(as_int(&json!(2.5)).is_err());
}
