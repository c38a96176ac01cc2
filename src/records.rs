//! Invoice and transaction CSV records, KPI counting.

use std::collections::HashSet;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::{Error, Result};

/// One CSV row keyed by header.
pub type Record = Map<String, Value>;

static FIRST_INTEGER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("valid integer regex"));

/// Dashboard counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KpiResponse {
    pub total_invoices: u64,
    pub total_transactions: u64,
    pub anomalies: u64,
    pub total_vendors: u64,
}

/// Read a CSV file into records. Numeric cells become JSON numbers and empty
/// cells become `null`.
pub fn read_records(path: &Path, delimiter: u8) -> Result<Vec<Record>> {
    if !path.exists() {
        return Err(Error::NotFound(path.display().to_string()));
    }
    let bytes = std::fs::read(path)?;
    parse_records(&bytes, delimiter, usize::MAX)
}

/// Parse CSV bytes into at most `max_rows` records.
pub fn parse_records(bytes: &[u8], delimiter: u8, max_rows: usize) -> Result<Vec<Record>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .trim(csv::Trim::All)
        .from_reader(bytes);
    let headers = reader.headers()?.clone();

    let mut records = Vec::new();
    for row in reader.records().take(max_rows) {
        let row = row?;
        let record: Record = headers
            .iter()
            .zip(row.iter())
            .map(|(header, cell)| (header.to_string(), infer_value(cell)))
            .collect();
        records.push(record);
    }
    Ok(records)
}

fn infer_value(cell: &str) -> Value {
    if cell.is_empty() {
        return Value::Null;
    }
    if let Ok(i) = cell.parse::<i64>() {
        return Value::Number(i.into());
    }
    cell.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(cell.to_string()))
}

/// Rows rendered as `header: value` items for graph ingestion.
pub fn csv_rows_as_items(bytes: &[u8], delimiter: u8, max_rows: usize) -> Result<Vec<String>> {
    let records = parse_records(bytes, delimiter, max_rows)?;
    let items: Vec<String> = records
        .iter()
        .map(|record| {
            record
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| format!("{}: {}", k, cell_text(v)))
                .collect::<Vec<_>>()
                .join(", ")
        })
        .filter(|item| !item.is_empty())
        .collect();

    if items.is_empty() {
        return Err(Error::InvalidArgument(
            "CSV file is empty or could not be parsed".to_string(),
        ));
    }
    Ok(items)
}

/// Comparable text of a cell; numbers are canonical so `899.00` equals `899`.
fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_i64() {
            Some(i) => i.to_string(),
            None => n.as_f64().map(|f| f.to_string()).unwrap_or_else(|| n.to_string()),
        },
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn column<'a>(records: &'a [Record], key: &'a str) -> impl Iterator<Item = String> + 'a {
    records
        .iter()
        .filter_map(move |r| r.get(key))
        .filter(|v| !v.is_null())
        .map(cell_text)
}

fn match_keys(records: &[Record], amount_column: &str) -> HashSet<String> {
    records
        .iter()
        .filter_map(|r| {
            let vendor = r.get("vendor_id").map(cell_text)?;
            let amount = r.get(amount_column).map(cell_text)?;
            Some(format!("{}-{}", vendor, amount))
        })
        .collect()
}

/// Count KPIs directly from the records.
///
/// Vendors are the union of `vendor_id` over both files. Anomalies are the
/// `vendor_id-total` invoice keys and `vendor_id-amount` transaction keys
/// without a counterpart on the other side.
pub fn compute_kpis(invoices: &[Record], transactions: &[Record]) -> KpiResponse {
    let vendors: HashSet<String> = column(invoices, "vendor_id")
        .chain(column(transactions, "vendor_id"))
        .collect();

    let invoice_keys = match_keys(invoices, "total");
    let transaction_keys = match_keys(transactions, "amount");

    KpiResponse {
        total_invoices: invoices.len() as u64,
        total_transactions: transactions.len() as u64,
        anomalies: invoice_keys.symmetric_difference(&transaction_keys).count() as u64,
        total_vendors: vendors.len() as u64,
    }
}

/// First integer in an LLM answer, 0 when there is none.
pub fn extract_number(answer: &str) -> u64 {
    FIRST_INTEGER
        .find(answer.trim())
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// CSV delimiter from a form field: first byte, `,` when blank.
pub fn delimiter_byte(delimiter: &str) -> Result<u8> {
    match delimiter.as_bytes() {
        [] => Ok(b','),
        [b] => Ok(*b),
        _ if delimiter == "\\t" => Ok(b'\t'),
        _ => Err(Error::InvalidArgument(format!(
            "Delimiter must be a single character, got {:?}",
            delimiter
        ))),
    }
}
