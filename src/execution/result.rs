//! Query Result - tabular result returned by executors

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub row_count: usize,
    /// More rows existed than the row limit allowed
    pub truncated: bool,
    pub execution_time_ms: u64,
    pub engine_name: String,
}

impl QueryResult {
    pub fn new(
        columns: Vec<String>,
        rows: Vec<Vec<serde_json::Value>>,
        engine_name: impl Into<String>,
    ) -> Self {
        let row_count = rows.len();
        Self {
            columns,
            rows,
            row_count,
            truncated: false,
            execution_time_ms: 0,
            engine_name: engine_name.into(),
        }
    }

    pub fn with_timing(mut self, execution_time_ms: u64) -> Self {
        self.execution_time_ms = execution_time_ms;
        self
    }

    /// Keep at most `max_rows` rows.
    pub fn limit(mut self, max_rows: usize) -> Self {
        if self.rows.len() > max_rows {
            self.rows.truncate(max_rows);
            self.truncated = true;
        }
        self.row_count = self.rows.len();
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows as JSON objects keyed by column name.
    pub fn to_records(&self) -> Vec<serde_json::Map<String, serde_json::Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect()
            })
            .collect()
    }

    /// Non-null values in the column are all numbers (or numeric strings).
    pub fn column_is_numeric(&self, idx: usize) -> bool {
        let mut seen = false;
        for row in &self.rows {
            match row.get(idx) {
                Some(serde_json::Value::Number(_)) => seen = true,
                Some(serde_json::Value::String(s)) if s.parse::<f64>().is_ok() => seen = true,
                Some(serde_json::Value::Null) | None => {}
                _ => return false,
            }
        }
        seen
    }

    /// Non-null values in the column look like ISO dates or timestamps.
    pub fn column_is_temporal(&self, idx: usize) -> bool {
        let mut seen = false;
        for row in &self.rows {
            match row.get(idx) {
                Some(serde_json::Value::String(s)) if looks_like_date(s) => seen = true,
                Some(serde_json::Value::Null) | None => {}
                _ => return false,
            }
        }
        seen
    }
}

fn looks_like_date(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() >= 10
        && b[..4].iter().all(u8::is_ascii_digit)
        && b[4] == b'-'
        && b[5..7].iter().all(u8::is_ascii_digit)
        && b[7] == b'-'
        && b[8..10].iter().all(u8::is_ascii_digit)
}
