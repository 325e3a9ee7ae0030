//! Business metric evaluation
//!
//! A business target runs an operator-supplied query; the rows it returns are
//! judged here. Without a threshold (or with a threshold of `0`) any row is an
//! alert. With a threshold, the first column of the first row is compared
//! against it when numeric, otherwise the row count is.

use serde_json::Value;

use crate::outcome::{AlertKind, Metrics, Outcome, Status};

/// Rows quoted in an alert message
pub const MAX_DISPLAY_ROWS: usize = 10;

/// Result of judging one query result
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// First column of the first row, `0` when the query returned nothing
    pub value: Value,
    pub row_count: usize,
    pub alert: bool,
    pub rows: Vec<Vec<Value>>,
}

pub fn evaluate(rows: Vec<Vec<Value>>, threshold: Option<f64>) -> Evaluation {
    let row_count = rows.len();
    let value = rows
        .first()
        .and_then(|row| row.first())
        .cloned()
        .unwrap_or_else(|| Value::from(0));

    let alert = match threshold {
        None => row_count > 0,
        Some(limit) if limit == 0.0 => row_count > 0,
        Some(limit) => match value.as_f64() {
            Some(first) => first > limit,
            None => row_count as f64 > limit,
        },
    };

    Evaluation {
        value,
        row_count,
        alert,
        rows,
    }
}

impl Evaluation {
    /// Alert text quoting at most [`MAX_DISPLAY_ROWS`] rows.
    pub fn message(&self) -> String {
        let mut message = format!("business metric abnormal: {}", cell(&self.value));
        if self.row_count == 0 {
            return message;
        }

        message.push_str(&format!(" ({} rows", self.row_count));
        if self.row_count > MAX_DISPLAY_ROWS {
            message.push_str(&format!(", showing first {MAX_DISPLAY_ROWS}"));
        }
        message.push(')');

        for (index, row) in self.rows.iter().take(MAX_DISPLAY_ROWS).enumerate() {
            let line: Vec<String> = row.iter().map(cell).collect();
            message.push_str(&format!("\n  [{}] {}", index + 1, line.join(", ")));
        }

        if self.row_count > MAX_DISPLAY_ROWS {
            message.push_str(&format!(
                "\n  ... +{} more",
                self.row_count - MAX_DISPLAY_ROWS
            ));
        }
        message
    }

    pub fn into_outcome(self) -> Outcome {
        let alert = self.alert.then(|| self.message());
        let rows: Vec<Value> = self.rows.into_iter().map(Value::Array).collect();

        let outcome = Outcome::normal(Metrics::new())
            .with_metric("value", self.value)
            .with_metric("alert", self.alert)
            .with_metric("row_count", self.row_count)
            .with_metric("rows", rows);

        match alert {
            Some(message) => outcome
                .with_status(Status::Warning)
                .with_alert(Some(AlertKind::Business), message),
            None => outcome,
        }
    }
}

fn cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "NULL".to_string(),
        other => other.to_string(),
    }
}
