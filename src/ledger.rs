//! Rolling detection table.
//!
//! One writer (the pipeline) prepends a block of rows per cycle; any number of
//! HTTP readers take snapshots. The whole block is inserted under one write lock,
//! so a reader sees the ledger either before or after a cycle's rows, never half.
//!
//! Windowing: before a block is inserted, a ledger already holding `row_limit` or
//! more rows is cut back to its newest `row_limit`. The new block then goes on
//! top, so the stored size can sit above the limit until the next append clips it.
//! Snapshots never return more rows than requested.

use std::sync::{PoisonError, RwLock};

use serde::Serialize;

use crate::inference::Detection;

pub const DEFAULT_ROW_LIMIT: usize = 25;
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One detection as shown in the table.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LedgerRow {
    pub timestamp: String,
    pub class: String,
    pub confidence: f32,
}

impl LedgerRow {
    pub fn new(timestamp: impl Into<String>, class: impl Into<String>, confidence: f32) -> Self {
        Self {
            timestamp: timestamp.into(),
            class: class.into(),
            confidence,
        }
    }

    pub fn from_detection(timestamp: &str, detection: &Detection) -> Self {
        Self::new(timestamp, detection.class.clone(), detection.score)
    }
}

/// Local wall-clock time in the ledger's timestamp format.
pub fn wall_clock_timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Newest-first detection log with clip-on-append windowing.
#[derive(Debug)]
pub struct DetectionLedger {
    rows: RwLock<Vec<LedgerRow>>,
    row_limit: usize,
}

impl Default for DetectionLedger {
    fn default() -> Self {
        Self::new(DEFAULT_ROW_LIMIT)
    }
}

impl DetectionLedger {
    pub fn new(row_limit: usize) -> Self {
        Self {
            rows: RwLock::new(Vec::new()),
            row_limit: row_limit.max(1),
        }
    }

    pub fn row_limit(&self) -> usize {
        self.row_limit
    }

    /// Insert one cycle's rows on top of the ledger, keeping their order.
    pub fn append(&self, rows: Vec<LedgerRow>) {
        if rows.is_empty() {
            return;
        }
        let mut guard = self.rows.write().unwrap_or_else(PoisonError::into_inner);
        if guard.len() >= self.row_limit {
            guard.truncate(self.row_limit);
        }
        let mut next = rows;
        next.reserve(guard.len());
        next.append(&mut guard);
        *guard = next;
    }

    /// Up to `limit` most recent rows, newest first.
    pub fn snapshot(&self, limit: usize) -> Vec<LedgerRow> {
        let guard = self.rows.read().unwrap_or_else(PoisonError::into_inner);
        guard.iter().take(limit).cloned().collect()
    }

    /// Rows currently stored, including any not yet clipped.
    pub fn len(&self) -> usize {
        self.rows.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Render rows as the viewer's HTML table fragment.
pub fn render_table_html(rows: &[LedgerRow]) -> String {
    let mut html = String::with_capacity(256 + rows.len() * 96);
    html.push_str("<table border=\"1\" class=\"dataframe\">\n");
    html.push_str("  <thead>\n    <tr style=\"text-align: right;\">\n");
    for column in ["Timestamp", "Defect", "Confidence Score"] {
        html.push_str("      <th>");
        html.push_str(column);
        html.push_str("</th>\n");
    }
    html.push_str("    </tr>\n  </thead>\n  <tbody>\n");
    for row in rows {
        html.push_str("    <tr>\n");
        html.push_str(&format!("      <td>{}</td>\n", escape_html(&row.timestamp)));
        html.push_str(&format!("      <td>{}</td>\n", escape_html(&row.class)));
        html.push_str(&format!("      <td>{}</td>\n", row.confidence));
        html.push_str("    </tr>\n");
    }
    html.push_str("  </tbody>\n</table>");
    html
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
