//! Output formatting utilities for the CLI
//!
//! Control query records render either as a terminal table or as JSON.
//! Errors go through [`print_error`] so they pick up color.

use anyhow::{Context, Result};
use tabled::{
    settings::{Style, Width},
    Table, Tabled,
};

use hansel_core::control::ControlRecord;

/// Widest a table may grow before output cells wrap
const TABLE_WIDTH: usize = 120;

/// Format control query records as an ASCII table
///
/// Each record's outputs are joined one per line inside the OUTPUTS cell,
/// with trailing newlines dropped. Returns "No matching clients" for an
/// empty answer.
pub fn format_records(records: &[ControlRecord]) -> String {
    if records.is_empty() {
        return "No matching clients".to_string();
    }

    #[derive(Tabled)]
    struct RecordRow {
        #[tabled(rename = "CLIENT")]
        client: String,
        #[tabled(rename = "SEQUENCE")]
        sequence: String,
        #[tabled(rename = "STATUS")]
        status: String,
        #[tabled(rename = "OUTPUTS")]
        outputs: String,
    }

    let rows: Vec<RecordRow> = records
        .iter()
        .map(|r| RecordRow {
            client: r.client_name.clone(),
            sequence: if r.last_sequence == 0 {
                "-".to_string()
            } else {
                r.last_sequence.to_string()
            },
            status: or_dash(&r.status),
            outputs: or_dash(&join_outputs(&r.outputs)),
        })
        .collect();

    Table::new(rows)
        .with(Style::rounded())
        .with(Width::wrap(TABLE_WIDTH))
        .to_string()
}

/// Format control query records as pretty-printed JSON
pub fn format_records_json(records: &[ControlRecord]) -> Result<String> {
    serde_json::to_string_pretty(records).context("Failed to serialize records")
}

fn join_outputs(outputs: &[String]) -> String {
    outputs
        .iter()
        .map(|o| o.trim_end_matches('\n'))
        .collect::<Vec<_>>()
        .join("\n")
}

fn or_dash(s: &str) -> String {
    if s.is_empty() {
        "-".to_string()
    } else {
        s.to_string()
    }
}

/// Print an error message in red with an X prefix
///
/// Outputs to stderr.
pub fn print_error(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}
