//! Per-packet summaries printed when no output trace is given.
//!
//! CSV and JSON rows are written as packets arrive. Tables are rendered in
//! blocks of [`TABLE_BLOCK_ROWS`] so endless inputs still print as they go.

use std::io::Write;

use clap::ValueEnum;
use comfy_table::{Cell, Table};

use crate::packet::Packet;

/// Supported summary layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SummaryFormat {
    /// Aligned columns (default)
    Table,
    /// Comma-separated values
    Csv,
    /// JSON Lines (one JSON object per packet)
    Json,
}

const COLUMNS: [&str; 7] = ["n", "timestamp", "format", "link", "iface", "caplen", "wirelen"];

/// Rows collected before a table is rendered.
pub const TABLE_BLOCK_ROWS: usize = 64;

/// Writes one summary row per packet.
pub struct SummaryFormatter {
    format: SummaryFormat,
    rows: u64,
    table: Option<Table>,
    table_rows: usize,
}

impl SummaryFormatter {
    pub fn new(format: SummaryFormat) -> Self {
        Self {
            format,
            rows: 0,
            table: None,
            table_rows: 0,
        }
    }

    /// Rows written so far.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Summarise `packet` and write it to `writer`.
    pub fn write<W: Write>(&mut self, packet: &Packet, writer: &mut W) -> std::io::Result<()> {
        if self.rows == 0 && self.format == SummaryFormat::Csv {
            writeln!(writer, "{}", COLUMNS.join(","))?;
        }
        self.rows += 1;
        let values = Self::values(self.rows, packet);
        match self.format {
            SummaryFormat::Table => {
                let table = self.table.get_or_insert_with(|| {
                    let mut table = Table::new();
                    table.set_header(COLUMNS.iter().map(|c| Cell::new(c)).collect::<Vec<_>>());
                    table
                });
                table.add_row(values.into_iter().map(Cell::new).collect::<Vec<_>>());
                self.table_rows += 1;
                if self.table_rows >= TABLE_BLOCK_ROWS {
                    self.finish(writer)?;
                }
                Ok(())
            }
            SummaryFormat::Csv => writeln!(writer, "{}", values.join(",")),
            SummaryFormat::Json => {
                let mut obj = serde_json::Map::new();
                obj.insert("n".into(), self.rows.into());
                obj.insert(
                    "timestamp".into(),
                    packet
                        .erf_timestamp()
                        .map(serde_json::Value::from)
                        .unwrap_or(serde_json::Value::Null),
                );
                obj.insert("format".into(), packet.format().name().into());
                obj.insert(
                    "link".into(),
                    packet
                        .link_type()
                        .map(|l| serde_json::Value::String(format!("{:?}", l)))
                        .unwrap_or(serde_json::Value::Null),
                );
                obj.insert(
                    "iface".into(),
                    packet
                        .direction()
                        .map(serde_json::Value::from)
                        .unwrap_or(serde_json::Value::Null),
                );
                obj.insert("caplen".into(), packet.capture_length().into());
                obj.insert("wirelen".into(), packet.wire_length().into());
                writeln!(writer, "{}", serde_json::Value::Object(obj))
            }
        }
    }

    /// Render any table rows still held back.
    pub fn finish<W: Write>(&mut self, writer: &mut W) -> std::io::Result<()> {
        self.table_rows = 0;
        match self.table.take() {
            Some(table) => writeln!(writer, "{table}"),
            None => Ok(()),
        }
    }

    fn values(n: u64, packet: &Packet) -> [String; 7] {
        [
            n.to_string(),
            packet.erf_timestamp().map(format_timestamp).unwrap_or_default(),
            packet.format().name().to_string(),
            packet
                .link_type()
                .map(|l| format!("{:?}", l))
                .unwrap_or_default(),
            packet.direction().map(|d| d.to_string()).unwrap_or_default(),
            packet.capture_length().to_string(),
            packet.wire_length().to_string(),
        ]
    }
}

/// Render a 32.32 timestamp as `seconds.nanoseconds`.
pub fn format_timestamp(ts: u64) -> String {
    let secs = ts >> 32;
    let nanos = ((ts & 0xffff_ffff) * 1_000_000_000) >> 32;
    format!("{}.{:09}", secs, nanos)
}
