use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use esifrpc_codec::{DataType, EsifData};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// A record printable in every output format.
pub trait Record: Serialize {
    /// Label/value pairs for `table` and `pretty`.
    fn fields(&self) -> Vec<(&'static str, String)>;

    /// Bytes for `raw`.
    fn raw(&self) -> Vec<u8>;
}

pub fn print_record(record: &impl Record, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(record).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let fields = record.fields();
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(fields.iter().map(|(label, _)| label.to_uppercase()))
                .add_row(fields.into_iter().map(|(_, value)| value));
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let line = record
                .fields()
                .into_iter()
                .map(|(label, value)| format!("{label}={value}"))
                .collect::<Vec<_>>()
                .join(" ");
            println!("{line}");
        }
        OutputFormat::Raw => print_raw(&record.raw()),
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

/// JSON-friendly rendering of an [`EsifData`].
#[derive(Debug, Serialize)]
pub struct DataOutput {
    #[serde(rename = "type")]
    pub data_type: String,
    pub data_len: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

impl DataOutput {
    pub fn new(data: &EsifData) -> Self {
        Self {
            data_type: type_name(data.data_type),
            data_len: data.data_len,
            value: data_value(data),
        }
    }
}

pub fn type_name(data_type: DataType) -> String {
    format!("{data_type:?}").to_uppercase()
}

fn data_value(data: &EsifData) -> Option<serde_json::Value> {
    if data.is_null() {
        return None;
    }
    let value = match data.data_type {
        DataType::UInt8 | DataType::UInt16 | DataType::UInt32 | DataType::UInt64 => {
            data.as_u64().map(serde_json::Value::from)?
        }
        DataType::Json => data
            .as_str()
            .and_then(|text| serde_json::from_str(text).ok())
            .unwrap_or_else(|| serde_json::Value::String(data.to_string())),
        _ => serde_json::Value::String(data.to_string()),
    };
    Some(value)
}
