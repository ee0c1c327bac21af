use std::io::{IsTerminal, Write};
use std::time::Duration;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use tilerpc_dispatch::{EngineStats, RpcId};
use tilerpc_format::{encode, FormatCode, FormatString, Value};

use crate::exit::{CliError, CliResult, DATA_INVALID};

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

/// Outcome of one rpc, ready to print.
pub struct CallReport<'a> {
    pub target: &'a str,
    pub address: u8,
    pub rpc_id: RpcId,
    pub result_format: &'a FormatString,
    pub values: &'a [Value],
    pub elapsed: Duration,
}

#[derive(Serialize)]
struct CallOutput<'a> {
    target: &'a str,
    address: u8,
    rpc_id: String,
    result_format: &'a str,
    result: Vec<serde_json::Value>,
    elapsed_ms: u128,
}

pub fn print_call(report: &CallReport<'_>, format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Json => {
            let out = CallOutput {
                target: report.target,
                address: report.address,
                rpc_id: report.rpc_id.to_string(),
                result_format: report.result_format.as_str(),
                result: report.values.iter().map(json_value).collect(),
                elapsed_ms: report.elapsed.as_millis(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["INDEX", "CODE", "VALUE"]);
            let codes = report
                .result_format
                .codes()
                .iter()
                .filter(|code| code.takes_value());
            for (index, (code, value)) in codes.zip(report.values).enumerate() {
                table.add_row(vec![index.to_string(), code.to_string(), render(code, value)]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let rendered: Vec<String> = report.values.iter().map(ToString::to_string).collect();
            println!(
                "{} address={} rpc={} -> ({}) in {:?}",
                report.target,
                report.address,
                report.rpc_id,
                rendered.join(", "),
                report.elapsed
            );
        }
        OutputFormat::Raw => {
            let bytes = encode(report.result_format, report.values)
                .map_err(|err| CliError::new(DATA_INVALID, format!("result re-encode failed: {err}")))?;
            print_raw(&bytes);
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct LinkOutput<'a> {
    target: &'a str,
    operation: &'a str,
    ok: bool,
    elapsed_ms: u128,
}

/// Print the outcome of a heartbeat or reset.
pub fn print_link(target: &str, operation: &str, ok: bool, elapsed: Duration, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = LinkOutput {
                target,
                operation,
                ok,
                elapsed_ms: elapsed.as_millis(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["TARGET", "OPERATION", "OK", "ELAPSED"])
                .add_row(vec![
                    target.to_string(),
                    operation.to_string(),
                    ok.to_string(),
                    format!("{elapsed:?}"),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("{target} {operation}={} in {elapsed:?}", if ok { "ok" } else { "failed" });
        }
        OutputFormat::Raw => print_raw(if ok { b"1" } else { b"0" }),
    }
}

/// Print engine counters collected while serving.
pub fn print_stats(stats: &EngineStats, format: OutputFormat) {
    match format {
        OutputFormat::Json | OutputFormat::Raw => {
            println!(
                "{}",
                serde_json::to_string(stats).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ISSUED", "COMPLETED", "FAILED", "BUSY", "TIMED OUT", "STRAY"])
                .add_row(vec![
                    stats.issued.to_string(),
                    stats.completed.to_string(),
                    stats.failed.to_string(),
                    stats.busy.to_string(),
                    stats.timed_out.to_string(),
                    stats.stray.to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => println!("{stats:?}"),
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn json_value(value: &Value) -> serde_json::Value {
    match value {
        Value::Int(v) => serde_json::Value::from(*v),
        Value::Bytes(bytes) => serde_json::Value::String(hex(bytes)),
    }
}

fn render(code: &FormatCode, value: &Value) -> String {
    match (code, value) {
        (FormatCode::Bytes(_), Value::Bytes(bytes)) => match std::str::from_utf8(bytes) {
            Ok(text) if text.chars().all(|c| !c.is_control()) => format!("{text:?} ({})", hex(bytes)),
            _ => hex(bytes),
        },
        _ => value.to_string(),
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("0x");
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_values_use_hex_for_bytes() {
        assert_eq!(json_value(&Value::Int(-3)), serde_json::json!(-3));
        assert_eq!(json_value(&Value::from("ab")), serde_json::json!("0x6162"));
    }

    #[test]
    fn table_rendering_shows_text_when_printable() {
        assert_eq!(
            render(&FormatCode::Bytes(2), &Value::from("ok")),
            "\"ok\" (0x6f6b)"
        );
        assert_eq!(render(&FormatCode::Bytes(2), &Value::from(&[0u8, 1][..])), "0x0001");
        assert_eq!(render(&FormatCode::U32, &Value::Int(5)), "5");
    }
}
