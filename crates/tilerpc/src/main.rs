mod cmd;
mod demo;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "tilerpc", version, about = "Tile RPC host and emulator CLI")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_call_subcommand() {
        let cli = Cli::try_parse_from([
            "tilerpc",
            "call",
            "/tmp/device.sock",
            "11",
            "0x8000",
            "--arg-format",
            "LL",
            "--result-format",
            "L",
            "--arg",
            "2",
            "--arg",
            "3",
        ])
        .expect("call args should parse");

        match cli.command {
            Command::Call(args) => {
                assert_eq!(args.call.address, 11);
                assert_eq!(args.call.rpc_id, 0x8000);
                assert_eq!(args.call.args, vec!["2", "3"]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn rejects_out_of_range_address() {
        let err = Cli::try_parse_from(["tilerpc", "emulate", "300", "0x0004"])
            .expect_err("address above 255 should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn parses_serve_and_heartbeat() {
        let cli = Cli::try_parse_from(["tilerpc", "serve", "/tmp/device.sock"])
            .expect("serve args should parse");
        assert!(matches!(cli.command, Command::Serve(_)));

        let cli = Cli::try_parse_from([
            "tilerpc",
            "heartbeat",
            "tcp://127.0.0.1:4000",
            "--timeout",
            "500ms",
        ])
        .expect("heartbeat args should parse");
        assert!(matches!(cli.command, Command::Heartbeat(_)));
    }
}
