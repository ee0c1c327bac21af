use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use tilerpc_format::{FormatCode, FormatString, Value};
use tilerpc_transport::{ByteTransport, TcpLink};

use crate::exit::{transport_error, CliError, CliResult};
use crate::output::OutputFormat;

pub mod call;
pub mod emulate;
pub mod link;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Call an rpc on a device over a socket link.
    Call(CallArgs),
    /// Check a device link with a heartbeat byte.
    Heartbeat(LinkArgs),
    /// Reset a device link.
    Reset(LinkArgs),
    /// Call an rpc on the built-in emulated device.
    Emulate(EmulateArgs),
    /// Serve the built-in emulated device on a Unix socket.
    Serve(ServeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Call(args) => call::run(args, format),
        Command::Heartbeat(args) => link::heartbeat(args, format),
        Command::Reset(args) => link::reset(args, format),
        Command::Emulate(args) => emulate::run(args, format),
        Command::Serve(args) => serve::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Address, rpc id, formats and arguments shared by `call` and `emulate`.
#[derive(Args, Debug)]
pub struct RpcArgs {
    /// Tile address (decimal or 0x-prefixed hex).
    #[arg(value_parser = parse_address)]
    pub address: u8,
    /// Rpc id (decimal or 0x-prefixed hex), e.g. 0x8000.
    #[arg(value_parser = parse_rpc_id)]
    pub rpc_id: u16,
    /// Argument format, e.g. LL.
    #[arg(long, value_name = "FORMAT")]
    pub arg_format: Option<String>,
    /// Result format, e.g. L or 6s.
    #[arg(long, value_name = "FORMAT")]
    pub result_format: Option<String>,
    /// Argument value, repeated once per value. Integers are decimal or
    /// 0x hex; byte strings are 0x hex or plain text.
    #[arg(long = "arg", value_name = "VALUE", allow_hyphen_values = true)]
    pub args: Vec<String>,
    /// Call deadline (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Unix socket path or tcp://host:port.
    pub target: String,
    #[command(flatten)]
    pub call: RpcArgs,
}

#[derive(Args, Debug)]
pub struct LinkArgs {
    /// Unix socket path or tcp://host:port.
    pub target: String,
    /// Read timeout (e.g. 2s, 500ms).
    #[arg(long, default_value = "2s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct EmulateArgs {
    #[command(flatten)]
    pub call: RpcArgs,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Socket path to bind.
    pub path: PathBuf,
    /// Deadline applied to each served call (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub call_timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::usage("duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::usage(format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::usage("duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

fn parse_unsigned(input: &str) -> Result<u64, String> {
    let parsed = match input.strip_prefix("0x").or_else(|| input.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => input.parse(),
    };
    parsed.map_err(|_| format!("invalid number: {input}"))
}

fn parse_address(input: &str) -> Result<u8, String> {
    let value = parse_unsigned(input)?;
    u8::try_from(value).map_err(|_| format!("address must be 0-255, got {value}"))
}

fn parse_rpc_id(input: &str) -> Result<u16, String> {
    let value = parse_unsigned(input)?;
    u16::try_from(value).map_err(|_| format!("rpc id must be 0-0xffff, got {value}"))
}

pub fn parse_format(flag: &str, text: &str) -> CliResult<FormatString> {
    FormatString::parse(text).map_err(|err| CliError::usage(format!("--{flag}: {err}")))
}

/// Convert textual `--arg` values into typed values following `format`.
pub fn parse_values(format: &FormatString, raw: &[String]) -> CliResult<Vec<Value>> {
    let codes: Vec<FormatCode> = format
        .codes()
        .iter()
        .copied()
        .filter(|code| code.takes_value())
        .collect();
    if codes.len() != raw.len() {
        return Err(CliError::usage(format!(
            "format {format:?} takes {} argument(s), got {}",
            codes.len(),
            raw.len()
        )));
    }
    codes
        .iter()
        .zip(raw)
        .map(|(code, text)| parse_value(*code, text))
        .collect()
}

fn parse_value(code: FormatCode, text: &str) -> CliResult<Value> {
    let invalid = || CliError::usage(format!("invalid {code} argument: {text}"));
    match code {
        FormatCode::Bytes(_) => match text.strip_prefix("0x") {
            Some(hex) => decode_hex(hex).map(Value::from).ok_or_else(invalid),
            None => Ok(Value::from(text)),
        },
        _ => {
            let (negative, digits) = match text.strip_prefix('-') {
                Some(rest) => (true, rest),
                None => (false, text),
            };
            let magnitude = parse_unsigned(digits).map_err(|_| invalid())?;
            let magnitude = i64::try_from(magnitude).map_err(|_| invalid())?;
            Ok(Value::Int(if negative { -magnitude } else { magnitude }))
        }
    }
}

fn decode_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| hex.get(i..i + 2).and_then(|pair| u8::from_str_radix(pair, 16).ok()))
        .collect()
}

/// Open a byte link to `target`: `tcp://host:port` or a Unix socket path.
pub fn connect_target(target: &str, read_timeout: Duration) -> CliResult<Box<dyn ByteTransport>> {
    let context = format!("connect to {target} failed");
    if let Some(addr) = target.strip_prefix("tcp://") {
        let link = TcpLink::connect(addr, Some(read_timeout), Some(read_timeout))
            .map_err(|err| transport_error(&context, err))?;
        return Ok(Box::new(link));
    }

    #[cfg(unix)]
    {
        let link = tilerpc_transport::UnixDomainSocket::connect(
            target,
            Some(read_timeout),
            Some(read_timeout),
        )
        .map_err(|err| transport_error(&context, err))?;
        Ok(Box::new(link))
    }

    #[cfg(not(unix))]
    Err(CliError::usage(format!(
        "{target}: only tcp:// targets are supported on this platform"
    )))
}
