use std::fmt;

use bytes::Bytes;
use tilerpc_format::Value;

use crate::error::{FrameError, Result};

/// Status byte: success, followed by a length-prefixed payload.
pub const STATUS_OK: u8 = 0;

/// Status byte: application error, followed by a message up to the
/// terminator.
pub const STATUS_ERROR: u8 = 254;

/// Largest rpc result payload; the response carries its length in one byte.
pub const MAX_RPC_PAYLOAD: usize = u8::MAX as usize;

/// An rpc request line: `rpc <address> <feature> <command> [args...]`.
///
/// Integer arguments are rendered in decimal; byte-string arguments as
/// `0x`-prefixed lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcCommand {
    pub address: u8,
    pub feature: u8,
    pub command: u8,
    pub args: Vec<Value>,
}

impl RpcCommand {
    /// Build a command from a 16-bit rpc id (feature in the high byte).
    pub fn new(address: u8, rpc_id: u16, args: Vec<Value>) -> Self {
        let [feature, command] = rpc_id.to_be_bytes();
        Self {
            address,
            feature,
            command,
            args,
        }
    }

    /// The combined 16-bit rpc id.
    pub fn rpc_id(&self) -> u16 {
        u16::from_be_bytes([self.feature, self.command])
    }

    /// Render as a newline-terminated command line.
    pub fn to_line(&self) -> String {
        let mut line = self.to_string();
        line.push('\n');
        line
    }

    /// Parse a command line (with or without the trailing newline).
    pub fn parse(line: &str) -> Result<Self> {
        let mut words = line.split_ascii_whitespace();
        match words.next() {
            Some("rpc") => {}
            Some(other) => {
                return Err(FrameError::MalformedRequest(format!(
                    "unknown command {other:?}"
                )))
            }
            None => return Err(FrameError::MalformedRequest("empty command".to_string())),
        }

        let mut header = |name: &str| -> Result<u8> {
            let word = words
                .next()
                .ok_or_else(|| FrameError::MalformedRequest(format!("missing {name}")))?;
            word.parse::<u8>()
                .map_err(|_| FrameError::MalformedRequest(format!("invalid {name} {word:?}")))
        };
        let address = header("address")?;
        let feature = header("feature")?;
        let command = header("command")?;

        let args = words.map(parse_arg).collect::<Result<Vec<_>>>()?;

        Ok(Self {
            address,
            feature,
            command,
            args,
        })
    }
}

impl fmt::Display for RpcCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rpc {} {} {}", self.address, self.feature, self.command)?;
        for arg in &self.args {
            match arg {
                Value::Int(v) => write!(f, " {v}")?,
                Value::Bytes(bytes) => {
                    f.write_str(" 0x")?;
                    for byte in bytes.iter() {
                        write!(f, "{byte:02x}")?;
                    }
                }
            }
        }
        Ok(())
    }
}

fn parse_arg(word: &str) -> Result<Value> {
    if let Some(hex) = word.strip_prefix("0x") {
        return parse_hex(hex).map(Value::from);
    }
    word.parse::<i64>()
        .map(Value::Int)
        .map_err(|_| FrameError::MalformedRequest(format!("invalid argument {word:?}")))
}

fn parse_hex(hex: &str) -> Result<Vec<u8>> {
    let invalid = || FrameError::MalformedRequest(format!("invalid hex argument 0x{hex}"));
    if hex.len() % 2 != 0 {
        return Err(invalid());
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            hex.get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(invalid)
        })
        .collect()
}

/// A parsed rpc response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcResponse {
    /// Status 0: the result payload.
    Ok(Bytes),
    /// Status 254: the device's error message.
    Error(String),
}
