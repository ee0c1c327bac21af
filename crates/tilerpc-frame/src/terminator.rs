//! Sentinel bytes of the frame protocol.

use crate::error::FrameError;

/// Heartbeat byte; the device echoes it back.
pub const HEARTBEAT: u8 = 0xFF;

/// Reset request.
pub const RESET: u8 = 0x00;

/// Reply to [`RESET`].
pub const RESET_ACK: u8 = 0x01;

/// The byte that closes a response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Terminator {
    /// Command succeeded.
    Ack = 0x06,
    /// Command failed.
    Nack = 0x15,
}

impl Terminator {
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn is_terminator(byte: u8) -> bool {
        Self::try_from(byte).is_ok()
    }
}

impl TryFrom<u8> for Terminator {
    type Error = FrameError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            0x06 => Ok(Terminator::Ack),
            0x15 => Ok(Terminator::Nack),
            other => Err(FrameError::InvalidTerminator(other)),
        }
    }
}
