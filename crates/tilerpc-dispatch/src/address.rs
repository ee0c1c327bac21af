use std::fmt;

/// Address of a tile on the bus.
pub type TileAddress = u8;

/// Address conventionally used by the device controller.
pub const CONTROLLER_ADDRESS: TileAddress = 8;

/// A 16-bit rpc identifier, unique within one tile.
///
/// The legacy encoding splits it into a feature (high byte) and a command
/// (low byte); both encodings name the same handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RpcId(pub u16);

impl RpcId {
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    pub const fn from_parts(feature: u8, command: u8) -> Self {
        Self(((feature as u16) << 8) | command as u16)
    }

    pub const fn feature(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub const fn command(self) -> u8 {
        (self.0 & 0xff) as u8
    }

    pub const fn get(self) -> u16 {
        self.0
    }
}

impl From<u16> for RpcId {
    fn from(id: u16) -> Self {
        Self(id)
    }
}

impl From<RpcId> for u16 {
    fn from(id: RpcId) -> Self {
        id.0
    }
}

impl fmt::Display for RpcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_encodings_agree() {
        let id = RpcId::from_parts(0x80, 0x02);
        assert_eq!(id, RpcId(0x8002));
        assert_eq!(id.feature(), 0x80);
        assert_eq!(id.command(), 0x02);
        assert_eq!(RpcId::from(0x0004), RpcId::from_parts(0, 4));
    }

    #[test]
    fn displays_as_hex() {
        assert_eq!(RpcId(0x8000).to_string(), "0x8000");
        assert_eq!(RpcId(4).to_string(), "0x0004");
    }
}
