//! Argument and result payload codec for tile RPCs.
//!
//! Payloads are fixed-layout little-endian byte strings described by a
//! compact format string:
//!
//! | Code | Meaning | Width |
//! |------|---------|-------|
//! | `B` `H` `L` | unsigned 8/16/32-bit | 1/2/4 |
//! | `b` `h` `l` | signed 8/16/32-bit | 1/2/4 |
//! | `Ns` | fixed `N`-byte byte string | N |
//! | `x` | padding (zero on encode, skipped on decode) | 1 |
//!
//! The codec is stateless and knows nothing about tiles or RPC ids.

pub mod codec;
pub mod error;
pub mod format;
pub mod value;

pub use codec::{decode, encode};
pub use error::{DecodingError, EncodingError, FormatError};
pub use format::{FormatCode, FormatString, MAX_BYTE_STRING_LEN};
pub use value::Value;
