/// Default upper bound on bytes buffered while searching for a terminator.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// Configuration for frame exchange.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum bytes accepted before a terminator. Default: 64 KiB.
    pub max_frame_size: usize,
    /// Read timeout to apply to transports that support it. A read that
    /// waits longer than this is a transport timeout.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout to apply to transports that support it.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            read_timeout: Some(std::time::Duration::from_secs(2)),
            write_timeout: Some(std::time::Duration::from_secs(2)),
        }
    }
}
