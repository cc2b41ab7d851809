//! Configuration for message unpacking.

use std::time::Duration;

/// Default maximum number of forward hops unwrapped in one unpack call.
pub const DEFAULT_MAX_FORWARD_HOPS: usize = 8;

/// Configuration options for the unpacking side of a [`crate::MessagePacker`].
#[derive(Debug, Clone)]
pub struct UnpackConfig {
    /// Maximum number of nested `forward` messages to unwrap before the
    /// call fails with a loop error.
    pub max_forward_hops: usize,

    /// Timeout applied to DID resolution. Applies only to resolution:
    /// once a cryptographic step has started it always runs to completion.
    pub resolve_timeout: Option<Duration>,
}

impl UnpackConfig {
    /// Creates a new UnpackConfig with default limits
    pub fn new() -> Self {
        Self {
            max_forward_hops: DEFAULT_MAX_FORWARD_HOPS,
            resolve_timeout: None,
        }
    }

    /// Sets the forward hop limit
    pub fn with_max_forward_hops(mut self, max_forward_hops: usize) -> Self {
        self.max_forward_hops = max_forward_hops;
        self
    }

    /// Sets the DID resolution timeout
    pub fn with_resolve_timeout(mut self, timeout: Duration) -> Self {
        self.resolve_timeout = Some(timeout);
        self
    }
}

impl Default for UnpackConfig {
    fn default() -> Self {
        Self::new()
    }
}
