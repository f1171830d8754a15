//! Jitter buffer configuration.

/// Per-channel jitter buffer settings. A value of `-1` means "use the
/// implementation default".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JitterBufferConfig {
    pub enabled: bool,
    pub max_size_ms: i32,
    pub resync_threshold_ms: i32,
    /// Implementation name; empty selects the default implementation.
    pub implementation: String,
    pub target_extra_ms: i32,
}

impl Default for JitterBufferConfig {
    fn default() -> Self {
        JitterBufferConfig {
            enabled: false,
            max_size_ms: -1,
            resync_threshold_ms: -1,
            implementation: String::new(),
            target_extra_ms: -1,
        }
    }
}
