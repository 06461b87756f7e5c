//! Runtime configuration for a [`crate::Log`].

/// Tunables governing segment rollover and fsync cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Roll over to a new segment once an append leaves the active segment
    /// larger than this many bytes.
    pub max_segment_size: u64,
    /// Auto-sync once an appended offset exceeds the last synced offset by
    /// more than this many records. Negative disables auto-sync entirely.
    pub max_sync_lag: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_segment_size: 256 * 1024 * 1024,
            max_sync_lag: -1,
        }
    }
}
