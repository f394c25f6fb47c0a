use std::time::Duration;

/// Default request timeout before abandoning a request to a non-responding peer.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(2000); // 2 seconds
pub const DEFAULT_BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_REPUBLISH_INTERVAL: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_EXPIRY_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_BUCKET_STALE_AFTER: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_HANDLER_THREADS: usize = 4;

#[derive(Debug, Clone)]
/// Session Configurations
pub struct Config {
    /// UDP request timeout duration.
    ///
    /// The longer this duration is, the longer lookups take to give up on dead peers.
    /// The shorter this duration is, the more responses from busy peers we miss out on,
    /// and the more live peers get evicted from the routing table.
    ///
    /// Defaults to [DEFAULT_REQUEST_TIMEOUT]
    pub request_timeout: Duration,
    /// How long startup keeps pinging the bootstrap peer before giving up.
    ///
    /// Defaults to [DEFAULT_BOOTSTRAP_TIMEOUT]
    pub bootstrap_timeout: Duration,
    /// Chunks not (re)published within this interval get republished.
    ///
    /// Defaults to [DEFAULT_REPUBLISH_INTERVAL]
    pub republish_interval: Duration,
    /// Chunks whose original publish time is older than this are deleted.
    ///
    /// Defaults to [DEFAULT_EXPIRY_TTL]
    pub expiry_ttl: Duration,
    /// How often the republish and expiry sweeps run.
    ///
    /// Defaults to [DEFAULT_SWEEP_INTERVAL]
    pub sweep_interval: Duration,
    /// How often buckets are checked for staleness.
    ///
    /// Defaults to [DEFAULT_REFRESH_INTERVAL]
    pub refresh_interval: Duration,
    /// A bucket without activity for this long is refreshed with a lookup.
    ///
    /// Defaults to [DEFAULT_BUCKET_STALE_AFTER]
    pub bucket_stale_after: Duration,
    /// Number of threads handling incoming requests.
    ///
    /// Defaults to [DEFAULT_HANDLER_THREADS]
    pub handler_threads: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            bootstrap_timeout: DEFAULT_BOOTSTRAP_TIMEOUT,
            republish_interval: DEFAULT_REPUBLISH_INTERVAL,
            expiry_ttl: DEFAULT_EXPIRY_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            bucket_stale_after: DEFAULT_BUCKET_STALE_AFTER,
            handler_threads: DEFAULT_HANDLER_THREADS,
        }
    }
}
