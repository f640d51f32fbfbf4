use std::time::Duration;

use clap::Args;

use crate::cache::{DEFAULT_CAPACITY, DEFAULT_TTL};
use crate::fanout::DEFAULT_FANOUT_LIMIT;
use crate::optimized::DEFAULT_STATS_SCAN_LIMIT;
use crate::raw::DEFAULT_FIELD_SCAN_LIMIT;

/// Runtime settings shared by every command.
#[derive(Debug, Clone, Args)]
pub struct Settings {
    /// Postgres connection string for the document store
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    #[arg(long, env = "SMART_ATTEND_MAX_CONNECTIONS", default_value_t = 5)]
    pub max_connections: u32,

    /// Concurrent sub-queries per fan-out batch
    #[arg(long, env = "SMART_ATTEND_FANOUT_LIMIT", default_value_t = DEFAULT_FANOUT_LIMIT)]
    pub fanout_limit: usize,

    #[arg(long, env = "SMART_ATTEND_CACHE_TTL_SECS", default_value_t = DEFAULT_TTL.as_secs())]
    pub cache_ttl_secs: u64,

    #[arg(long, env = "SMART_ATTEND_CACHE_CAPACITY", default_value_t = DEFAULT_CAPACITY)]
    pub cache_capacity: usize,

    /// Stats documents read per month before client-side filtering
    #[arg(long, env = "SMART_ATTEND_STATS_SCAN_LIMIT", default_value_t = DEFAULT_STATS_SCAN_LIMIT)]
    pub stats_scan_limit: usize,

    /// Raw records sampled when listing distinct subjects or groups
    #[arg(long, env = "SMART_ATTEND_FIELD_SCAN_LIMIT", default_value_t = DEFAULT_FIELD_SCAN_LIMIT)]
    pub field_scan_limit: usize,

    /// tracing filter directive, e.g. `smart_attend=debug`
    #[arg(long, env = "SMART_ATTEND_LOG", default_value = "info")]
    pub log_filter: String,
}

impl Settings {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}
