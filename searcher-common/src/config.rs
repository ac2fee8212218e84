//! Shared configuration fragments, embedded by each binary's own `Config`.

use std::str::FromStr;
use std::time;

use envconfig::Envconfig;

/// Millisecond duration read from an environment variable.
#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;
        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

/// A non-empty string, used for configuration values that must not be blank.
#[derive(Debug, Clone)]
pub struct NonEmptyString(pub String);

impl NonEmptyString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct StringIsEmptyError;

impl FromStr for NonEmptyString {
    type Err = StringIsEmptyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            Err(StringIsEmptyError)
        } else {
            Ok(NonEmptyString(s.to_owned()))
        }
    }
}

/// A comma-separated list of worker base URLs, trailing slashes stripped.
#[derive(Debug, Clone)]
pub struct WorkerBaseUrls(pub Vec<String>);

#[derive(Debug, PartialEq, Eq)]
pub struct EmptyWorkerListError;

impl FromStr for WorkerBaseUrls {
    type Err = EmptyWorkerListError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let urls: Vec<String> = s
            .split(',')
            .map(|u| u.trim().trim_end_matches('/').to_owned())
            .filter(|u| !u.is_empty())
            .collect();

        if urls.is_empty() {
            Err(EmptyWorkerListError)
        } else {
            Ok(WorkerBaseUrls(urls))
        }
    }
}

/// Configuration shared by every binary: Redis connection, worker pool,
/// TTLs, per-call timeouts, and retry parameters. See `spec.md` §4.H.
#[derive(Envconfig, Clone)]
pub struct CoreConfig {
    #[envconfig(from = "REDIS_URL")]
    pub redis_url: String,

    #[envconfig(from = "WORKER_BASE_URLS")]
    pub worker_base_urls: WorkerBaseUrls,

    #[envconfig(from = "JOB_RESULTS_TTL_SEC", default = "86400")]
    pub job_results_ttl_sec: u64,

    #[envconfig(from = "CACHE_TTL_SEC", default = "604800")]
    pub cache_ttl_sec: u64,

    #[envconfig(from = "WORKER_HEALTH", default = "7000")]
    pub worker_health_timeout: EnvMsDuration,

    #[envconfig(from = "WORKER_SEARCH", default = "30000")]
    pub worker_search_timeout: EnvMsDuration,

    #[envconfig(from = "WORKER_WARMUP", default = "20000")]
    pub worker_warmup_timeout: EnvMsDuration,

    #[envconfig(from = "WORKER_RESTART", default = "15000")]
    pub worker_restart_timeout: EnvMsDuration,

    #[envconfig(from = "WORKER_REFRESH", default = "15000")]
    pub worker_refresh_timeout: EnvMsDuration,

    #[envconfig(from = "BULL_SEARCH", default = "60000")]
    pub job_deadline: EnvMsDuration,

    #[envconfig(from = "BULL_BULK", default = "3600000")]
    pub bulk_deadline: EnvMsDuration,

    #[envconfig(from = "MAX_ATTEMPTS", default = "3")]
    pub max_attempts: u32,

    #[envconfig(from = "INITIAL_DELAY", default = "1000")]
    pub initial_delay: EnvMsDuration,

    #[envconfig(from = "MAX_DELAY", default = "30000")]
    pub max_delay: EnvMsDuration,

    #[envconfig(from = "WAIT_FOR_WORKER_MAX", default = "300000")]
    pub wait_for_worker_max: EnvMsDuration,

    #[envconfig(from = "HEALTH_CHECK_INTERVAL", default = "5000")]
    pub health_check_interval: EnvMsDuration,
}

/// Fixed 2 second re-probe interval used by the dispatcher's dynamic
/// selection loop when no worker is free. Not configurable: spec.md §4.C
/// specifies this as a constant, separate from the job-level retry backoff.
pub const DISPATCH_RETRY_DELAY: time::Duration = time::Duration::from_secs(2);

/// Dispatcher attempt budget multiplier (acts as a circuit breaker).
pub const DISPATCH_ATTEMPT_MULTIPLIER: u32 = 10;

/// Stall detection parameters (spec.md §4.D).
pub const STALLED_INTERVAL: time::Duration = time::Duration::from_secs(30);
pub const MAX_STALLED_COUNT: u32 = 10;

/// How often a runner must refresh a reserved job's `queue:active` score
/// while a dispatch is still in flight. Kept comfortably below
/// `STALLED_INTERVAL` so a legitimately long-running dispatch (up to the
/// per-job deadline) is never mistaken for an abandoned reservation.
pub const ACTIVE_HEARTBEAT_INTERVAL: time::Duration = time::Duration::from_secs(10);
