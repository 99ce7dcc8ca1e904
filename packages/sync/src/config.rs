use anyhow::{bail, Context, Result};
use dotenvy::dotenv;
use secrecy::SecretString;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug)]
pub struct Config {
    pub database_url: String,
    pub feed: FeedSettings,
    pub registry: RegistrySettings,
    /// Six-field cron expression (seconds first)
    pub schedule: String,
    pub run_once: bool,
    pub sync: SyncSettings,
}

/// Primary feed connection.
#[derive(Debug)]
pub struct FeedSettings {
    pub base_url: String,
    pub token: SecretString,
}

/// Secondary registry connection (OAuth2 client credentials).
#[derive(Debug)]
pub struct RegistrySettings {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: SecretString,
    pub scope: String,
    pub api_url: String,
}

/// Batch size, concurrency cap and post-batch pause of one concurrent stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageLimits {
    pub batch_size: usize,
    pub max_parallel: usize,
    pub pause: Duration,
}

impl StageLimits {
    pub const fn new(batch_size: usize, max_parallel: usize, pause: Duration) -> Self {
        Self {
            batch_size,
            max_parallel,
            pause,
        }
    }
}

/// What the reconciler does with persisted keys it could not re-verify
/// because their verification batch failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StaleKeyPolicy {
    /// Never delete a key that was not positively reported absent.
    #[default]
    KeepUnverified,
    /// Delete nothing when any verification batch was dropped.
    SkipIfDegraded,
    /// Treat unverified keys as absent.
    DeleteUnverified,
}

impl StaleKeyPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            StaleKeyPolicy::KeepUnverified => "keep_unverified",
            StaleKeyPolicy::SkipIfDegraded => "skip_if_degraded",
            StaleKeyPolicy::DeleteUnverified => "delete_unverified",
        }
    }
}

impl fmt::Display for StaleKeyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StaleKeyPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "keep_unverified" => Ok(StaleKeyPolicy::KeepUnverified),
            "skip_if_degraded" => Ok(StaleKeyPolicy::SkipIfDegraded),
            "delete_unverified" => Ok(StaleKeyPolicy::DeleteUnverified),
            other => bail!("unknown stale key policy: {}", other),
        }
    }
}

/// What happens to the stored media of a listing whose media lookup failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediaFailurePolicy {
    /// The listing is written without media; its stored media is removed.
    #[default]
    Clear,
    /// Stored media stays until a later lookup succeeds.
    KeepStored,
}

impl MediaFailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaFailurePolicy::Clear => "clear",
            MediaFailurePolicy::KeepStored => "keep_stored",
        }
    }
}

impl fmt::Display for MediaFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaFailurePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "clear" => Ok(MediaFailurePolicy::Clear),
            "keep_stored" => Ok(MediaFailurePolicy::KeepStored),
            other => bail!("unknown media failure policy: {}", other),
        }
    }
}

/// Pipeline tuning. Every field has a default suited to the public feed's
/// rate limits.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    /// Prefix of the watermark source names, e.g. `TRREB`.
    pub feed_name: String,
    /// An inactive feed is configured but never synced.
    pub feed_active: bool,
    /// `CountyOrParish` every fetched listing must match.
    pub jurisdiction: String,
    pub include_commercial: bool,
    pub page_size: u64,
    /// Soft ceiling on records fetched per category and run.
    pub max_records: u64,
    pub page_delay: Duration,
    pub existence: StageLimits,
    pub media: StageLimits,
    /// Pause after each per-listing media lookup inside a batch.
    pub media_key_pause: Duration,
    pub coordinates: StageLimits,
    pub persist_batch_size: usize,
    pub stale_key_policy: StaleKeyPolicy,
    pub media_failure_policy: MediaFailurePolicy,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            feed_name: "TRREB".to_string(),
            feed_active: true,
            jurisdiction: "Ottawa".to_string(),
            include_commercial: false,
            page_size: 5000,
            max_records: 100_000,
            page_delay: Duration::from_secs(1),
            existence: StageLimits::new(10, 10, Duration::from_millis(100)),
            media: StageLimits::new(20, 8, Duration::from_millis(100)),
            media_key_pause: Duration::from_millis(50),
            coordinates: StageLimits::new(50, 4, Duration::from_millis(100)),
            persist_batch_size: 500,
            stale_key_policy: StaleKeyPolicy::KeepUnverified,
            media_failure_policy: MediaFailurePolicy::Clear,
        }
    }
}

impl SyncSettings {
    /// Build settings from a variable lookup, falling back to defaults for
    /// anything unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let settings = Self {
            feed_name: get("FEED_NAME").unwrap_or(defaults.feed_name),
            feed_active: flag_or(&get, "FEED_ACTIVE", defaults.feed_active)?,
            jurisdiction: get("FEED_JURISDICTION").unwrap_or(defaults.jurisdiction),
            include_commercial: flag_or(&get, "FEED_INCLUDE_COMMERCIAL", defaults.include_commercial)?,
            page_size: parse_or(&get, "SYNC_PAGE_SIZE", defaults.page_size)?,
            max_records: parse_or(&get, "SYNC_MAX_RECORDS", defaults.max_records)?,
            page_delay: millis_or(&get, "SYNC_PAGE_DELAY_MS", defaults.page_delay)?,
            existence: StageLimits {
                batch_size: parse_or(&get, "SYNC_EXISTENCE_BATCH_SIZE", defaults.existence.batch_size)?,
                max_parallel: parse_or(&get, "SYNC_EXISTENCE_PARALLEL", defaults.existence.max_parallel)?,
                pause: millis_or(&get, "SYNC_EXISTENCE_PAUSE_MS", defaults.existence.pause)?,
            },
            media: StageLimits {
                batch_size: parse_or(&get, "SYNC_MEDIA_BATCH_SIZE", defaults.media.batch_size)?,
                max_parallel: parse_or(&get, "SYNC_MEDIA_PARALLEL", defaults.media.max_parallel)?,
                pause: millis_or(&get, "SYNC_MEDIA_PAUSE_MS", defaults.media.pause)?,
            },
            media_key_pause: millis_or(&get, "SYNC_MEDIA_KEY_PAUSE_MS", defaults.media_key_pause)?,
            coordinates: StageLimits {
                batch_size: parse_or(&get, "SYNC_COORDINATE_BATCH_SIZE", defaults.coordinates.batch_size)?,
                max_parallel: parse_or(&get, "SYNC_COORDINATE_PARALLEL", defaults.coordinates.max_parallel)?,
                pause: millis_or(&get, "SYNC_COORDINATE_PAUSE_MS", defaults.coordinates.pause)?,
            },
            persist_batch_size: parse_or(&get, "SYNC_PERSIST_BATCH_SIZE", defaults.persist_batch_size)?,
            stale_key_policy: match get("SYNC_STALE_KEY_POLICY") {
                Some(raw) => raw
                    .parse::<StaleKeyPolicy>()
                    .context("SYNC_STALE_KEY_POLICY")?,
                None => defaults.stale_key_policy,
            },
            media_failure_policy: match get("SYNC_MEDIA_FAILURE_POLICY") {
                Some(raw) => raw
                    .parse::<MediaFailurePolicy>()
                    .context("SYNC_MEDIA_FAILURE_POLICY")?,
                None => defaults.media_failure_policy,
            },
        };

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            bail!("SYNC_PAGE_SIZE must be greater than zero");
        }
        if self.persist_batch_size == 0 {
            bail!("SYNC_PERSIST_BATCH_SIZE must be greater than zero");
        }
        for (stage, limits) in [
            ("existence", &self.existence),
            ("media", &self.media),
            ("coordinate", &self.coordinates),
        ] {
            if limits.batch_size == 0 || limits.max_parallel == 0 {
                bail!(
                    "{} batch size and parallelism must be greater than zero",
                    stage
                );
            }
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            feed: FeedSettings {
                base_url: env::var("FEED_BASE_URL").context("FEED_BASE_URL must be set")?,
                token: SecretString::from(
                    env::var("FEED_TOKEN").context("FEED_TOKEN must be set")?,
                ),
            },
            registry: RegistrySettings {
                token_url: env::var("REGISTRY_TOKEN_URL")
                    .context("REGISTRY_TOKEN_URL must be set")?,
                client_id: env::var("REGISTRY_CLIENT_ID")
                    .context("REGISTRY_CLIENT_ID must be set")?,
                client_secret: SecretString::from(
                    env::var("REGISTRY_CLIENT_SECRET")
                        .context("REGISTRY_CLIENT_SECRET must be set")?,
                ),
                scope: env::var("REGISTRY_SCOPE").unwrap_or_else(|_| "DDFApi_Read".to_string()),
                api_url: env::var("REGISTRY_API_URL")
                    .context("REGISTRY_API_URL must be set")?,
            },
            schedule: env::var("SYNC_SCHEDULE").unwrap_or_else(|_| "0 5 * * * *".to_string()),
            run_once: flag_or(&|key: &str| env::var(key).ok(), "RUN_ONCE", false)?,
            sync: SyncSettings::from_lookup(|key| env::var(key).ok())?,
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a valid {}", key, std::any::type_name::<T>())),
        None => Ok(default),
    }
}

/// Boolean switch: `true`/`false`, `1`/`0`, `yes`/`no`, `on`/`off`.
fn flag_or<G>(get: &G, key: &str, default: bool) -> Result<bool>
where
    G: Fn(&str) -> Option<String>,
{
    let Some(raw) = get(key) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "" => Ok(default),
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => bail!("{} must be a boolean, got {}", key, other),
    }
}

fn millis_or<G>(get: &G, key: &str, default: Duration) -> Result<Duration>
where
    G: Fn(&str) -> Option<String>,
{
    let millis: u64 = parse_or(get, key, default.as_millis() as u64)?;
    Ok(Duration::from_millis(millis))
}
