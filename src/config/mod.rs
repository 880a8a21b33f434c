//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, num::NonZeroU32, str::FromStr, time::Duration as StdDuration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use time::Duration;
use tracing::level_filters::LevelFilter;

mod cli;

pub use cli::{CliArgs, Command, DatabaseOverride, ServeArgs, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "reverie";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;

const DEFAULT_STALENESS_SECS: u64 = 600;
const DEFAULT_CACHE_CAPACITY: u32 = 200;
const DEFAULT_ENTRY_TTL_SECS: u64 = 48 * 3600;
const DEFAULT_LOOKBACK_HOURS: u64 = 72;
const DEFAULT_INTEREST_TAG_COUNT: u32 = 10;
const DEFAULT_PAGE_SIZE: u32 = 20;
const DEFAULT_MAX_PAGE_SIZE: u32 = 100;
const DEFAULT_FANOUT_BATCH: u32 = 500;

const DEFAULT_RECENCY_WEIGHT: f64 = 0.4;
const DEFAULT_INTEREST_WEIGHT: f64 = 0.3;
const DEFAULT_TRENDING_WEIGHT: f64 = 0.2;
const DEFAULT_AFFINITY_WEIGHT: f64 = 0.1;
const DEFAULT_RECENCY_HALF_LIFE_HOURS: f64 = 24.0;
const DEFAULT_AUTHOR_AFFINITY_BOOST: f64 = 0.2;

const DEFAULT_LIKE_WEIGHT: f64 = 1.0;
const DEFAULT_POST_WEIGHT: f64 = 2.0;
const DEFAULT_FOLLOW_WEIGHT: f64 = 0.5;
const DEFAULT_PROFILE_WEIGHT: f64 = 3.0;
const DEFAULT_LIKE_HALF_LIFE_DAYS: f64 = 14.0;
const DEFAULT_POST_HALF_LIFE_DAYS: f64 = 30.0;
const DEFAULT_FOLLOW_HALF_LIFE_DAYS: f64 = 21.0;
const DEFAULT_EPSILON: f64 = 0.01;
const DEFAULT_FOLLOW_TAG_COUNT: u32 = 5;
const DEFAULT_COMPACTION_INTERVAL_SECS: u64 = 3600;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub feed: FeedSettings,
    pub ranking: RankingSettings,
    pub interest: InterestSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: StdDuration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

/// `url = None` runs the engine over the in-memory stores.
#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct FeedSettings {
    pub staleness: Duration,
    pub cache_capacity: NonZeroU32,
    pub entry_ttl: Duration,
    pub lookback: Duration,
    pub interest_tag_count: NonZeroU32,
    pub default_page_size: NonZeroU32,
    pub max_page_size: NonZeroU32,
    pub fanout_batch: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct RankingSettings {
    pub recency_weight: f64,
    pub interest_weight: f64,
    pub trending_weight: f64,
    pub affinity_weight: f64,
    pub recency_half_life: Duration,
    pub author_affinity_boost: f64,
}

/// Half-lives of `None` never decay.
#[derive(Debug, Clone)]
pub struct InterestSettings {
    pub like_weight: f64,
    pub post_weight: f64,
    pub follow_weight: f64,
    pub profile_weight: f64,
    pub like_half_life: Option<Duration>,
    pub post_half_life: Option<Duration>,
    pub follow_half_life: Option<Duration>,
    pub profile_half_life: Option<Duration>,
    pub epsilon: f64,
    pub follow_tag_count: NonZeroU32,
    pub compaction_interval: StdDuration,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("REVERIE").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Compact(database)) | Some(Command::Migrate(database)) => {
            raw.apply_database_override(database)
        }
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    feed: RawFeedSettings,
    ranking: RawRankingSettings,
    interest: RawInterestSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(max) = overrides.database_max_connections {
            self.database.max_connections = Some(max);
        }
        if let Some(seconds) = overrides.feed_staleness_seconds {
            self.feed.staleness_seconds = Some(seconds);
        }
        if let Some(capacity) = overrides.feed_cache_capacity {
            self.feed.cache_capacity = Some(capacity);
        }
        if let Some(seconds) = overrides.interest_compaction_interval_seconds {
            self.interest.compaction_interval_seconds = Some(seconds);
        }
    }

    fn apply_database_override(&mut self, overrides: &DatabaseOverride) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            feed,
            ranking,
            interest,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            feed: build_feed_settings(feed)?,
            ranking: build_ranking_settings(ranking)?,
            interest: build_interest_settings(interest)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: StdDuration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let max_value = database
        .max_connections
        .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS);

    Ok(DatabaseSettings {
        url,
        max_connections: non_zero_u32(max_value.into(), "database.max_connections")?,
    })
}

fn build_feed_settings(feed: RawFeedSettings) -> Result<FeedSettings, LoadError> {
    let staleness = positive_seconds(
        feed.staleness_seconds.unwrap_or(DEFAULT_STALENESS_SECS),
        "feed.staleness_seconds",
    )?;
    let entry_ttl = positive_seconds(
        feed.entry_ttl_seconds.unwrap_or(DEFAULT_ENTRY_TTL_SECS),
        "feed.entry_ttl_seconds",
    )?;
    let lookback_hours = feed.lookback_hours.unwrap_or(DEFAULT_LOOKBACK_HOURS);
    let lookback = positive_seconds(
        lookback_hours.saturating_mul(3600),
        "feed.lookback_hours",
    )?;

    let cache_capacity = non_zero_u32(
        feed.cache_capacity.unwrap_or(DEFAULT_CACHE_CAPACITY).into(),
        "feed.cache_capacity",
    )?;
    let interest_tag_count = non_zero_u32(
        feed.interest_tag_count
            .unwrap_or(DEFAULT_INTEREST_TAG_COUNT)
            .into(),
        "feed.interest_tag_count",
    )?;
    let default_page_size = non_zero_u32(
        feed.default_page_size.unwrap_or(DEFAULT_PAGE_SIZE).into(),
        "feed.default_page_size",
    )?;
    let max_page_size = non_zero_u32(
        feed.max_page_size.unwrap_or(DEFAULT_MAX_PAGE_SIZE).into(),
        "feed.max_page_size",
    )?;
    if default_page_size > max_page_size {
        return Err(LoadError::invalid(
            "feed.default_page_size",
            "must not exceed feed.max_page_size",
        ));
    }
    let fanout_batch = non_zero_u32(
        feed.fanout_batch.unwrap_or(DEFAULT_FANOUT_BATCH).into(),
        "feed.fanout_batch",
    )?;

    Ok(FeedSettings {
        staleness,
        cache_capacity,
        entry_ttl,
        lookback,
        interest_tag_count,
        default_page_size,
        max_page_size,
        fanout_batch,
    })
}

fn build_ranking_settings(ranking: RawRankingSettings) -> Result<RankingSettings, LoadError> {
    let recency_weight = weight(
        ranking.recency_weight.unwrap_or(DEFAULT_RECENCY_WEIGHT),
        "ranking.recency_weight",
    )?;
    let interest_weight = weight(
        ranking.interest_weight.unwrap_or(DEFAULT_INTEREST_WEIGHT),
        "ranking.interest_weight",
    )?;
    let trending_weight = weight(
        ranking.trending_weight.unwrap_or(DEFAULT_TRENDING_WEIGHT),
        "ranking.trending_weight",
    )?;
    let affinity_weight = weight(
        ranking.affinity_weight.unwrap_or(DEFAULT_AFFINITY_WEIGHT),
        "ranking.affinity_weight",
    )?;
    let author_affinity_boost = weight(
        ranking
            .author_affinity_boost
            .unwrap_or(DEFAULT_AUTHOR_AFFINITY_BOOST),
        "ranking.author_affinity_boost",
    )?;

    let half_life_hours = ranking
        .recency_half_life_hours
        .unwrap_or(DEFAULT_RECENCY_HALF_LIFE_HOURS);
    if !half_life_hours.is_finite() || half_life_hours <= 0.0 {
        return Err(LoadError::invalid(
            "ranking.recency_half_life_hours",
            "must be a positive number of hours",
        ));
    }

    Ok(RankingSettings {
        recency_weight,
        interest_weight,
        trending_weight,
        affinity_weight,
        recency_half_life: Duration::seconds_f64(half_life_hours * 3600.0),
        author_affinity_boost,
    })
}

fn build_interest_settings(interest: RawInterestSettings) -> Result<InterestSettings, LoadError> {
    let epsilon = interest.epsilon.unwrap_or(DEFAULT_EPSILON);
    if !epsilon.is_finite() || epsilon <= 0.0 {
        return Err(LoadError::invalid(
            "interest.epsilon",
            "must be a positive number",
        ));
    }

    let compaction_secs = interest
        .compaction_interval_seconds
        .unwrap_or(DEFAULT_COMPACTION_INTERVAL_SECS);
    if compaction_secs == 0 {
        return Err(LoadError::invalid(
            "interest.compaction_interval_seconds",
            "must be greater than zero",
        ));
    }

    Ok(InterestSettings {
        like_weight: weight(
            interest.like_weight.unwrap_or(DEFAULT_LIKE_WEIGHT),
            "interest.like_weight",
        )?,
        post_weight: weight(
            interest.post_weight.unwrap_or(DEFAULT_POST_WEIGHT),
            "interest.post_weight",
        )?,
        follow_weight: weight(
            interest.follow_weight.unwrap_or(DEFAULT_FOLLOW_WEIGHT),
            "interest.follow_weight",
        )?,
        profile_weight: weight(
            interest.profile_weight.unwrap_or(DEFAULT_PROFILE_WEIGHT),
            "interest.profile_weight",
        )?,
        like_half_life: half_life_days(
            interest
                .like_half_life_days
                .or(Some(DEFAULT_LIKE_HALF_LIFE_DAYS)),
            "interest.like_half_life_days",
        )?,
        post_half_life: half_life_days(
            interest
                .post_half_life_days
                .or(Some(DEFAULT_POST_HALF_LIFE_DAYS)),
            "interest.post_half_life_days",
        )?,
        follow_half_life: half_life_days(
            interest
                .follow_half_life_days
                .or(Some(DEFAULT_FOLLOW_HALF_LIFE_DAYS)),
            "interest.follow_half_life_days",
        )?,
        profile_half_life: half_life_days(
            interest.profile_half_life_days,
            "interest.profile_half_life_days",
        )?,
        epsilon,
        follow_tag_count: non_zero_u32(
            interest
                .follow_tag_count
                .unwrap_or(DEFAULT_FOLLOW_TAG_COUNT)
                .into(),
            "interest.follow_tag_count",
        )?,
        compaction_interval: StdDuration::from_secs(compaction_secs),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawFeedSettings {
    staleness_seconds: Option<u64>,
    cache_capacity: Option<u32>,
    entry_ttl_seconds: Option<u64>,
    lookback_hours: Option<u64>,
    interest_tag_count: Option<u32>,
    default_page_size: Option<u32>,
    max_page_size: Option<u32>,
    fanout_batch: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRankingSettings {
    recency_weight: Option<f64>,
    interest_weight: Option<f64>,
    trending_weight: Option<f64>,
    affinity_weight: Option<f64>,
    recency_half_life_hours: Option<f64>,
    author_affinity_boost: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawInterestSettings {
    like_weight: Option<f64>,
    post_weight: Option<f64>,
    follow_weight: Option<f64>,
    profile_weight: Option<f64>,
    like_half_life_days: Option<f64>,
    post_half_life_days: Option<f64>,
    follow_half_life_days: Option<f64>,
    profile_half_life_days: Option<f64>,
    epsilon: Option<f64>,
    follow_tag_count: Option<u32>,
    compaction_interval_seconds: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn positive_seconds(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let seconds: i64 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range"))?;
    Ok(Duration::seconds(seconds))
}

fn weight(value: f64, key: &'static str) -> Result<f64, LoadError> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(LoadError::invalid(key, "must be finite and non-negative"))
    }
}

/// A zero or absent half-life disables decay for that source.
fn half_life_days(value: Option<f64>, key: &'static str) -> Result<Option<Duration>, LoadError> {
    match value {
        None => Ok(None),
        Some(days) if days == 0.0 => Ok(None),
        Some(days) if days.is_finite() && days > 0.0 => {
            Ok(Some(Duration::seconds_f64(days * 86_400.0)))
        }
        Some(_) => Err(LoadError::invalid(
            key,
            "must be a non-negative number of days",
        )),
    }
}
