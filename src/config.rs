//! Pipeline configuration and the optional config file.
//!
//! [`PipelineConfig`] holds every knob with its default. A config file in a
//! small `key = value` TOML subset can override any of them; command-line
//! flags are applied on top by the binary.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::extract::{DetailRules, DiscoveryRules};
use crate::fetch::{BODY_TIMEOUT_SECS, FetchSettings};
use crate::offload::DEFAULT_OFFLOAD_WORKERS;
use crate::queue::QueueNames;
use crate::task::Stage;

/// Default queue store.
pub const DEFAULT_STORE_URL: &str = "redis://127.0.0.1:6379/0";

/// Default sleep after an empty or failed dequeue.
pub const DEFAULT_IDLE_INTERVAL_SECS: u64 = 10;

/// Default interval between stats reports.
pub const DEFAULT_STATS_INTERVAL_SECS: u64 = 60;

/// Default time given to the offload pool to drain on stop.
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 10;

/// Default asset directory.
pub const DEFAULT_OUTPUT_DIR: &str = "images";

/// Errors loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file '{path}': {source}")]
    Read {
        /// The config file path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A line is not `key = value`.
    #[error("invalid config syntax on line {line}: expected key = value")]
    Syntax {
        /// 1-based line number.
        line: usize,
    },

    /// A key is not recognised.
    #[error("unknown configuration key: '{key}' on line {line}")]
    UnknownKey {
        /// The key.
        key: String,
        /// 1-based line number.
        line: usize,
    },

    /// A value does not have the key's type.
    #[error("invalid `{key}` value on line {line}: {message}")]
    InvalidValue {
        /// The key.
        key: String,
        /// 1-based line number.
        line: usize,
        /// What is wrong with the value.
        message: String,
    },

    /// A value is outside the accepted range.
    #[error("invalid config value for `{key}`: {value}. Expected range: {range}")]
    OutOfRange {
        /// The key.
        key: &'static str,
        /// The rejected value.
        value: u64,
        /// Human-readable accepted range.
        range: &'static str,
    },

    /// A resolved setting is unusable.
    #[error("invalid setting `{field}`: {message}")]
    Invalid {
        /// The setting.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },
}

/// Concurrency knobs of one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSettings {
    /// Number of worker loops.
    pub workers: usize,
    /// Fetches allowed in flight across the stage's workers.
    pub max_in_flight: usize,
}

impl StageSettings {
    /// Returns the defaults for `stage`.
    #[must_use]
    pub fn default_for(stage: Stage) -> Self {
        match stage {
            Stage::Discovery => Self {
                workers: 2,
                max_in_flight: 10,
            },
            Stage::Detail => Self {
                workers: 5,
                max_in_flight: 10,
            },
            Stage::Download => Self {
                workers: 40,
                max_in_flight: 40,
            },
        }
    }
}

/// Everything the pipeline needs to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Queue store URL (`redis://…`, `sqlite:PATH` or `memory`).
    pub store_url: String,
    /// Queue key per stage.
    pub queues: QueueNames,
    /// Discovery stage knobs.
    pub discovery: StageSettings,
    /// Detail stage knobs.
    pub detail: StageSettings,
    /// Download stage knobs.
    pub download: StageSettings,
    /// Sleep after an empty or failed dequeue.
    pub idle_interval: Duration,
    /// HTTP request settings.
    pub fetch: FetchSettings,
    /// Deadline for reading a response body.
    pub parse_timeout: Duration,
    /// Proxy source (`none`, `static:…` or `redis://…`).
    pub proxy: String,
    /// Offload pool size.
    pub offload_workers: usize,
    /// Root directory for downloaded assets.
    pub output_dir: PathBuf,
    /// Interval between stats reports.
    pub stats_interval: Duration,
    /// Time the offload pool gets to drain on stop.
    pub shutdown_grace: Duration,
    /// Listing page extraction rules.
    pub discovery_rules: DiscoveryRules,
    /// Detail page extraction rules.
    pub detail_rules: DetailRules,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            store_url: DEFAULT_STORE_URL.to_string(),
            queues: QueueNames::default(),
            discovery: StageSettings::default_for(Stage::Discovery),
            detail: StageSettings::default_for(Stage::Detail),
            download: StageSettings::default_for(Stage::Download),
            idle_interval: Duration::from_secs(DEFAULT_IDLE_INTERVAL_SECS),
            fetch: FetchSettings::default(),
            parse_timeout: Duration::from_secs(BODY_TIMEOUT_SECS),
            proxy: "none".to_string(),
            offload_workers: DEFAULT_OFFLOAD_WORKERS,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            stats_interval: Duration::from_secs(DEFAULT_STATS_INTERVAL_SECS),
            shutdown_grace: Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS),
            discovery_rules: DiscoveryRules::default(),
            detail_rules: DetailRules::default(),
        }
    }
}

impl PipelineConfig {
    /// Returns the knobs of `stage`.
    #[must_use]
    pub fn stage(&self, stage: Stage) -> StageSettings {
        match stage {
            Stage::Discovery => self.discovery,
            Stage::Detail => self.detail,
            Stage::Download => self.download,
        }
    }

    /// Returns a mutable reference to the knobs of `stage`.
    pub fn stage_mut(&mut self, stage: Stage) -> &mut StageSettings {
        match stage {
            Stage::Discovery => &mut self.discovery,
            Stage::Detail => &mut self.detail,
            Stage::Download => &mut self.download,
        }
    }

    /// Checks that the configuration can run a pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for the first unusable setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for stage in Stage::ALL {
            let settings = self.stage(stage);
            if settings.workers == 0 {
                return Err(ConfigError::Invalid {
                    field: "workers",
                    message: format!("{stage} stage needs at least one worker"),
                });
            }
            if settings.max_in_flight == 0 {
                return Err(ConfigError::Invalid {
                    field: "max_in_flight",
                    message: format!("{stage} stage needs at least one in-flight slot"),
                });
            }
        }

        let queues = [
            &self.queues.discovery,
            &self.queues.detail,
            &self.queues.download,
        ];
        if queues.iter().any(|q| q.is_empty()) {
            return Err(ConfigError::Invalid {
                field: "queues",
                message: "queue names must not be empty".to_string(),
            });
        }
        if queues[0] == queues[1] || queues[1] == queues[2] || queues[0] == queues[2] {
            return Err(ConfigError::Invalid {
                field: "queues",
                message: "each stage needs its own queue".to_string(),
            });
        }

        if self.offload_workers == 0 {
            return Err(ConfigError::Invalid {
                field: "offload_workers",
                message: "must be at least 1".to_string(),
            });
        }
        for (field, value) in [
            ("idle_interval", self.idle_interval),
            ("request_timeout", self.fetch.request_timeout),
            ("parse_timeout", self.parse_timeout),
            ("stats_interval", self.stats_interval),
        ] {
            if value.is_zero() {
                return Err(ConfigError::Invalid {
                    field,
                    message: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Supported config verbosity labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbositySetting {
    /// `info`
    Default,
    /// `debug`
    Verbose,
    /// `error`
    Quiet,
    /// `trace`
    Debug,
}

impl VerbositySetting {
    /// Returns the `tracing` filter level for this setting.
    #[must_use]
    pub fn filter_level(self) -> &'static str {
        match self {
            Self::Default => "info",
            Self::Verbose => "debug",
            Self::Quiet => "error",
            Self::Debug => "trace",
        }
    }
}

/// Values read from a config file. Unset keys keep their defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileConfig {
    /// `store`
    pub store_url: Option<String>,
    /// `discovery_queue`
    pub discovery_queue: Option<String>,
    /// `detail_queue`
    pub detail_queue: Option<String>,
    /// `download_queue`
    pub download_queue: Option<String>,
    /// `discovery_workers`
    pub discovery_workers: Option<usize>,
    /// `detail_workers`
    pub detail_workers: Option<usize>,
    /// `download_workers`
    pub download_workers: Option<usize>,
    /// `discovery_max_in_flight`
    pub discovery_max_in_flight: Option<usize>,
    /// `detail_max_in_flight`
    pub detail_max_in_flight: Option<usize>,
    /// `download_max_in_flight`
    pub download_max_in_flight: Option<usize>,
    /// `idle_interval_secs`
    pub idle_interval_secs: Option<u64>,
    /// `request_timeout_secs`
    pub request_timeout_secs: Option<u64>,
    /// `parse_timeout_secs`
    pub parse_timeout_secs: Option<u64>,
    /// `user_agent`
    pub user_agent: Option<String>,
    /// `proxy`
    pub proxy: Option<String>,
    /// `offload_workers`
    pub offload_workers: Option<usize>,
    /// `output_dir`
    pub output_dir: Option<PathBuf>,
    /// `stats_interval_secs`
    pub stats_interval_secs: Option<u64>,
    /// `verbosity`
    pub verbosity: Option<VerbositySetting>,
    /// `item_selector`
    pub item_selector: Option<String>,
    /// `thumbnail_selector`
    pub thumbnail_selector: Option<String>,
    /// `category_pattern`
    pub category_pattern: Option<String>,
    /// `thumbnail_pattern`
    pub thumbnail_pattern: Option<String>,
    /// `link_selector`
    pub link_selector: Option<String>,
    /// `resolution_pattern`
    pub resolution_pattern: Option<String>,
    /// `asset_url_template`
    pub asset_url_template: Option<String>,
}

impl FileConfig {
    /// Validates numeric values against their accepted ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::OutOfRange`] for the first value out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, value) in [
            ("discovery_workers", self.discovery_workers),
            ("detail_workers", self.detail_workers),
            ("download_workers", self.download_workers),
            ("discovery_max_in_flight", self.discovery_max_in_flight),
            ("detail_max_in_flight", self.detail_max_in_flight),
            ("download_max_in_flight", self.download_max_in_flight),
            ("offload_workers", self.offload_workers),
        ] {
            let value = value.map(|v| u64::try_from(v).unwrap_or(u64::MAX));
            validate_range(key, value, 1, 1000, "1..=1000")?;
        }
        validate_range(
            "idle_interval_secs",
            self.idle_interval_secs,
            1,
            3600,
            "1..=3600",
        )?;
        validate_range(
            "request_timeout_secs",
            self.request_timeout_secs,
            1,
            3600,
            "1..=3600",
        )?;
        validate_range(
            "parse_timeout_secs",
            self.parse_timeout_secs,
            1,
            3600,
            "1..=3600",
        )?;
        validate_range(
            "stats_interval_secs",
            self.stats_interval_secs,
            1,
            86_400,
            "1..=86400",
        )?;
        Ok(())
    }

    /// Overrides `config` with every value set in this file.
    pub fn apply_to(&self, config: &mut PipelineConfig) {
        if let Some(store_url) = &self.store_url {
            config.store_url.clone_from(store_url);
        }
        if let Some(queue) = &self.discovery_queue {
            config.queues.discovery.clone_from(queue);
        }
        if let Some(queue) = &self.detail_queue {
            config.queues.detail.clone_from(queue);
        }
        if let Some(queue) = &self.download_queue {
            config.queues.download.clone_from(queue);
        }
        for (stage, workers, max_in_flight) in [
            (
                Stage::Discovery,
                self.discovery_workers,
                self.discovery_max_in_flight,
            ),
            (Stage::Detail, self.detail_workers, self.detail_max_in_flight),
            (
                Stage::Download,
                self.download_workers,
                self.download_max_in_flight,
            ),
        ] {
            let settings = config.stage_mut(stage);
            if let Some(workers) = workers {
                settings.workers = workers;
            }
            if let Some(max_in_flight) = max_in_flight {
                settings.max_in_flight = max_in_flight;
            }
        }
        if let Some(secs) = self.idle_interval_secs {
            config.idle_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = self.request_timeout_secs {
            config.fetch.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.parse_timeout_secs {
            config.parse_timeout = Duration::from_secs(secs);
        }
        if let Some(user_agent) = &self.user_agent {
            config.fetch.user_agent.clone_from(user_agent);
        }
        if let Some(proxy) = &self.proxy {
            config.proxy.clone_from(proxy);
        }
        if let Some(workers) = self.offload_workers {
            config.offload_workers = workers;
        }
        if let Some(output_dir) = &self.output_dir {
            config.output_dir.clone_from(output_dir);
        }
        if let Some(secs) = self.stats_interval_secs {
            config.stats_interval = Duration::from_secs(secs);
        }

        let rules = &mut config.discovery_rules;
        for (value, target) in [
            (&self.item_selector, &mut rules.item_selector),
            (&self.thumbnail_selector, &mut rules.thumbnail_selector),
            (&self.category_pattern, &mut rules.category_pattern),
            (&self.thumbnail_pattern, &mut rules.thumbnail_pattern),
        ] {
            if let Some(value) = value {
                target.clone_from(value);
            }
        }
        let rules = &mut config.detail_rules;
        for (value, target) in [
            (&self.link_selector, &mut rules.link_selector),
            (&self.resolution_pattern, &mut rules.resolution_pattern),
            (&self.asset_url_template, &mut rules.asset_url_template),
        ] {
            if let Some(value) = value {
                target.clone_from(value);
            }
        }
    }
}

fn validate_range(
    key: &'static str,
    value: Option<u64>,
    min: u64,
    max: u64,
    range: &'static str,
) -> Result<(), ConfigError> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(min..=max).contains(&value) {
        return Err(ConfigError::OutOfRange { key, value, range });
    }
    Ok(())
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/crawler/config.toml`
/// 2. `$HOME/.config/crawler/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("crawler")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("crawler")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads the config file at `explicit`, or at the default path if present.
///
/// An explicit path must exist; a missing default file yields `Ok(None)`.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read or parsed.
pub fn load_file_config(explicit: Option<&Path>) -> Result<Option<FileConfig>, ConfigError> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match resolve_default_config_path() {
            Some(path) if path.exists() => path,
            _ => return Ok(None),
        },
    };

    let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
        path: path.clone(),
        source,
    })?;
    parse_config_str(&raw).map(Some)
}

/// Parses config file contents.
///
/// # Errors
///
/// Returns `ConfigError` for the first malformed line or out-of-range value.
pub fn parse_config_str(raw: &str) -> Result<FileConfig, ConfigError> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line_number = line_index + 1;
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            return Err(ConfigError::Syntax { line: line_number });
        };
        let key = raw_key.trim();
        let value = raw_value.trim();
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            line: line_number,
            message,
        };

        match key {
            "store" => cfg.store_url = Some(parse_string_literal(value).map_err(invalid)?),
            "discovery_queue" => {
                cfg.discovery_queue = Some(parse_string_literal(value).map_err(invalid)?);
            }
            "detail_queue" => {
                cfg.detail_queue = Some(parse_string_literal(value).map_err(invalid)?);
            }
            "download_queue" => {
                cfg.download_queue = Some(parse_string_literal(value).map_err(invalid)?);
            }
            "discovery_workers" => {
                cfg.discovery_workers = Some(parse_usize(value).map_err(invalid)?);
            }
            "detail_workers" => cfg.detail_workers = Some(parse_usize(value).map_err(invalid)?),
            "download_workers" => {
                cfg.download_workers = Some(parse_usize(value).map_err(invalid)?);
            }
            "discovery_max_in_flight" => {
                cfg.discovery_max_in_flight = Some(parse_usize(value).map_err(invalid)?);
            }
            "detail_max_in_flight" => {
                cfg.detail_max_in_flight = Some(parse_usize(value).map_err(invalid)?);
            }
            "download_max_in_flight" => {
                cfg.download_max_in_flight = Some(parse_usize(value).map_err(invalid)?);
            }
            "idle_interval_secs" => {
                cfg.idle_interval_secs = Some(parse_integer_u64(value).map_err(invalid)?);
            }
            "request_timeout_secs" => {
                cfg.request_timeout_secs = Some(parse_integer_u64(value).map_err(invalid)?);
            }
            "parse_timeout_secs" => {
                cfg.parse_timeout_secs = Some(parse_integer_u64(value).map_err(invalid)?);
            }
            "user_agent" => cfg.user_agent = Some(parse_string_literal(value).map_err(invalid)?),
            "proxy" => cfg.proxy = Some(parse_string_literal(value).map_err(invalid)?),
            "offload_workers" => {
                cfg.offload_workers = Some(parse_usize(value).map_err(invalid)?);
            }
            "output_dir" => {
                cfg.output_dir = Some(PathBuf::from(
                    parse_string_literal(value).map_err(invalid)?,
                ));
            }
            "stats_interval_secs" => {
                cfg.stats_interval_secs = Some(parse_integer_u64(value).map_err(invalid)?);
            }
            "verbosity" => {
                let label = parse_string_literal(value).map_err(invalid)?;
                cfg.verbosity = Some(parse_verbosity(&label).map_err(invalid)?);
            }
            "item_selector" => {
                cfg.item_selector = Some(parse_string_literal(value).map_err(invalid)?);
            }
            "thumbnail_selector" => {
                cfg.thumbnail_selector = Some(parse_string_literal(value).map_err(invalid)?);
            }
            "category_pattern" => {
                cfg.category_pattern = Some(parse_string_literal(value).map_err(invalid)?);
            }
            "thumbnail_pattern" => {
                cfg.thumbnail_pattern = Some(parse_string_literal(value).map_err(invalid)?);
            }
            "link_selector" => {
                cfg.link_selector = Some(parse_string_literal(value).map_err(invalid)?);
            }
            "resolution_pattern" => {
                cfg.resolution_pattern = Some(parse_string_literal(value).map_err(invalid)?);
            }
            "asset_url_template" => {
                cfg.asset_url_template = Some(parse_string_literal(value).map_err(invalid)?);
            }
            unknown => {
                return Err(ConfigError::UnknownKey {
                    key: unknown.to_string(),
                    line: line_number,
                });
            }
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

// Single-quoted literals are taken verbatim, which keeps regex backslashes readable.
fn parse_string_literal(raw_value: &str) -> Result<String, String> {
    let quoted = |q: char| raw_value.len() >= 2 && raw_value.starts_with(q) && raw_value.ends_with(q);
    if quoted('"') || quoted('\'') {
        return Ok(raw_value[1..raw_value.len() - 1].to_string());
    }
    Err("expected a quoted string".to_string())
}

fn parse_integer_u64(raw_value: &str) -> Result<u64, String> {
    let token = raw_value.trim();
    if token.is_empty() {
        return Err("expected integer value".to_string());
    }
    let value = token.parse::<i128>().map_err(|e| e.to_string())?;
    if value < 0 {
        return Err("expected non-negative integer".to_string());
    }
    u64::try_from(value).map_err(|_| "integer value out of range for u64".to_string())
}

fn parse_usize(raw_value: &str) -> Result<usize, String> {
    let value = parse_integer_u64(raw_value)?;
    usize::try_from(value).map_err(|_| "integer value out of range".to_string())
}

fn parse_verbosity(value: &str) -> Result<VerbositySetting, String> {
    match value {
        "default" => Ok(VerbositySetting::Default),
        "verbose" => Ok(VerbositySetting::Verbose),
        "quiet" => Ok(VerbositySetting::Quiet),
        "debug" => Ok(VerbositySetting::Debug),
        _ => Err(format!(
            "unknown verbosity '{value}', expected one of: default, verbose, quiet, debug"
        )),
    }
}
