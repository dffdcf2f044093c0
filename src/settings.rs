//! Runtime settings.
//!
//! Loaded from an optional TOML file and `SENSORWATCH_*` environment
//! variables, environment taking precedence:
//!
//! ```toml
//! mode = "live"
//! api_base = "http://127.0.0.1:5000"
//! push_addr = "127.0.0.1:7000"
//! poll_interval = "5s"
//! staleness_timeout = "8s"
//! rearm_delay = "9s"
//! chart_capacity = 50
//! table_capacity = 20
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::data::duration::parse_duration;
use crate::data::{CHART_CAPACITY, TABLE_CAPACITY};
use crate::engine::{Mode, SessionConfig};

const ENV_PREFIX: &str = "SENSORWATCH";

/// Settings as read from file and environment. Durations stay as text until
/// [`Settings::session_config`] parses them.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub mode: Mode,
    pub api_base: String,
    /// `host:port` of the push feed, if any.
    pub push_addr: Option<String>,
    pub poll_interval: String,
    pub staleness_timeout: String,
    pub rearm_delay: String,
    pub chart_capacity: usize,
    pub table_capacity: usize,
    pub request_timeout: String,
    /// Seed the roster from `/api/devices` at startup.
    pub bootstrap: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mode: Mode::Summary,
            api_base: "http://127.0.0.1:5000".to_string(),
            push_addr: None,
            poll_interval: "5s".to_string(),
            staleness_timeout: "8s".to_string(),
            rearm_delay: "9s".to_string(),
            chart_capacity: CHART_CAPACITY,
            table_capacity: TABLE_CAPACITY,
            request_timeout: "10s".to_string(),
            bootstrap: true,
        }
    }
}

impl Settings {
    /// Load settings, optionally from a file, then from the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let config = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .context("Failed to read settings")?;

        config
            .try_deserialize()
            .context("Invalid settings")
    }

    /// Check that the settings describe a usable session.
    pub fn validate(&self) -> Result<()> {
        self.session_config().map(|_| ())
    }

    /// Parse and validate into a [`SessionConfig`].
    pub fn session_config(&self) -> Result<SessionConfig> {
        let poll_interval = parse_field("poll_interval", &self.poll_interval)?;
        let staleness_timeout = parse_field("staleness_timeout", &self.staleness_timeout)?;
        let rearm_delay = parse_field("rearm_delay", &self.rearm_delay)?;

        if self.chart_capacity == 0 || self.table_capacity == 0 {
            bail!("History capacities must be greater than zero");
        }
        if poll_interval.is_zero() {
            bail!("poll_interval must be greater than zero");
        }
        if staleness_timeout.is_zero() {
            bail!("staleness_timeout must be greater than zero");
        }
        if rearm_delay < staleness_timeout {
            bail!(
                "rearm_delay ({}) must not be shorter than staleness_timeout ({})",
                self.rearm_delay,
                self.staleness_timeout
            );
        }

        Ok(SessionConfig {
            mode: self.mode,
            poll_interval,
            staleness_timeout,
            rearm_delay,
            chart_capacity: self.chart_capacity,
            table_capacity: self.table_capacity,
        })
    }

    pub fn request_timeout(&self) -> Result<Duration> {
        parse_field("request_timeout", &self.request_timeout)
    }
}

fn parse_field(name: &str, value: &str) -> Result<Duration> {
    parse_duration(value).with_context(|| format!("Invalid {}", name))
}
