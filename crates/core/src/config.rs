use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::breakdown::{DEFAULT_SLICES, MAX_SLICES};
use crate::error::{Result, TracexError};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub db_path: PathBuf,
    pub query_tcp_addr: String,
    pub query_http_addr: String,
    pub uds_path: PathBuf,
    pub default_slices: u32,
    pub max_spans_per_trace: usize,
    /// Upper bound on trace ids in a single `IN (...)` list.
    pub max_trace_ids_per_query: usize,
    pub discovery_chunk: Duration,
    pub default_window: Duration,
    pub query_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        let xdg_runtime = env::var("XDG_RUNTIME_DIR").ok();
        let data_home = env::var("XDG_DATA_HOME").ok();

        let data_root = data_home
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(home).join(".local/share"));

        let uds_path = xdg_runtime
            .map(PathBuf::from)
            .unwrap_or_else(|| data_root.join("tracex"))
            .join("tracex.sock");

        Self {
            db_path: data_root.join("tracex/tracex.duckdb"),
            query_tcp_addr: "127.0.0.1:1787".to_string(),
            query_http_addr: "127.0.0.1:1788".to_string(),
            uds_path,
            default_slices: DEFAULT_SLICES,
            max_spans_per_trace: 1,
            max_trace_ids_per_query: 100,
            discovery_chunk: Duration::from_secs(60 * 60),
            default_window: Duration::from_secs(60 * 60 * 24),
            query_timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut cfg = Self::default();
        let config_path = config_file_path();
        if let Some(file_overrides) = load_file_overrides(&config_path)? {
            apply_overrides(&mut cfg, file_overrides, "config file")?;
        }
        let env_overrides = load_env_overrides()?;
        apply_overrides(&mut cfg, env_overrides, "environment")?;
        Ok(cfg)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigOverrides {
    db_path: Option<PathBuf>,
    query_tcp_addr: Option<String>,
    query_http_addr: Option<String>,
    uds_path: Option<PathBuf>,
    default_slices: Option<u32>,
    max_spans_per_trace: Option<usize>,
    max_trace_ids_per_query: Option<usize>,
    discovery_chunk: Option<String>,
    default_window: Option<String>,
    query_timeout: Option<String>,
}

fn config_file_path() -> PathBuf {
    if let Ok(path) = env::var("TRACEX_CONFIG") {
        return PathBuf::from(path);
    }

    let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let config_home = env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(home).join(".config"));
    config_home.join("tracex/config.toml")
}

fn load_file_overrides(path: &PathBuf) -> Result<Option<ConfigOverrides>> {
    if !path.exists() {
        return Ok(None);
    }

    let raw = fs::read_to_string(path)
        .map_err(|e| TracexError::Config(format!("failed reading {}: {e}", path.display())))?;
    let parsed: ConfigOverrides = toml::from_str(&raw)
        .map_err(|e| TracexError::Config(format!("failed parsing {}: {e}", path.display())))?;
    Ok(Some(parsed))
}

fn load_env_overrides() -> Result<ConfigOverrides> {
    Ok(ConfigOverrides {
        db_path: env::var("TRACEX_DB_PATH").ok().map(PathBuf::from),
        query_tcp_addr: env::var("TRACEX_QUERY_TCP_ADDR").ok(),
        query_http_addr: env::var("TRACEX_QUERY_HTTP_ADDR").ok(),
        uds_path: env::var("TRACEX_QUERY_UDS_PATH").ok().map(PathBuf::from),
        default_slices: env_number("TRACEX_DEFAULT_SLICES")?,
        max_spans_per_trace: env_number("TRACEX_MAX_SPANS_PER_TRACE")?,
        max_trace_ids_per_query: env_number("TRACEX_MAX_TRACE_IDS_PER_QUERY")?,
        discovery_chunk: env::var("TRACEX_DISCOVERY_CHUNK").ok(),
        default_window: env::var("TRACEX_DEFAULT_WINDOW").ok(),
        query_timeout: env::var("TRACEX_QUERY_TIMEOUT").ok(),
    })
}

fn env_number<T>(key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(v) => v
            .parse::<T>()
            .map(Some)
            .map_err(|e| TracexError::Config(format!("bad {key} in environment: {e}"))),
        Err(_) => Ok(None),
    }
}

fn apply_overrides(cfg: &mut Config, overrides: ConfigOverrides, source: &str) -> Result<()> {
    if let Some(v) = overrides.db_path {
        cfg.db_path = v;
    }
    if let Some(v) = overrides.query_tcp_addr {
        cfg.query_tcp_addr = v;
    }
    if let Some(v) = overrides.query_http_addr {
        cfg.query_http_addr = v;
    }
    if let Some(v) = overrides.uds_path {
        cfg.uds_path = v;
    }
    if let Some(v) = overrides.default_slices {
        if !(1..=MAX_SLICES).contains(&v) {
            return Err(TracexError::Config(format!(
                "bad default_slices in {source}: must be between 1 and {MAX_SLICES} (value={v})"
            )));
        }
        cfg.default_slices = v;
    }
    if let Some(v) = overrides.max_spans_per_trace {
        cfg.max_spans_per_trace = v;
    }
    if let Some(v) = overrides.max_trace_ids_per_query {
        if v == 0 {
            return Err(TracexError::Config(format!(
                "bad max_trace_ids_per_query in {source}: must be positive"
            )));
        }
        cfg.max_trace_ids_per_query = v;
    }
    if let Some(v) = overrides.discovery_chunk {
        cfg.discovery_chunk = parse_setting_duration(&v, "discovery_chunk", source)?;
    }
    if let Some(v) = overrides.default_window {
        cfg.default_window = parse_setting_duration(&v, "default_window", source)?;
    }
    if let Some(v) = overrides.query_timeout {
        cfg.query_timeout = parse_setting_duration(&v, "query_timeout", source)?;
    }
    Ok(())
}

fn parse_setting_duration(value: &str, name: &str, source: &str) -> Result<Duration> {
    humantime::parse_duration(value)
        .map_err(|e| TracexError::Config(format!("bad {name} in {source}: {e} (value={value})")))
}
