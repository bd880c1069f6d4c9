//! Server configuration, loaded once at startup from a TOML file.
//!
//! Every key is optional; missing keys take the defaults below. The
//! resulting [`Config`] is passed explicitly to whatever needs it.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// All server settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Port for the order entry socket
    pub order_port: u16,
    /// Port for the market data socket
    pub price_port: u16,
    /// Port for FIX sessions (only bound when `use_fix`)
    pub fix_port: u16,
    pub bind_addr: String,

    /// Directory holding the audit log and match report
    pub log_dir: PathBuf,
    pub log_file: String,
    /// Also write one line per trade to `match_report_file`
    pub match_report: bool,
    pub match_report_file: String,

    /// Idle interval before a socket session is sent `PING`
    pub ping_ms: u64,

    /// Dark pool mode refuses all market data subscriptions
    pub dark_pool: bool,

    /// Poll the inbound order store
    pub use_db: bool,
    pub db_scan_secs: u64,
    pub db_inbound_file: PathBuf,
    pub db_trades_file: PathBuf,

    pub use_fix: bool,
    /// Customer used when a FIX order carries no Account (tag 1)
    pub default_fix_customer: String,

    /// Currency applied to orders that omit one
    pub default_currency: Option<String>,
    /// When set, only these symbols may trade
    pub valid_symbols: Option<Vec<String>>,
    /// Largest accepted order quantity; zero disables the check.
    /// Written as a string, e.g. `max_order_size = "1000"`.
    pub max_order_size: Decimal,

    /// Pin the engine thread to a dedicated core
    pub pin_engine_core: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            order_port: 2500,
            price_port: 2501,
            fix_port: 2502,
            bind_addr: "0.0.0.0".into(),
            log_dir: PathBuf::from("log"),
            log_file: "engine.log".into(),
            match_report: false,
            match_report_file: "match_reports.log".into(),
            ping_ms: 5000,
            dark_pool: false,
            use_db: false,
            db_scan_secs: 30,
            db_inbound_file: PathBuf::from("db/inbound_orders.csv"),
            db_trades_file: PathBuf::from("db/trades.csv"),
            use_fix: false,
            default_fix_customer: "FIX".into(),
            default_currency: None,
            valid_symbols: None,
            max_order_size: Decimal::ZERO,
            pin_engine_core: false,
        }
    }
}

impl Config {
    /// Load and validate a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate config TOML.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ping_ms == 0 {
            return Err(ConfigError::Invalid("ping_ms must be positive".into()));
        }
        if self.use_db && self.db_scan_secs == 0 {
            return Err(ConfigError::Invalid("db_scan_secs must be positive".into()));
        }
        if self.max_order_size < Decimal::ZERO {
            return Err(ConfigError::Invalid("max_order_size cannot be negative".into()));
        }
        if self.default_fix_customer.is_empty() {
            return Err(ConfigError::Invalid("default_fix_customer cannot be blank".into()));
        }
        if matches!(&self.default_currency, Some(c) if c.is_empty()) {
            return Err(ConfigError::Invalid("default_currency cannot be blank".into()));
        }

        let mut ports = vec![self.order_port, self.price_port];
        if self.use_fix {
            ports.push(self.fix_port);
        }
        ports.sort_unstable();
        if ports.windows(2).any(|pair| pair[0] == pair[1]) {
            return Err(ConfigError::Invalid("listener ports must be distinct".into()));
        }

        for port in &ports {
            self.socket_addr(*port)?;
        }
        Ok(())
    }

    /// Address for a listener on `port`.
    pub fn socket_addr(&self, port: u16) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.bind_addr, port)
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("bind address {}: {e}", self.bind_addr)))
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_ms)
    }

    pub fn db_scan_interval(&self) -> Duration {
        Duration::from_secs(self.db_scan_secs)
    }

    pub fn log_path(&self) -> PathBuf {
        self.log_dir.join(&self.log_file)
    }

    pub fn match_report_path(&self) -> PathBuf {
        self.log_dir.join(&self.match_report_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_gives_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.order_port, 2500);
        assert_eq!(config.price_port, 2501);
        assert_eq!(config.ping_interval(), Duration::from_millis(5000));
        assert_eq!(config.db_scan_interval(), Duration::from_secs(30));
        assert_eq!(config.default_fix_customer, "FIX");
        assert!(config.valid_symbols.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_toml(
            r#"
            order_port = 4000
            dark_pool = true
            default_currency = "USD"
            valid_symbols = ["ABC", "XYZ"]
            max_order_size = "1000"
            log_dir = "/tmp/midmatch"
            "#,
        )
        .unwrap();
        assert_eq!(config.order_port, 4000);
        assert!(config.dark_pool);
        assert_eq!(config.default_currency.as_deref(), Some("USD"));
        assert_eq!(config.valid_symbols, Some(vec!["ABC".to_string(), "XYZ".to_string()]));
        assert_eq!(config.max_order_size, Decimal::from(1000));
        assert_eq!(config.log_path(), PathBuf::from("/tmp/midmatch/engine.log"));
    }

    #[test]
    fn test_rejects_duplicate_ports() {
        let err = Config::from_toml("order_port = 2501").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_bad_bind_addr() {
        let err = Config::from_toml(r#"bind_addr = "not an address""#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_unparsable_toml() {
        let err = Config::from_toml("order_port = [").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_file(Path::new("/nonexistent/midmatch.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
