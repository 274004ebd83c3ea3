//! Load balancer configuration
//!
//! Flags and an optional TOML file share one shape ([`StartArgs`]); flags win
//! over the file. [`StartArgs::validate`] turns the merged values into a
//! [`Config`] or fails startup with a [`ConfigError`].

use clap::Args;
use fleet_core::{Amount, FeeRate};
use fleet_network::PortRange;
use fleet_nodes::{SelectionStrategy, Whitelist, DEFAULT_PING_INTERVAL_THRESHOLD};
use fleet_payout::{Credential, PayoutConfig, DEFAULT_TRANSFER_TIMEOUT};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CAPACITY: i64 = -1;
pub const DEFAULT_FEE: f64 = 0.1;
pub const DEFAULT_SERVER_PORT: u16 = 80;
pub const DEFAULT_TUNNEL_SERVER_PORT: u16 = 5223;
pub const DEFAULT_PORT_RANGE: &str = "20000:30000";
pub const DEFAULT_LOG_LEVEL: &str = "error";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::InvalidConfiguration(msg.into())
}

/// Options of the `start` command, also the shape of the config file
#[derive(Args, Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct StartArgs {
    /// TOML file with default values for any of these options
    #[arg(long, value_name = "FILE")]
    #[serde(skip)]
    pub config: Option<PathBuf>,

    /// Maximum number of registered nodes, -1 for the whole tunnel port range
    #[arg(long, allow_hyphen_values = true)]
    pub capacity: Option<i64>,

    /// Comma separated ids of nodes allowed to connect
    #[arg(long, value_delimiter = ',')]
    pub whitelist: Option<Vec<String>>,

    /// File with one whitelisted node id per line
    #[arg(long, value_name = "FILE")]
    pub whitelist_file: Option<PathBuf>,

    /// Share of the reward pool kept by the load balancer (0 to 1)
    #[arg(long)]
    pub fee: Option<f64>,

    /// Node selection strategy: round-robin or random
    #[arg(long)]
    pub selection: Option<String>,

    /// Port of the HTTP API
    #[arg(long)]
    pub server_port: Option<u16>,

    /// Port nodes dial to open their tunnel
    #[arg(long)]
    pub tunnel_server_port: Option<u16>,

    /// Public tunnel server address advertised to nodes
    #[arg(long)]
    pub tunnel_server_address: Option<String>,

    /// Range of ports allocated to node tunnels, as min:max
    #[arg(long)]
    pub tunnel_port_range: Option<String>,

    /// Maximum seconds between two pings before a node is penalized
    #[arg(long)]
    pub ping_threshold_secs: Option<u64>,

    /// Directory of the persistent store; in-memory when unset
    #[arg(long, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(flatten)]
    #[serde(flatten)]
    pub payout: PayoutArgs,

    /// Log level: trace, debug, info, warn or error
    #[arg(long)]
    pub log_level: Option<String>,

    /// Write logs to this file instead of stdout
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,
}

/// Payout options shared by `start` and `payout`
#[derive(Args, Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PayoutArgs {
    /// Days between automatic payouts
    #[arg(long)]
    pub payout_interval: Option<u32>,

    /// Reward pool distributed on each payout
    #[arg(long)]
    pub payout_reward: Option<String>,

    /// Load balancer wallet paying the rewards
    #[arg(long)]
    pub lb_address: Option<String>,

    /// Separate destination for the load balancer fee
    #[arg(long)]
    pub fee_address: Option<String>,

    /// Secret used to sign payout transfers
    #[arg(long)]
    pub payout_secret: Option<String>,

    /// Program executing the transfers
    #[arg(long, value_name = "FILE")]
    pub payout_script: Option<PathBuf>,

    /// Seconds allowed for one payout transfer run
    #[arg(long)]
    pub transfer_timeout_secs: Option<u64>,
}

impl PayoutArgs {
    fn merge(self, file: PayoutArgs) -> PayoutArgs {
        PayoutArgs {
            payout_interval: self.payout_interval.or(file.payout_interval),
            payout_reward: self.payout_reward.or(file.payout_reward),
            lb_address: self.lb_address.or(file.lb_address),
            fee_address: self.fee_address.or(file.fee_address),
            payout_secret: self.payout_secret.or(file.payout_secret),
            payout_script: self.payout_script.or(file.payout_script),
            transfer_timeout_secs: self.transfer_timeout_secs.or(file.transfer_timeout_secs),
        }
    }

    fn is_requested(&self) -> bool {
        self.payout_interval.is_some() || self.payout_reward.is_some()
    }

    /// Validated payout settings; `interval_days` may be absent for a one-off
    /// run from the `payout` command
    pub fn validate(&self, require_interval: bool) -> Result<PayoutSettings, ConfigError> {
        let interval_days = match (self.payout_interval, require_interval) {
            (Some(days), _) => days,
            (None, false) => 1,
            (None, true) => return Err(invalid("payout interval is required")),
        };
        let reward = self
            .payout_reward
            .as_deref()
            .ok_or_else(|| invalid("payout reward is required"))?;
        let total_reward: Amount = reward
            .parse()
            .map_err(|e| invalid(format!("payout reward: {}", e)))?;
        let lb_address = self
            .lb_address
            .clone()
            .ok_or_else(|| invalid("lb address is required for payouts"))?;
        let secret = self
            .payout_secret
            .clone()
            .ok_or_else(|| invalid("payout secret is required for payouts"))?;
        let script = self
            .payout_script
            .clone()
            .ok_or_else(|| invalid("payout script is required for payouts"))?;
        let timeout = self
            .transfer_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TRANSFER_TIMEOUT);

        let mut config = PayoutConfig::new(
            interval_days,
            total_reward,
            lb_address,
            Credential::new(secret),
        )
        .with_transfer_timeout(timeout);
        if let Some(fee_address) = &self.fee_address {
            config = config.with_fee_address(fee_address.clone());
        }
        config
            .validate()
            .map_err(|e| invalid(e.to_string()))?;

        Ok(PayoutSettings { config, script })
    }
}

#[derive(Debug, Clone)]
pub struct PayoutSettings {
    pub config: PayoutConfig,
    pub script: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: String,
    pub file: Option<PathBuf>,
}

/// Validated configuration of a running load balancer
#[derive(Debug, Clone)]
pub struct Config {
    pub capacity: usize,
    pub whitelist: Whitelist,
    pub fee: FeeRate,
    pub selection: SelectionStrategy,
    pub server_port: u16,
    pub tunnel_server_port: u16,
    pub tunnel_server_address: Option<String>,
    pub port_range: PortRange,
    pub ping_threshold: Duration,
    pub data_dir: Option<PathBuf>,
    pub payout: Option<PayoutSettings>,
    pub log: LogSettings,
}

pub fn load_file(path: &Path) -> Result<StartArgs, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&contents)?)
}

pub fn validate_log_level(level: &str) -> Result<String, ConfigError> {
    let level = level.trim().to_ascii_lowercase();
    if LOG_LEVELS.contains(&level.as_str()) {
        Ok(level)
    } else {
        Err(invalid(format!("unknown log level '{}'", level)))
    }
}

pub fn parse_fee(fee: f64) -> Result<FeeRate, ConfigError> {
    FeeRate::from_fraction(fee).map_err(|e| invalid(e.to_string()))
}

impl StartArgs {
    /// Fill unset flags from the config file named by `--config`
    pub fn with_file_defaults(self) -> Result<StartArgs, ConfigError> {
        match &self.config {
            Some(path) => {
                let file = load_file(path)?;
                Ok(self.merge(file))
            }
            None => Ok(self),
        }
    }

    pub fn merge(self, file: StartArgs) -> StartArgs {
        StartArgs {
            config: self.config,
            capacity: self.capacity.or(file.capacity),
            whitelist: self.whitelist.or(file.whitelist),
            whitelist_file: self.whitelist_file.or(file.whitelist_file),
            fee: self.fee.or(file.fee),
            selection: self.selection.or(file.selection),
            server_port: self.server_port.or(file.server_port),
            tunnel_server_port: self.tunnel_server_port.or(file.tunnel_server_port),
            tunnel_server_address: self.tunnel_server_address.or(file.tunnel_server_address),
            tunnel_port_range: self.tunnel_port_range.or(file.tunnel_port_range),
            ping_threshold_secs: self.ping_threshold_secs.or(file.ping_threshold_secs),
            data_dir: self.data_dir.or(file.data_dir),
            payout: self.payout.merge(file.payout),
            log_level: self.log_level.or(file.log_level),
            log_file: self.log_file.or(file.log_file),
        }
    }

    pub fn validate(&self) -> Result<Config, ConfigError> {
        let port_range: PortRange = self
            .tunnel_port_range
            .as_deref()
            .unwrap_or(DEFAULT_PORT_RANGE)
            .parse()
            .map_err(|e| invalid(format!("{}", e)))?;

        let capacity = match self.capacity.unwrap_or(DEFAULT_CAPACITY) {
            -1 => port_range.size(),
            c if c <= 0 => {
                return Err(invalid(format!(
                    "capacity must be positive or -1, got {}",
                    c
                )))
            }
            c if c as u64 > port_range.size() as u64 => {
                return Err(invalid(format!(
                    "capacity {} is larger than the tunnel port range {} ({} ports)",
                    c,
                    port_range,
                    port_range.size()
                )))
            }
            c => c as usize,
        };

        let fee = parse_fee(self.fee.unwrap_or(DEFAULT_FEE))?;

        let selection: SelectionStrategy = match &self.selection {
            Some(s) => s.parse().map_err(|e| invalid(format!("{}", e)))?,
            None => SelectionStrategy::default(),
        };

        let whitelist =
            Whitelist::from_sources(self.whitelist.clone(), self.whitelist_file.as_deref())
                .map_err(|e| invalid(e.to_string()))?;

        let payout = if self.payout.is_requested() {
            Some(self.payout.validate(true)?)
        } else {
            None
        };

        let ping_threshold = match self.ping_threshold_secs {
            Some(0) => return Err(invalid("ping threshold must be positive")),
            Some(secs) => Duration::from_secs(secs),
            None => DEFAULT_PING_INTERVAL_THRESHOLD,
        };

        let server_port = self.server_port.unwrap_or(DEFAULT_SERVER_PORT);
        let tunnel_server_port = self.tunnel_server_port.unwrap_or(DEFAULT_TUNNEL_SERVER_PORT);
        if server_port == tunnel_server_port {
            return Err(invalid("server port and tunnel server port must differ"));
        }
        if port_range.contains(server_port) || port_range.contains(tunnel_server_port) {
            return Err(invalid(format!(
                "tunnel port range {} overlaps the server ports",
                port_range
            )));
        }

        Ok(Config {
            capacity,
            whitelist,
            fee,
            selection,
            server_port,
            tunnel_server_port,
            tunnel_server_address: self.tunnel_server_address.clone(),
            port_range,
            ping_threshold,
            data_dir: self.data_dir.clone(),
            payout,
            log: LogSettings {
                level: validate_log_level(self.log_level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL))?,
                file: self.log_file.clone(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payout_args() -> PayoutArgs {
        PayoutArgs {
            payout_interval: Some(7),
            payout_reward: Some("100".to_string()),
            lb_address: Some("lb-addr".to_string()),
            payout_secret: Some("secret".to_string()),
            payout_script: Some(PathBuf::from("/usr/local/bin/transfer")),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = StartArgs::default().validate().unwrap();
        assert_eq!(config.capacity, 10001);
        assert_eq!(config.fee, FeeRate::from_fraction(0.1).unwrap());
        assert_eq!(config.selection, SelectionStrategy::RoundRobin);
        assert_eq!(config.server_port, 80);
        assert_eq!(config.tunnel_server_port, 5223);
        assert_eq!(config.port_range, PortRange { min: 20000, max: 30000 });
        assert_eq!(config.ping_threshold, Duration::from_secs(10));
        assert_eq!(config.log.level, "error");
        assert!(!config.whitelist.is_enabled());
        assert!(config.payout.is_none());
    }

    #[test]
    fn test_invalid_port_range() {
        let args = StartArgs {
            tunnel_port_range: Some("30000:20000".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            args.validate(),
            Err(ConfigError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_capacity_bounds() {
        let args = |capacity| StartArgs {
            capacity: Some(capacity),
            tunnel_port_range: Some("20000:20009".to_string()),
            ..Default::default()
        };
        assert_eq!(args(10).validate().unwrap().capacity, 10);
        assert_eq!(args(-1).validate().unwrap().capacity, 10);
        assert!(args(11).validate().is_err());
        assert!(args(0).validate().is_err());
        assert!(args(-5).validate().is_err());
    }

    #[test]
    fn test_fee_out_of_bounds() {
        let args = StartArgs {
            fee: Some(1.5),
            ..Default::default()
        };
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_both_whitelist_sources() {
        let args = StartArgs {
            whitelist: Some(vec!["a".to_string()]),
            whitelist_file: Some(PathBuf::from("/tmp/whitelist")),
            ..Default::default()
        };
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_bad_selection_and_log_level() {
        let selection = StartArgs {
            selection: Some("fastest".to_string()),
            ..Default::default()
        };
        assert!(selection.validate().is_err());

        let log = StartArgs {
            log_level: Some("loud".to_string()),
            ..Default::default()
        };
        assert!(log.validate().is_err());
    }

    #[test]
    fn test_payout_settings() {
        let args = StartArgs {
            payout: payout_args(),
            ..Default::default()
        };
        let payout = args.validate().unwrap().payout.unwrap();
        assert_eq!(payout.config.interval_days, 7);
        assert_eq!(payout.config.total_reward, Amount::from_tokens(100));
        assert_eq!(payout.config.transfer_timeout, DEFAULT_TRANSFER_TIMEOUT);
    }

    #[test]
    fn test_payout_needs_reward() {
        let mut payout = payout_args();
        payout.payout_reward = None;
        let args = StartArgs {
            payout,
            ..Default::default()
        };
        assert!(args.validate().is_err());

        let mut payout = payout_args();
        payout.payout_reward = Some("-3".to_string());
        assert!(payout.validate(true).is_err());
    }

    #[test]
    fn test_one_off_payout_without_interval() {
        let mut payout = payout_args();
        payout.payout_interval = None;
        assert!(payout.validate(false).is_ok());
        assert!(payout.validate(true).is_err());
    }

    #[test]
    fn test_flags_override_file() {
        let flags = StartArgs {
            fee: Some(0.2),
            ..Default::default()
        };
        let file = StartArgs {
            fee: Some(0.3),
            selection: Some("random".to_string()),
            ..Default::default()
        };
        let config = flags.merge(file).validate().unwrap();
        assert_eq!(config.fee, FeeRate::from_fraction(0.2).unwrap());
        assert_eq!(config.selection, SelectionStrategy::Random);
    }
}
