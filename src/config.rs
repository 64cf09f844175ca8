use std::net::{IpAddr, SocketAddr};

use anyhow::{ensure, Context};
use config::builder::DefaultState;
use config::{Config as CConfig, ConfigBuilder};
use tokio::time::Duration;

use crate::flooder::MIN_RATE;

const ENV_PREFIX: &str = "PRESENCE_FLOOD";

/// Positional overrides, all optional: `presence-flood [port] [rate] [duration_sec]`.
#[derive(Debug, Default, clap::Parser)]
#[command(version, about = "Streams synthetic presence events to every client that connects")]
pub struct Args {
    /// TCP port to listen on.
    pub port: Option<u16>,
    /// Target events per second, per connection.
    pub rate: Option<u64>,
    /// How long each connection is flooded, in seconds.
    pub duration_sec: Option<u64>,
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: String,
    pub host: String,
    pub port: u16,
    pub backlog: u32,
    pub rate: u64,
    pub duration_secs: u64,
    // When set, TenantId repeats the tenant used in the SIP URIs instead of
    // being drawn on its own.
    pub consistent_tenants: bool,
}

impl Config {
    /// Reads `path` (any extension the `config` crate knows, missing file is
    /// fine) and then `PRESENCE_FLOOD_*` environment variables.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let builder = CConfig::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX));
        Self::from_builder(builder)
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> anyhow::Result<Self> {
        let config = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Positional arguments win over everything else.
    pub fn with_args(mut self, args: &Args) -> Self {
        if let Some(port) = args.port {
            self.port = port;
        }
        if let Some(rate) = args.rate {
            self.rate = rate;
        }
        if let Some(duration) = args.duration_sec {
            self.duration_secs = duration;
        }
        self
    }

    pub fn validate(self) -> anyhow::Result<Self> {
        ensure!(
            self.rate >= MIN_RATE,
            "rate must be at least {} events/sec, got {}",
            MIN_RATE,
            self.rate
        );
        ensure!(self.backlog > 0, "backlog must be greater than zero");
        self.listen_addr()?;
        Ok(self)
    }

    pub fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        let ip: IpAddr = self
            .host
            .parse()
            .with_context(|| format!("Invalid listen host {:?}", self.host))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            host: "0.0.0.0".to_string(),
            port: 9000,
            backlog: 5,
            rate: 10_000,
            duration_secs: 60,
            consistent_tenants: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use config::FileFormat;

    fn from_toml(toml: &str) -> Config {
        let builder = CConfig::builder().add_source(config::File::from_str(toml, FileFormat::Toml));
        Config::from_builder(builder).unwrap()
    }

    #[test]
    fn defaults_match_the_documented_invocation() {
        let config = Config::default();
        assert_eq!(config.port, 9000);
        assert_eq!(config.rate, 10_000);
        assert_eq!(config.duration(), Duration::from_secs(60));
        assert_eq!(
            config.listen_addr().unwrap(),
            "0.0.0.0:9000".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn file_values_fill_only_what_they_name() {
        let config = from_toml("rate = 500\nlog_level = \"debug\"\nconsistent_tenants = true\n");
        assert_eq!(config.rate, 500);
        assert_eq!(config.log_level, "debug");
        assert!(config.consistent_tenants);
        assert_eq!(config.port, 9000);
        assert_eq!(config.duration_secs, 60);
    }

    #[test]
    fn positional_args_override_file_values() {
        let config = from_toml("port = 7000\nrate = 500\nduration_secs = 5\n");
        let args = Args::try_parse_from(["presence-flood", "9001", "100"]).unwrap();
        let config = config.with_args(&args);
        assert_eq!(config.port, 9001);
        assert_eq!(config.rate, 100);
        assert_eq!(config.duration_secs, 5);
    }

    #[test]
    fn all_positional_args_are_optional() {
        let args = Args::try_parse_from(["presence-flood"]).unwrap();
        assert!(args.port.is_none() && args.rate.is_none() && args.duration_sec.is_none());

        let args = Args::try_parse_from(["presence-flood", "9001", "100", "1"]).unwrap();
        assert_eq!(args.duration_sec, Some(1));
    }

    #[test]
    fn malformed_positional_args_are_rejected() {
        assert!(Args::try_parse_from(["presence-flood", "not-a-port"]).is_err());
        assert!(Args::try_parse_from(["presence-flood", "70000"]).is_err());
    }

    #[test]
    fn validation() {
        assert!(Config::default().validate().is_ok());

        let too_slow = Config {
            rate: 9,
            ..Config::default()
        };
        assert!(too_slow.validate().is_err());

        let bad_host = Config {
            host: "localhost".to_string(),
            ..Config::default()
        };
        assert!(bad_host.validate().is_err());

        let v6 = Config {
            host: "::1".to_string(),
            port: 9001,
            ..Config::default()
        };
        assert_eq!(
            v6.validate().unwrap().listen_addr().unwrap(),
            "[::1]:9001".parse::<SocketAddr>().unwrap()
        );
    }
}
