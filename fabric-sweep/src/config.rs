// Copyright (c) 2024 Graphcore Ltd. All rights reserved.

//! Application configuration.
//!
//! Every option can be set from several sources. Later sources override
//! earlier ones:
//!  1. built-in defaults,
//!  2. the static configuration file ([DEFAULT_CONF_FILE]),
//!  3. environment variables prefixed with [ENV_PREFIX],
//!  4. the command line.
//!
//! A further file named with `--conf-file` is merged over the static one, but
//! still loses to the environment and the command line.

use std::error::Error;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use clap::Parser;
use fabric_routing::RoutingError;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

/// Configuration file read from the working directory when present.
pub const DEFAULT_CONF_FILE: &str = "fabric-sweep.toml";

/// Prefix of the environment variables that set options.
pub const ENV_PREFIX: &str = "FABRIC_";

/// Error raised while assembling the configuration.
#[derive(Debug)]
pub struct ConfigError(pub String);

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Config error: {}", self.0)
    }
}

impl Error for ConfigError {}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        ConfigError(e.to_string())
    }
}

impl From<RoutingError> for ConfigError {
    fn from(e: RoutingError) -> Self {
        ConfigError(e.0)
    }
}

impl From<io::Error> for ConfigError {
    fn from(e: io::Error) -> Self {
        ConfigError(e.to_string())
    }
}

#[derive(Parser, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[command(about = "Discover, route and program a switched fabric")]
pub struct Config {
    /// Level of log message to display (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Regular expression selecting the entities logged at `log_level`.
    /// Others only log errors.
    #[arg(long)]
    pub log_filter_regex: Option<String>,

    /// File that text logging is written to, `-` for stdout.
    #[arg(long)]
    pub log_file: Option<String>,

    /// Send log messages to the `log` facade instead of the text output.
    #[arg(long)]
    pub log_facade: Option<bool>,

    /// Fabric description to load. A generated all-to-all fabric is used
    /// when empty.
    #[arg(long)]
    pub topology: Option<String>,

    /// Number of devices in the generated fabric.
    #[arg(long)]
    pub devices: Option<u16>,

    /// Number of subdevices per device in the generated fabric.
    #[arg(long)]
    pub subdevices: Option<u8>,

    /// Maximum number of sweeps to run.
    #[arg(long)]
    pub sweeps: Option<u32>,

    /// Subdevices (`dev<D>_sd<S>`) whose hardware writes fail.
    #[arg(long, value_delimiter = ',')]
    pub fail_writes: Option<Vec<String>>,

    /// Extra configuration file.
    #[arg(long)]
    pub conf_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            log_filter_regex: Some(String::new()),
            log_file: Some("-".to_string()),
            log_facade: Some(false),
            topology: Some(String::new()),
            devices: Some(4),
            subdevices: Some(2),
            sweeps: Some(3),
            fail_writes: Some(Vec::new()),
            conf_file: Some(PathBuf::new()),
        }
    }
}

impl Config {
    /// Build the configuration from the process command line and
    /// environment.
    pub fn load() -> Result<Config, ConfigError> {
        Config::load_with(Config::parse(), Path::new(DEFAULT_CONF_FILE))
    }

    /// Build the configuration from already parsed command-line options and
    /// the given static configuration file.
    pub fn load_with(cli: Config, static_conf: &Path) -> Result<Config, ConfigError> {
        let mut figment = Config::figment_with_defaults();
        figment = Config::figment_conf_file_merge(figment, static_conf);
        figment = Config::figment_env_var_merge(figment);
        let config = Config::figment_extract(figment)?;

        let mut config = Config::clap_merge(config, cli.clone());
        if let Some(conf_file) = config.conf_file.clone() {
            config.parse_extra_conf_file(&conf_file, static_conf, cli)?;
        }
        Ok(config)
    }

    fn figment_with_defaults() -> Figment {
        Figment::new().merge(Serialized::defaults(Config::default()))
    }

    fn figment_conf_file_merge(figment: Figment, conf_file: &Path) -> Figment {
        figment.merge(Toml::file(conf_file))
    }

    fn figment_env_var_merge(figment: Figment) -> Figment {
        figment.merge(Env::prefixed(ENV_PREFIX))
    }

    fn figment_extract(figment: Figment) -> Result<Config, ConfigError> {
        Ok(figment.extract()?)
    }

    fn clap_merge(mut config: Config, cli: Config) -> Config {
        macro_rules! merge_fields {
            ($($field:ident),+) => {
                $(
                    if cli.$field.is_some() {
                        config.$field = cli.$field;
                    }
                )+
            };
        }
        merge_fields!(
            log_level,
            log_filter_regex,
            log_file,
            log_facade,
            topology,
            devices,
            subdevices,
            sweeps,
            fail_writes,
            conf_file
        );

        config
    }

    fn parse_extra_conf_file(
        &mut self,
        conf_file: &Path,
        static_conf: &Path,
        cli: Config,
    ) -> Result<(), ConfigError> {
        if conf_file.as_os_str().is_empty() {
            return Ok(());
        }

        if conf_file.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::IsADirectory,
                format!("{} is not a file path", conf_file.display()),
            )
            .into());
        }

        if !conf_file.exists() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} not found", conf_file.display()),
            )
            .into());
        }

        let mut figment = Config::figment_with_defaults();
        figment = Config::figment_conf_file_merge(figment, static_conf);
        figment = Config::figment_conf_file_merge(figment, conf_file);
        figment = Config::figment_env_var_merge(figment);
        let config = Config::figment_extract(figment)?;
        self.clap_merge_existing(config, cli);
        Ok(())
    }

    /// Command-line options win; otherwise take any file or environment value
    /// that differs from the default.
    fn clap_merge_existing(&mut self, config: Config, cli: Config) {
        let defaults = Config::default();
        macro_rules! merge_fields {
            ($($field:ident),+) => {
                $(
                    if cli.$field.is_some() {
                        self.$field = cli.$field;
                    } else if config.$field != defaults.$field {
                        self.$field = config.$field;
                    }
                )+
            };
        }
        merge_fields!(
            log_level,
            log_filter_regex,
            log_file,
            log_facade,
            topology,
            devices,
            subdevices,
            sweeps,
            fail_writes,
            conf_file
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_complete() {
        let config = Config::default();
        let empty = Config::parse_from(["fabric-sweep"]);
        assert!(empty.log_level.is_none());
        assert_eq!(Config::clap_merge(config.clone(), empty), config);
    }

    #[test]
    fn command_line_lists() {
        let cli = Config::parse_from(["fabric-sweep", "--fail-writes", "dev0_sd0,dev1_sd1"]);
        assert_eq!(
            cli.fail_writes,
            Some(vec!["dev0_sd0".to_string(), "dev1_sd1".to_string()])
        );
    }
}
