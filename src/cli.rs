use clap::Parser;
use log::{LevelFilter, info};
use std::path::PathBuf;

use crate::config::ConfigManager;

/// led-commanderd — daemon for BLE RGB LED strip controllers
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// YAML config file path (default: XDG config dir, then /etc/led_commander/config.yml)
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Detach from the terminal and run in the background
    #[arg(short = 'd', long = "daemonize", default_value = "false")]
    pub daemonize: bool,

    /// Log at debug level
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Device MAC address, overrides `device.address`
    #[arg(short = 'a', long = "address")]
    pub address: Option<String>,

    /// Protocol name or alias, overrides `device.protocol`
    #[arg(short = 'p', long = "protocol")]
    pub protocol: Option<String>,
}

impl Cli {
    pub fn log_level(&self) -> LevelFilter {
        if self.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        }
    }

    /// Writes the device overrides into the loaded configuration. They are
    /// persisted on the next save like any other change.
    pub async fn apply_overrides(&self, config_manager: &ConfigManager) {
        let mut config = config_manager.get_mut().await;
        if let Some(address) = &self.address {
            info!("Device address overridden: {address}");
            config.device.address = Some(address.clone());
        }
        if let Some(protocol) = &self.protocol {
            info!("Device protocol overridden: {protocol}");
            config.device.protocol = Some(protocol.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults() {
        let cli = Cli::try_parse_from(["led-commanderd"]).unwrap();
        assert!(cli.config.is_none());
        assert!(!cli.daemonize);
        assert_eq!(cli.log_level(), LevelFilter::Info);
    }

    #[test]
    fn short_flags() {
        let cli = Cli::try_parse_from(["led-commanderd", "-d", "-v", "-c", "/tmp/led.yml"]).unwrap();
        assert!(cli.daemonize);
        assert_eq!(cli.log_level(), LevelFilter::Debug);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/led.yml")));
    }

    #[tokio::test]
    async fn device_overrides_replace_config() {
        let cli = Cli::try_parse_from([
            "led-commanderd",
            "--address",
            "BE:FF:20:00:0A:51",
            "--protocol",
            "triones",
        ])
        .unwrap();
        let manager = ConfigManager::new(Config::default(), "unused.yml".into());

        cli.apply_overrides(&manager).await;

        let device = manager.clone_config().await.device;
        assert_eq!(device.address.as_deref(), Some("BE:FF:20:00:0A:51"));
        assert_eq!(device.explicit_protocol(), Some("triones"));
    }

    #[tokio::test]
    async fn absent_overrides_keep_config() {
        let cli = Cli::try_parse_from(["led-commanderd"]).unwrap();
        let mut config = Config::default();
        config.device.protocol = Some("magichome".into());
        let manager = ConfigManager::new(config, "unused.yml".into());

        cli.apply_overrides(&manager).await;

        assert_eq!(
            manager.clone_config().await.device.explicit_protocol(),
            Some("magichome")
        );
    }
}
