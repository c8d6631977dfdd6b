//! The gateway's one configuration record, loaded once at startup.
//! Defaults are declared next to each field so they can't drift out of
//! sync with documentation.

use std::path::PathBuf;
use std::time::Duration;

use educe::Educe;
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// RADIUS-specific subset, embedded by value inside `Config` and
/// flattened into the same environment namespace.
#[derive(Debug, Clone, Deserialize, Serialize, Educe)]
#[educe(Default)]
pub struct RadiusConfig {
    #[educe(Default = "localhost")]
    pub radius_host: String,

    #[educe(Default = 1812)]
    pub radius_port: u16,

    #[educe(Default = "localhost")]
    pub radius_acct_host: String,

    #[educe(Default = 1813)]
    pub radius_acct_port: u16,

    #[serde(with = "humantime_serde")]
    #[educe(Default(expression = Duration::from_secs(10)))]
    pub radius_timeout: Duration,
}

#[derive(Debug, Clone, Deserialize, Serialize, Educe)]
#[educe(Default)]
pub struct Config {
    #[educe(Default = 2083)]
    pub port: u16,

    #[educe(Default(expression = PathBuf::from("ca.crt")))]
    pub ca_file: PathBuf,

    #[educe(Default(expression = PathBuf::from("server.crt")))]
    pub cert_file: PathBuf,

    #[educe(Default(expression = PathBuf::from("server.key")))]
    pub key_file: PathBuf,

    #[serde(with = "humantime_serde")]
    #[educe(Default(expression = Duration::from_secs(60)))]
    pub idle_timeout: Duration,

    #[serde(flatten)]
    pub radius: RadiusConfig,
}

impl Config {
    /// Layers documented defaults, then an optional TOML file, then
    /// `GRP_`-prefixed environment variables (which always win).
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(figment::providers::Serialized::defaults(Config::default()));

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        } else {
            let default_path = std::path::Path::new("grp.toml");
            if default_path.exists() {
                figment = figment.merge(Toml::file(default_path));
            }
        }

        figment = figment.merge(Env::prefixed("GRP_"));

        figment.extract()
    }
}
