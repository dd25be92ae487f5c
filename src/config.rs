//! Daemon configuration
//!
//! Layered with figment, later layers winning:
//! - built-in defaults
//! - a TOML file (`skirmish.toml`, or the path given on the command line)
//! - `SKIRMISH_`-prefixed environment variables

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::combat::DEFAULT_MAX_STEPS;

/// Config file read when none is named explicitly
pub const DEFAULT_CONFIG_FILE: &str = "skirmish.toml";

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind_addr: SocketAddr,
    /// JSON reference library; the bundled starter library when unset
    pub reference_path: Option<PathBuf>,
    /// Step cap for one NPC auto-play run
    pub autoplay_max_steps: usize,
    /// Minimum time between two actions on one connection
    pub action_interval_ms: u64,
    /// Outbound event queue per connection
    pub event_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            reference_path: None,
            autoplay_max_steps: DEFAULT_MAX_STEPS,
            action_interval_ms: 500,
            event_buffer: 64,
        }
    }
}

impl Config {
    /// Load defaults, then `file` (or `skirmish.toml` if present), then the
    /// environment. A file named explicitly must exist.
    pub fn load(file: Option<&Path>) -> Result<Self, figment::Error> {
        let figment = Figment::from(Serialized::defaults(Config::default()));

        let figment = match file {
            Some(path) => {
                if !path.exists() {
                    return Err(figment::Error::from(format!(
                        "config file not found: {}",
                        path.display()
                    )));
                }
                figment.merge(Toml::file(path))
            }
            None => figment.merge(Toml::file(DEFAULT_CONFIG_FILE)),
        };

        figment.merge(Env::prefixed("SKIRMISH_")).extract()
    }
}
