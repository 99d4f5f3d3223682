use std::path::Path;
use std::time::Duration;
use std::{fs, io};

use serde::Deserialize;

pub const DEFAULT_CONFIG: &str = "/etc/qauth/helper.toml";

#[derive(Deserialize, Debug, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub pam:    Pam,
    #[serde(default)]
    pub helper: Helper,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Pam {
    #[serde(default = "default_service")]
    pub service: String,
    #[serde(rename = "check-service", default = "default_check_service")]
    pub check_service: String,
    #[serde(rename = "autologin-service", default = "default_autologin_service")]
    pub autologin_service: String,
}

impl Default for Pam {
    fn default() -> Pam {
        Pam {
            service:           default_service(),
            check_service:     default_check_service(),
            autologin_service: default_autologin_service(),
        }
    }
}

fn default_service() -> String {
    "qauth".to_string()
}

fn default_check_service() -> String {
    "qauth-check".to_string()
}

fn default_autologin_service() -> String {
    "qauth-autologin".to_string()
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct Helper {
    // seconds, 0 is no timeout.
    #[serde(default)]
    pub timeout: u64,
}

impl Helper {
    pub fn read_timeout(&self) -> Option<Duration> {
        match self.timeout {
            0 => None,
            t => Some(Duration::from_secs(t)),
        }
    }
}

// Read the TOML config into a config::Config struct.
pub fn read(toml_file: impl AsRef<Path>) -> io::Result<Config> {
    let buffer = fs::read_to_string(&toml_file)?;

    // initial parse.
    let config: Config = match toml::from_str(&buffer) {
        Ok(v) => Ok(v),
        Err(e) => Err(io::Error::new(io::ErrorKind::InvalidData, e.to_string())),
    }?;

    Ok(config)
}

// Like read(), but a missing file means "all defaults".
pub fn read_or_default(toml_file: impl AsRef<Path>) -> io::Result<Config> {
    match read(&toml_file) {
        Err(ref e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("config::read_or_default: {:?} not found, using defaults", toml_file.as_ref());
            Ok(Config::default())
        },
        other => other,
    }
}

pub fn check(cfg: &str, config: &Config) -> io::Result<()> {
    let pam = &config.pam;
    for (name, value) in &[
        ("service", &pam.service),
        ("check-service", &pam.check_service),
        ("autologin-service", &pam.autologin_service),
    ] {
        if value.is_empty() {
            let msg = format!("{}: [pam]: {} is empty", cfg, name);
            return Err(io::Error::new(io::ErrorKind::InvalidData, msg));
        }
    }
    Ok(())
}
