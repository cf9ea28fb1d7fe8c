use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_ENV: &str = "GCHALLENGE_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "settings.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address challenges are sent from.
    pub sender_email: String,
    pub unchallenged_label: String,
    pub challenged_label: String,
    pub passed_label: String,
    pub challenge_body: String,
    pub credentials_path: PathBuf,
    pub token_path: PathBuf,
    pub token_store: TokenStore,
    pub redirect_port: u16,
    pub log_file: PathBuf,
    pub log_level: String,
    pub retry: RetrySettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TokenStore {
    #[default]
    File,
    Keyring,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

impl RetrySettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sender_email: String::new(),
            unchallenged_label: "unchallenged".to_string(),
            challenged_label: "challenged".to_string(),
            passed_label: "passed".to_string(),
            challenge_body: "Are you a human?".to_string(),
            credentials_path: PathBuf::from("credentials.json"),
            token_path: PathBuf::from("token.json"),
            token_store: TokenStore::default(),
            redirect_port: 52158,
            log_file: PathBuf::from("app.log"),
            log_level: "debug".to_string(),
            retry: RetrySettings::default(),
        }
    }
}

impl Config {
    /// Loads `settings.toml`, or the file named by `GCHALLENGE_CONFIG`.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(path)
    }

    /// A missing file yields the defaults; a malformed one is an error.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content)
                .map_err(|e| Error::config(format!("{}: {}", path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(Error::config(format!("{}: {}", path.display(), e))),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.sender_email.trim().is_empty() {
            return Err(Error::config("sender_email must be set"));
        }

        let names = self.label_names();
        if names.iter().any(|n| n.trim().is_empty()) {
            return Err(Error::config("label names must not be empty"));
        }
        let unique: HashSet<&str> = names.iter().copied().collect();
        if unique.len() != names.len() {
            return Err(Error::config("label names must be distinct"));
        }

        if self.retry.max_attempts == 0 {
            return Err(Error::config("retry.max_attempts must be at least 1"));
        }
        Ok(())
    }

    pub fn label_names(&self) -> [&str; 3] {
        [
            self.unchallenged_label.as_str(),
            self.challenged_label.as_str(),
            self.passed_label.as_str(),
        ]
    }
}
