use crate::auth::Credentials;
use crate::error::{Error, Result};
use crate::models::ProxySettings;
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "https://api.visualsnoop.com/v1";
pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const ENV_ENDPOINT: &str = "VISUALSNOOP_ENDPOINT";
pub const ENV_PUBLIC_KEY: &str = "VISUALSNOOP_PUBLIC_KEY";
pub const ENV_SECRET_KEY: &str = "VISUALSNOOP_SECRET_KEY";
pub const ENV_HTTP_PROXY: &str = "VISUALSNOOP_HTTP_PROXY";
pub const ENV_HTTPS_PROXY: &str = "VISUALSNOOP_HTTPS_PROXY";
pub const ENV_MAX_RETRIES: &str = "VISUALSNOOP_MAX_RETRIES";
pub const ENV_TIMEOUT: &str = "VISUALSNOOP_TIMEOUT";

/// Runtime configuration resolved from environment and optional config file.
#[derive(Debug, Clone)]
pub struct Config {
    pub endpoint: String,
    pub public_key: Option<String>,
    pub secret_key: Option<String>,
    pub proxies: ProxySettings,
    pub max_retries: u32,
    pub timeout: Option<Duration>,
}

#[skip_serializing_none]
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    pub endpoint: Option<String>,
    pub public_key: Option<String>,
    pub secret_key: Option<String>,
    pub http_proxy: Option<String>,
    pub https_proxy: Option<String>,
    pub max_retries: Option<u32>,
    pub timeout: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfigDoctor {
    pub endpoint: String,
    pub public_key: Option<String>,
    pub secret_key_redacted: Option<String>,
    pub proxies: ProxySettings,
    pub max_retries: u32,
    pub timeout: Option<String>,
    pub source: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            public_key: None,
            secret_key: None,
            proxies: ProxySettings::default(),
            max_retries: DEFAULT_MAX_RETRIES,
            timeout: None,
        }
    }
}

impl ConfigFile {
    /// Parse the file at `path`. A missing file is `None`.
    pub fn read_from(path: &Path) -> Result<Option<Self>> {
        let Ok(contents) = fs::read_to_string(path) else {
            return Ok(None);
        };
        toml::from_str(&contents)
            .map(Some)
            .map_err(|err| Error::InvalidConfig(format!("config parse error: {err}")))
    }

    /// Overwrite every field that `update` sets.
    pub fn merge(&mut self, update: ConfigFile) {
        let ConfigFile {
            endpoint,
            public_key,
            secret_key,
            http_proxy,
            https_proxy,
            max_retries,
            timeout,
        } = update;
        self.endpoint = endpoint.or(self.endpoint.take());
        self.public_key = public_key.or(self.public_key.take());
        self.secret_key = secret_key.or(self.secret_key.take());
        self.http_proxy = http_proxy.or(self.http_proxy.take());
        self.https_proxy = https_proxy.or(self.https_proxy.take());
        self.max_retries = max_retries.or(self.max_retries);
        self.timeout = timeout.or(self.timeout.take());
    }

    /// Write to `path`, creating parent directories. Values that would not
    /// resolve (unparseable timeout) are rejected before anything is written.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        Config::resolve(Some(self), |_| None)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                Error::InvalidConfig(format!("failed to create config dir: {err}"))
            })?;
        }
        let serialized = toml::to_string_pretty(self)
            .map_err(|err| Error::InvalidConfig(format!("failed to serialize config: {err}")))?;
        fs::write(path, serialized)
            .map_err(|err| Error::InvalidConfig(format!("failed to write config: {err}")))?;
        Ok(())
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let file_config = match config_path() {
            Some(path) => ConfigFile::read_from(&path)?,
            None => None,
        };

        Self::resolve(file_config.as_ref(), |key| std::env::var(key).ok())
    }

    /// Merge settings: `env` lookup first, then the file, then defaults.
    /// Blank values count as unset.
    pub fn resolve(
        file_config: Option<&ConfigFile>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let pick = |key: &str, from_file: fn(&ConfigFile) -> Option<String>| {
            env(key)
                .filter(|v| !v.trim().is_empty())
                .or_else(|| file_config.and_then(from_file))
                .filter(|v| !v.trim().is_empty())
        };

        let endpoint = pick(ENV_ENDPOINT, |c| c.endpoint.clone())
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        let public_key = pick(ENV_PUBLIC_KEY, |c| c.public_key.clone());
        let secret_key = pick(ENV_SECRET_KEY, |c| c.secret_key.clone());

        let mut proxies = ProxySettings::new();
        if let Some(url) = pick(ENV_HTTP_PROXY, |c| c.http_proxy.clone()) {
            proxies.insert("http", url);
        }
        if let Some(url) = pick(ENV_HTTPS_PROXY, |c| c.https_proxy.clone()) {
            proxies.insert("https", url);
        }

        let max_retries = match env(ENV_MAX_RETRIES).filter(|v| !v.trim().is_empty()) {
            Some(raw) => raw.trim().parse::<u32>().map_err(|err| {
                Error::InvalidConfig(format!("{ENV_MAX_RETRIES} must be an integer: {err}"))
            })?,
            None => file_config
                .and_then(|c| c.max_retries)
                .unwrap_or(DEFAULT_MAX_RETRIES),
        };

        let timeout = pick(ENV_TIMEOUT, |c| c.timeout.clone())
            .map(|raw| {
                humantime::parse_duration(raw.trim())
                    .map_err(|err| Error::InvalidConfig(format!("invalid timeout {raw:?}: {err}")))
            })
            .transpose()?;

        Ok(Self {
            endpoint,
            public_key,
            secret_key,
            proxies,
            max_retries,
            timeout,
        })
    }

    /// Credentials from this config, if both keys are set.
    pub fn credentials(&self) -> Result<Credentials> {
        let public_key = self
            .public_key
            .clone()
            .ok_or(Error::MissingCredentials(ENV_PUBLIC_KEY))?;
        let secret_key = self
            .secret_key
            .clone()
            .ok_or(Error::MissingCredentials(ENV_SECRET_KEY))?;
        Ok(Credentials::new(public_key, secret_key))
    }

    pub fn doctor(&self) -> ConfigDoctor {
        let from_env = [ENV_ENDPOINT, ENV_PUBLIC_KEY, ENV_SECRET_KEY]
            .iter()
            .any(|key| std::env::var(key).is_ok());
        let source = if from_env {
            "environment".to_string()
        } else {
            "config file / defaults".to_string()
        };
        ConfigDoctor {
            endpoint: self.endpoint.clone(),
            public_key: self.public_key.clone(),
            secret_key_redacted: self.redacted_secret_key(),
            proxies: self.proxies.clone(),
            max_retries: self.max_retries,
            timeout: self
                .timeout
                .map(|d| humantime::format_duration(d).to_string()),
            source,
        }
    }

    pub fn redacted_secret_key(&self) -> Option<String> {
        self.secret_key.as_ref().map(|v| redact(v))
    }
}

pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("visualsnoop").join("config.toml"))
}

/// Merge `update` into the stored config file and write it back.
/// Returns the path written.
pub fn update_config_file(update: ConfigFile) -> Result<PathBuf> {
    let path = config_path()
        .ok_or_else(|| Error::InvalidConfig("unable to determine config directory".into()))?;
    let mut file = ConfigFile::read_from(&path)?.unwrap_or_default();
    file.merge(update);
    file.save_to(&path)?;
    Ok(path)
}

fn redact(key: &str) -> String {
    let chars: Vec<char> = key.trim().chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let suffix: String = chars[chars.len() - 4..].iter().collect();
    format!("****{suffix}")
}
