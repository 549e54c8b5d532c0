//! Ambient credential and connection-tuning configuration.
//!
//! Credentials are never hardcoded or logged. They're sourced from
//! `<EXCHANGE>_API_KEY` / `<EXCHANGE>_SECRET` / `<EXCHANGE>_PASSWORD`
//! environment variables, with an optional TOML file for local
//! development overriding them. A missing credential only becomes an
//! error at the point a private topic actually needs it - an exchange the
//! caller never subscribes privately to can be left unconfigured.

use crate::ids::ExchangeId;
use serde::Deserialize;
use std::collections::HashMap;
use xstream_integration::DataError;

/// One exchange's API credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub api_key: String,
    pub secret: String,
    #[serde(default)]
    pub password: Option<String>,
}

/// Connection tuning shared across every exchange adapter.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionConfig {
    pub request_timeout_secs: u64,
    pub wsreq_timeout_secs: u64,
    pub bitmex_testnet: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 20,
            wsreq_timeout_secs: 10,
            bitmex_testnet: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct CredentialsFile {
    #[serde(flatten)]
    exchanges: HashMap<String, Credentials>,
}

/// Loaded once at process start: per-exchange credentials plus connection
/// tuning.
#[derive(Debug, Clone, Default)]
pub struct Config {
    credentials: HashMap<ExchangeId, Credentials>,
    pub connection: ConnectionConfig,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge in credentials found in `ENV_PREFIX_API_KEY` etc. for every
    /// known exchange.
    pub fn with_env(mut self) -> Self {
        for id in [
            ExchangeId::Binance,
            ExchangeId::Bitmex,
            ExchangeId::Okex,
            ExchangeId::Huobipro,
            ExchangeId::Huobidm,
            ExchangeId::Deribit,
        ] {
            let prefix = id.as_str().to_uppercase();
            let api_key = std::env::var(format!("{prefix}_API_KEY")).ok();
            let secret = std::env::var(format!("{prefix}_SECRET")).ok();
            if let (Some(api_key), Some(secret)) = (api_key, secret) {
                let password = std::env::var(format!("{prefix}_PASSWORD")).ok();
                self.credentials.insert(
                    id,
                    Credentials {
                        api_key,
                        secret,
                        password,
                    },
                );
            }
        }
        self
    }

    /// Merge in credentials from a TOML file, keyed by exchange id
    /// (`[binance]`, `[okex]`, ...). Entries here take precedence over
    /// environment variables, matching a typical local-dev override file.
    pub fn with_toml_file(mut self, contents: &str) -> Result<Self, DataError> {
        let file: CredentialsFile =
            toml::from_str(contents).map_err(|e| DataError::Auth(format!("invalid config file: {e}")))?;
        for (name, creds) in file.exchanges {
            let id = ExchangeId::parse(&name)?;
            self.credentials.insert(id, creds);
        }
        Ok(self)
    }

    /// Fetch credentials for `id`, failing only now - at the point a
    /// private topic actually needs them - rather than eagerly at load
    /// time.
    pub fn credentials(&self, id: ExchangeId) -> Result<&Credentials, DataError> {
        self.credentials
            .get(&id)
            .ok_or_else(|| DataError::Auth(format!("no credentials configured for {id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_credentials_surface_as_auth_error() {
        let config = Config::new();
        let err = config.credentials(ExchangeId::Okex).unwrap_err();
        assert!(matches!(err, DataError::Auth(_)));
    }

    #[test]
    fn test_toml_file_overrides_are_loaded() {
        let toml = r#"
            [okex]
            api_key = "key"
            secret = "secret"
            password = "pass"
        "#;
        let config = Config::new().with_toml_file(toml).unwrap();
        let creds = config.credentials(ExchangeId::Okex).unwrap();
        assert_eq!(creds.api_key, "key");
        assert_eq!(creds.password.as_deref(), Some("pass"));
    }

    #[test]
    fn test_default_connection_tuning_matches_documented_defaults() {
        let config = Config::new();
        assert_eq!(config.connection.request_timeout_secs, 20);
        assert_eq!(config.connection.wsreq_timeout_secs, 10);
    }
}
