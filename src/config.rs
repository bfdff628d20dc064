use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::scheduler::CompactionPolicy;

const PREFIX: &str = "HALLBOOK_";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}={value:?} is not a valid value")]
    Invalid { var: String, value: String },
    #[error("both HALLBOOK_TLS_CERT and HALLBOOK_TLS_KEY must be set, or neither")]
    PartialTls,
    #[error("HALLBOOK_PASSWORD must not be empty")]
    EmptyPassword,
}

/// Server settings, read from `HALLBOOK_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    /// Shared secret clients present at startup.
    pub password: String,
    pub max_connections: usize,
    pub compaction: CompactionPolicy,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub metrics_port: Option<u16>,
    /// Base URL of the mail relay; mail is skipped when unset.
    pub mail_url: Option<String>,
    pub mail_timeout: Duration,
}

impl Config {
    /// Loads `.env` from the working directory if present, then reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenv::dotenv() {
            tracing::debug!("loaded environment from {}", path.display());
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(&format!("{PREFIX}{name}")).filter(|v| !v.trim().is_empty());

        fn parsed<T: FromStr>(name: &str, raw: Option<String>, default: T) -> Result<T, ConfigError> {
            match raw {
                None => Ok(default),
                Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
                    var: format!("{PREFIX}{name}"),
                    value,
                }),
            }
        }

        let tls_cert = get("TLS_CERT");
        let tls_key = get("TLS_KEY");
        if tls_cert.is_some() != tls_key.is_some() {
            return Err(ConfigError::PartialTls);
        }
        let password = lookup(&format!("{PREFIX}PASSWORD")).unwrap_or_else(|| "hallbook".into());
        if password.is_empty() {
            return Err(ConfigError::EmptyPassword);
        }

        let metrics_port = match get("METRICS_PORT") {
            None => None,
            raw => Some(parsed("METRICS_PORT", raw, 0u16)?),
        };

        Ok(Self {
            port: parsed("PORT", get("PORT"), 5433)?,
            bind: get("BIND").unwrap_or_else(|| "0.0.0.0".into()),
            data_dir: PathBuf::from(get("DATA_DIR").unwrap_or_else(|| "./data".into())),
            password,
            max_connections: parsed("MAX_CONNECTIONS", get("MAX_CONNECTIONS"), 256)?,
            compaction: CompactionPolicy {
                threshold: parsed("COMPACT_THRESHOLD", get("COMPACT_THRESHOLD"), 1000)?,
                interval: Duration::from_secs(parsed("COMPACT_INTERVAL_SECS", get("COMPACT_INTERVAL_SECS"), 30)?),
            },
            tls_cert,
            tls_key,
            metrics_port,
            mail_url: get("MAIL_URL").map(|u| u.trim_end_matches('/').to_string()),
            mail_timeout: Duration::from_secs(parsed("MAIL_TIMEOUT_SECS", get("MAIL_TIMEOUT_SECS"), 10)?),
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults() {
        let c = config(&[]).unwrap();
        assert_eq!(c.listen_addr(), "0.0.0.0:5433");
        assert_eq!(c.password, "hallbook");
        assert_eq!(c.max_connections, 256);
        assert_eq!(c.compaction.threshold, 1000);
        assert_eq!(c.compaction.interval, Duration::from_secs(30));
        assert!(c.metrics_port.is_none());
        assert!(c.mail_url.is_none());
    }

    #[test]
    fn overrides() {
        let c = config(&[
            ("HALLBOOK_PORT", "6000"),
            ("HALLBOOK_METRICS_PORT", "9100"),
            ("HALLBOOK_MAIL_URL", "http://mail.local:3000/"),
            ("HALLBOOK_COMPACT_INTERVAL_SECS", "5"),
        ])
        .unwrap();
        assert_eq!(c.port, 6000);
        assert_eq!(c.metrics_port, Some(9100));
        assert_eq!(c.mail_url.as_deref(), Some("http://mail.local:3000"));
        assert_eq!(c.compaction.interval, Duration::from_secs(5));
    }

    #[test]
    fn bad_number_names_the_variable() {
        let err = config(&[("HALLBOOK_PORT", "http")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                var: "HALLBOOK_PORT".into(),
                value: "http".into()
            }
        );
    }

    #[test]
    fn tls_needs_both_halves() {
        assert_eq!(config(&[("HALLBOOK_TLS_CERT", "cert.pem")]).unwrap_err(), ConfigError::PartialTls);
        assert!(config(&[("HALLBOOK_TLS_CERT", "c.pem"), ("HALLBOOK_TLS_KEY", "k.pem")]).is_ok());
    }

    #[test]
    fn empty_password_rejected() {
        assert_eq!(config(&[("HALLBOOK_PASSWORD", "")]).unwrap_err(), ConfigError::EmptyPassword);
    }
}
