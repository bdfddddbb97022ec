//! Environment-driven configuration.
//!
//! One variable picks the backend, the rest configure it:
//!
//! - `FREIGHTFILE_BACKEND`: `flat-file` (default), `document-db`,
//!   `content-api`, or `memory`
//! - `FREIGHTFILE_DATA_DIR`: flat-file storage root
//! - `FREIGHTFILE_DB_URL`, `FREIGHTFILE_DB_TOKEN`, `FREIGHTFILE_DB_POLL_SECS`
//! - `FREIGHTFILE_CONTENT_URL`, `FREIGHTFILE_CONTENT_TOKEN`,
//!   `FREIGHTFILE_CONTENT_BRANCH`
//!
//! `.env` loading is the binary's job (dotenvy); this module only reads the
//! process environment.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::backend::BackendAdapter;
use crate::backend::content_api::ContentApiAdapter;
use crate::backend::document_db::DocumentDbAdapter;
use crate::backend::flat_file::FlatFileAdapter;
use crate::backend::memory::MemoryAdapter;
use crate::error::{ConfigError, StoreError};

const DEFAULT_POLL_SECS: u64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    DocumentDb,
    ContentApi,
    FlatFile,
    Memory,
}

impl BackendKind {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value.to_ascii_lowercase().as_str() {
            "document-db" | "document_db" => Ok(Self::DocumentDb),
            "content-api" | "content_api" => Ok(Self::ContentApi),
            "flat-file" | "flat_file" => Ok(Self::FlatFile),
            "memory" => Ok(Self::Memory),
            other => Err(ConfigError::InvalidValue {
                key: "FREIGHTFILE_BACKEND".to_string(),
                message: format!("unsupported backend '{other}'"),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DocumentDb => "document-db",
            Self::ContentApi => "content-api",
            Self::FlatFile => "flat-file",
            Self::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DocumentDbConfig {
    pub base_url: Url,
    pub auth_token: Option<SecretString>,
    pub poll_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct ContentApiConfig {
    pub base_url: Url,
    pub token: SecretString,
    pub branch: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FlatFileConfig {
    pub root: PathBuf,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: BackendKind,
    pub document_db: Option<DocumentDbConfig>,
    pub content_api: Option<ContentApiConfig>,
    pub flat_file: FlatFileConfig,
}

fn parse_url(key: &str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw.trim()).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("freightfile"))
        .unwrap_or_else(|| PathBuf::from("freightfile-data"))
}

impl StoreConfig {
    /// Resolve from the process environment.
    pub fn resolve() -> Result<Self, ConfigError> {
        Self::resolve_from(|key| std::env::var(key).ok())
    }

    /// Resolve from an arbitrary lookup; the tests feed a map instead of
    /// mutating the process environment.
    pub fn resolve_from(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let lookup = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let backend = match lookup("FREIGHTFILE_BACKEND") {
            Some(raw) => BackendKind::from_str(&raw)?,
            None => BackendKind::FlatFile,
        };

        let document_db = match lookup("FREIGHTFILE_DB_URL") {
            Some(raw) => {
                let poll_secs = match lookup("FREIGHTFILE_DB_POLL_SECS") {
                    Some(raw) => raw.parse::<u64>().map_err(|e| ConfigError::InvalidValue {
                        key: "FREIGHTFILE_DB_POLL_SECS".to_string(),
                        message: e.to_string(),
                    })?,
                    None => DEFAULT_POLL_SECS,
                };
                Some(DocumentDbConfig {
                    base_url: parse_url("FREIGHTFILE_DB_URL", &raw)?,
                    auth_token: lookup("FREIGHTFILE_DB_TOKEN").map(SecretString::from),
                    poll_interval: Duration::from_secs(poll_secs.max(1)),
                })
            }
            None => None,
        };

        let content_api = match lookup("FREIGHTFILE_CONTENT_URL") {
            Some(raw) => {
                let token =
                    lookup("FREIGHTFILE_CONTENT_TOKEN").ok_or_else(|| ConfigError::MissingValue {
                        key: "FREIGHTFILE_CONTENT_TOKEN".to_string(),
                    })?;
                Some(ContentApiConfig {
                    base_url: parse_url("FREIGHTFILE_CONTENT_URL", &raw)?,
                    token: SecretString::from(token),
                    branch: lookup("FREIGHTFILE_CONTENT_BRANCH"),
                })
            }
            None => None,
        };

        let flat_file = FlatFileConfig {
            root: lookup("FREIGHTFILE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(default_data_dir),
        };

        // The selected backend must be fully configured.
        match backend {
            BackendKind::DocumentDb if document_db.is_none() => {
                return Err(ConfigError::MissingValue {
                    key: "FREIGHTFILE_DB_URL".to_string(),
                });
            }
            BackendKind::ContentApi if content_api.is_none() => {
                return Err(ConfigError::MissingValue {
                    key: "FREIGHTFILE_CONTENT_URL".to_string(),
                });
            }
            _ => {}
        }

        Ok(Self {
            backend,
            document_db,
            content_api,
            flat_file,
        })
    }
}

/// Build the configured backend adapter.
///
/// The shared helper for the CLI and any embedding caller that needs an
/// `Arc<dyn BackendAdapter>` without retaining backend-specific handles.
pub async fn connect_from_config(
    config: &StoreConfig,
) -> Result<Arc<dyn BackendAdapter>, StoreError> {
    let adapter: Arc<dyn BackendAdapter> = match config.backend {
        BackendKind::DocumentDb => {
            let db = config.document_db.as_ref().ok_or_else(|| {
                StoreError::Unavailable {
                    reason: "document-db backend selected without its configuration".to_string(),
                }
            })?;
            Arc::new(DocumentDbAdapter::new(
                db.base_url.clone(),
                db.auth_token.clone(),
                db.poll_interval,
            )?)
        }
        BackendKind::ContentApi => {
            let api = config.content_api.as_ref().ok_or_else(|| {
                StoreError::Unavailable {
                    reason: "content-api backend selected without its configuration".to_string(),
                }
            })?;
            Arc::new(ContentApiAdapter::new(
                api.base_url.clone(),
                api.token.clone(),
                api.branch.clone(),
            )?)
        }
        BackendKind::FlatFile => Arc::new(FlatFileAdapter::open(config.flat_file.root.clone()).await?),
        BackendKind::Memory => Arc::new(MemoryAdapter::new()),
    };
    tracing::info!("using {} backend", adapter.name());
    Ok(adapter)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;

    use super::{BackendKind, StoreConfig};
    use crate::error::ConfigError;

    fn resolve(vars: &[(&str, &str)]) -> Result<StoreConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        StoreConfig::resolve_from(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_to_the_flat_file_backend() {
        let config = resolve(&[]).expect("empty env resolves");
        assert_eq!(config.backend, BackendKind::FlatFile);
    }

    #[test]
    fn selected_backend_must_be_configured() {
        let err = resolve(&[("FREIGHTFILE_BACKEND", "document-db")]).expect_err("no url");
        assert!(matches!(err, ConfigError::MissingValue { .. }));

        let config = resolve(&[
            ("FREIGHTFILE_BACKEND", "document-db"),
            ("FREIGHTFILE_DB_URL", "https://db.example.com/v1/projects/acme"),
        ])
        .expect("configured");
        assert_eq!(config.backend, BackendKind::DocumentDb);
        assert_eq!(
            config.document_db.expect("db config").poll_interval.as_secs(),
            2
        );
    }

    #[test]
    fn content_api_requires_a_token() {
        let err = resolve(&[
            ("FREIGHTFILE_BACKEND", "content-api"),
            (
                "FREIGHTFILE_CONTENT_URL",
                "https://api.example.com/repos/acme/jobfiles/contents",
            ),
        ])
        .expect_err("token missing");
        assert!(matches!(err, ConfigError::MissingValue { ref key } if key == "FREIGHTFILE_CONTENT_TOKEN"));
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let err = resolve(&[("FREIGHTFILE_BACKEND", "carrier-pigeon")]).expect_err("unknown");
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn backend_names_round_trip() {
        for kind in [
            BackendKind::DocumentDb,
            BackendKind::ContentApi,
            BackendKind::FlatFile,
            BackendKind::Memory,
        ] {
            let config = resolve(&[
                ("FREIGHTFILE_BACKEND", kind.as_str()),
                ("FREIGHTFILE_DB_URL", "https://db.example.com/v1"),
                ("FREIGHTFILE_CONTENT_URL", "https://api.example.com/contents"),
                ("FREIGHTFILE_CONTENT_TOKEN", "t"),
            ])
            .expect("resolves");
            assert_eq!(config.backend, kind);
        }
    }
}
