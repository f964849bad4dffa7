//! Provider configuration loaded from environment variables.
//!
//! With no provider URL the local backend is used, so everything runs
//! offline with zero configuration.

use std::path::PathBuf;
use std::sync::Arc;

use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use backchannel_realtime::{ChangeFeed, RealtimeClient, RealtimeError};

use crate::{DEFAULT_BUCKET, LocalBackend, Repo, RestBackend, StoreError};

/// Role claim carried by admin keys.
pub const SERVICE_ROLE: &str = "service_role";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set to use the hosted provider")]
    MissingVar(&'static str),

    #[error("Provider key is not a readable JWT: {0}")]
    Key(#[from] jsonwebtoken::errors::Error),

    #[error("Provider key has role '{found}', expected '{expected}'")]
    WrongRole { expected: &'static str, found: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Realtime(#[from] RealtimeError),
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Project base URL of the hosted provider.
    /// Env: `BACKCHANNEL_URL`. Unset selects the local backend.
    pub url: Option<String>,

    /// Public client key.
    /// Env: `BACKCHANNEL_ANON_KEY`
    pub anon_key: Option<String>,

    /// Admin key used by the upload endpoints.
    /// Env: `BACKCHANNEL_SERVICE_KEY`
    pub service_key: Option<String>,

    /// Storage bucket for attachments.
    /// Env: `BACKCHANNEL_BUCKET`
    /// Default: `discord-clone-files`
    pub bucket: String,

    /// Directory of the local backend.
    /// Env: `BACKCHANNEL_LOCAL_DIR`
    /// Default: `./backchannel-data`
    pub local_dir: PathBuf,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            url: None,
            anon_key: None,
            service_key: None,
            bucket: DEFAULT_BUCKET.to_string(),
            local_dir: PathBuf::from("./backchannel-data"),
        }
    }
}

/// A data-access handle plus the change feed that matches it.
pub struct Provider {
    pub repo: Repo,
    pub feed: Arc<dyn ChangeFeed>,
}

impl ProviderConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.url = non_empty_var("BACKCHANNEL_URL");
        config.anon_key = non_empty_var("BACKCHANNEL_ANON_KEY");
        config.service_key = non_empty_var("BACKCHANNEL_SERVICE_KEY");
        if let Some(bucket) = non_empty_var("BACKCHANNEL_BUCKET") {
            config.bucket = bucket;
        }
        if let Some(dir) = non_empty_var("BACKCHANNEL_LOCAL_DIR") {
            config.local_dir = PathBuf::from(dir);
        }
        config
    }

    pub fn is_local(&self) -> bool {
        self.url.is_none()
    }

    /// Client-side connection: anon key for tables and the realtime socket.
    pub async fn connect_client(&self) -> Result<Provider, ConfigError> {
        let Some(url) = &self.url else {
            return self.connect_local().await;
        };
        let key = self
            .anon_key
            .as_deref()
            .ok_or(ConfigError::MissingVar("BACKCHANNEL_ANON_KEY"))?;

        let backend = Arc::new(RestBackend::new(url, key)?);
        let feed = Arc::new(RealtimeClient::connect(url, key).await?);
        info!("Using hosted provider at {}", url);
        Ok(Provider {
            repo: Repo::new(backend, self.bucket.clone()),
            feed,
        })
    }

    /// Admin connection for the upload endpoints. The key must carry the
    /// service role.
    pub async fn connect_admin(&self) -> Result<Repo, ConfigError> {
        let Some(url) = &self.url else {
            return Ok(self.connect_local().await?.repo);
        };
        let key = self
            .service_key
            .as_deref()
            .ok_or(ConfigError::MissingVar("BACKCHANNEL_SERVICE_KEY"))?;

        let role = key_role(key)?;
        if role != SERVICE_ROLE {
            return Err(ConfigError::WrongRole {
                expected: SERVICE_ROLE,
                found: role,
            });
        }

        info!("Using hosted provider at {} with admin key", url);
        Ok(Repo::new(Arc::new(RestBackend::new(url, key)?), self.bucket.clone()))
    }

    async fn connect_local(&self) -> Result<Provider, ConfigError> {
        let backend = Arc::new(LocalBackend::open(&self.local_dir, &self.bucket).await?);
        let feed = Arc::new(backend.feed());
        info!("Using local backend in {}", self.local_dir.display());
        Ok(Provider {
            repo: Repo::new(backend, self.bucket.clone()),
            feed,
        })
    }
}

#[derive(Debug, Deserialize)]
struct KeyClaims {
    role: Option<String>,
}

/// Role claim of a provider key. The signature is not checked: the key is
/// our own configuration and only the provider can verify it.
pub fn key_role(key: &str) -> Result<String, ConfigError> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data = decode::<KeyClaims>(key, &DecodingKey::from_secret(&[]), &validation)?;
    Ok(data.claims.role.unwrap_or_default())
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
