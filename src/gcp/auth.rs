//! Bearer tokens for the REST API.

use std::sync::Arc;

use async_trait::async_trait;

use super::backend::BackendError;

/// Enough to list log entries.
const SCOPES: &[&str] = &["https://www.googleapis.com/auth/logging.read"];

/// Hands out a currently valid token for every request.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> Result<String, BackendError>;
}

/// A fixed token, it stops working once it expires.
pub struct StaticToken(pub String);

#[async_trait]
impl TokenSource for StaticToken {
    async fn token(&self) -> Result<String, BackendError> {
        Ok(self.0.clone())
    }
}

/// Application default credentials: a service account key file, the gcloud
/// user credentials or the metadata server.
pub struct DefaultCredentials {
    provider: Arc<dyn gcp_auth::TokenProvider>,
}

impl DefaultCredentials {
    pub async fn new() -> Result<DefaultCredentials, BackendError> {
        let provider = gcp_auth::provider().await?;
        Ok(DefaultCredentials { provider })
    }
}

#[async_trait]
impl TokenSource for DefaultCredentials {
    async fn token(&self) -> Result<String, BackendError> {
        // the provider caches the token and fetches a new one shortly before
        // it expires
        let token = self.provider.token(SCOPES).await?;
        Ok(token.as_str().to_string())
    }
}
