use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

/// Startup authentication: every client presents the shared API key as its password.
/// Per-user credentials are checked later, through the `sessions` table.
#[derive(Debug)]
pub struct ApiKeyAuthSource {
    api_key: String,
}

impl ApiKeyAuthSource {
    pub fn new(api_key: String) -> Self {
        Self { api_key }
    }
}

#[async_trait]
impl AuthSource for ApiKeyAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        tracing::debug!("startup from {:?} on {:?}", login.user(), login.database());
        Ok(Password::new(None, self.api_key.as_bytes().to_vec()))
    }
}
