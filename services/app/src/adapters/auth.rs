//! services/app/src/adapters/auth.rs
//!
//! Adapter for the third-party identity provider. It implements the
//! `AuthProvider` port against the provider's token endpoints.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use marketplace_core::{AuthGrant, AuthProvider, PortError, PortResult, Session};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::adapters::rest::checked;

//=========================================================================================
// Wire Types
//=========================================================================================

#[derive(Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Serialize)]
struct RecoverRequest<'a> {
    email: &'a str,
}

#[derive(Deserialize)]
struct TokenUser {
    id: Uuid,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: i64,
    user: TokenUser,
}

impl TokenResponse {
    fn into_grant(self) -> PortResult<AuthGrant> {
        let expires_at = TimeDelta::try_seconds(self.expires_in.max(0))
            .and_then(|ttl| Utc::now().checked_add_signed(ttl))
            .ok_or_else(|| {
                PortError::Unexpected(format!("token lifetime out of range: {}s", self.expires_in))
            })?;
        Ok(AuthGrant {
            session: Session {
                user_id: self.user.id,
                access_token: self.access_token,
                expires_at,
            },
            refresh_token: self.refresh_token,
        })
    }
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

#[derive(Clone)]
pub struct HttpAuthProvider {
    client: Client,
    base_url: String,
}

impl HttpAuthProvider {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn grant(&self, path: &str, body: &impl Serialize) -> PortResult<AuthGrant> {
        let response = checked(self.client.post(self.url(path)).json(body))
            .await
            .map_err(rejected_credentials)?;
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| PortError::Unexpected(format!("unexpected token response: {}", e)))?;
        token.into_grant()
    }
}

/// Identity providers answer bad credentials with 400 rather than 401.
fn rejected_credentials(err: PortError) -> PortError {
    match err {
        PortError::Backend { status: 400, .. } => PortError::Unauthorized,
        other => other,
    }
}

//=========================================================================================
// `AuthProvider` Trait Implementation
//=========================================================================================

#[async_trait]
impl AuthProvider for HttpAuthProvider {
    async fn sign_in(&self, email: &str, password: &str) -> PortResult<AuthGrant> {
        let grant = self
            .grant("/token?grant_type=password", &Credentials { email, password })
            .await?;
        info!("Signed in as {}", grant.session.user_id);
        Ok(grant)
    }

    async fn sign_up(&self, email: &str, password: &str) -> PortResult<AuthGrant> {
        self.grant("/signup", &Credentials { email, password }).await
    }

    async fn refresh_session(&self, refresh_token: &str) -> PortResult<AuthGrant> {
        self.grant(
            "/token?grant_type=refresh_token",
            &RefreshRequest { refresh_token },
        )
        .await
    }

    async fn sign_out(&self, access_token: &str) -> PortResult<()> {
        checked(self.client.post(self.url("/logout")).bearer_auth(access_token))
            .await
            .map(|_| ())
    }

    async fn request_password_reset(&self, email: &str) -> PortResult<()> {
        checked(self.client.post(self.url("/recover")).json(&RecoverRequest { email }))
            .await
            .map(|_| ())
    }
}
