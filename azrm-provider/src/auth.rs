//! Authentication against Azure AD
//!
//! Bearer tokens for the resource manager come either from a service
//! principal secret (OAuth2 client credentials) or from the Azure CLI.

use std::process::Stdio;

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use log::debug;
use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::RwLock;

use crate::config::ProviderConfig;

/// Tokens are refreshed this long before they expire
const EXPIRY_MARGIN_SECS: i64 = 5 * 60;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("token endpoint returned {status}: {message}")]
    Token { status: u16, message: String },

    #[error("Azure CLI not found. Please install it or configure a client secret")]
    CliNotFound,

    #[error("az command failed: {0}")]
    CommandFailed(String),

    #[error("cannot parse token expiry {0:?}")]
    InvalidExpiry(String),

    #[error("no credentials configured: set ARM_CLIENT_SECRET or ARM_USE_CLI")]
    MissingCredentials,

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - chrono::Duration::seconds(EXPIRY_MARGIN_SECS) > now
    }
}

/// Something that can mint a new access token
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch(&self) -> Result<AccessToken, AuthError>;
}

// =============================================================================
// Client secret
// =============================================================================

pub struct ClientSecretCredential {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    scope: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Deserialize)]
struct TokenErrorResponse {
    #[serde(default)]
    error_description: String,
}

impl ClientSecretCredential {
    pub fn new(
        http: reqwest::Client,
        authority_host: &str,
        tenant_id: &str,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            http,
            token_url: format!("{}/{}/oauth2/v2.0/token", authority_host, tenant_id),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scope: scope.into(),
        }
    }
}

#[async_trait]
impl TokenSource for ClientSecretCredential {
    async fn fetch(&self) -> Result<AccessToken, AuthError> {
        debug!("requesting token from {}", self.token_url);

        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", self.scope.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            let message = serde_json::from_str::<TokenErrorResponse>(&body)
                .map(|e| e.error_description)
                .unwrap_or(body);
            return Err(AuthError::Token {
                status: status.as_u16(),
                message,
            });
        }

        let token: TokenResponse = serde_json::from_str(&body)?;
        Ok(AccessToken {
            token: token.access_token,
            expires_at: Utc::now() + chrono::Duration::seconds(token.expires_in),
        })
    }
}

// =============================================================================
// Azure CLI
// =============================================================================

pub struct AzureCliCredential {
    resource: String,
    tenant_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliToken {
    access_token: String,
    expires_on: Option<String>,
    /// Unix timestamp, only emitted by newer CLI versions
    #[serde(rename = "expires_on")]
    expires_on_unix: Option<i64>,
}

impl AzureCliCredential {
    pub fn new(resource: impl Into<String>, tenant_id: Option<String>) -> Self {
        Self {
            resource: resource.into(),
            tenant_id,
        }
    }
}

/// Parse the output of `az account get-access-token`
fn parse_cli_token(output: &str) -> Result<AccessToken, AuthError> {
    let parsed: CliToken = serde_json::from_str(output)?;

    let expires_at = match (parsed.expires_on_unix, parsed.expires_on) {
        (Some(ts), _) => Utc
            .timestamp_opt(ts, 0)
            .single()
            .ok_or_else(|| AuthError::InvalidExpiry(ts.to_string()))?,
        (None, Some(local)) => {
            // Older CLIs report local wall-clock time
            let naive = NaiveDateTime::parse_from_str(&local, "%Y-%m-%d %H:%M:%S%.f")
                .map_err(|_| AuthError::InvalidExpiry(local.clone()))?;
            Local
                .from_local_datetime(&naive)
                .earliest()
                .ok_or_else(|| AuthError::InvalidExpiry(local.clone()))?
                .with_timezone(&Utc)
        }
        (None, None) => return Err(AuthError::InvalidExpiry(String::new())),
    };

    Ok(AccessToken {
        token: parsed.access_token,
        expires_at,
    })
}

#[async_trait]
impl TokenSource for AzureCliCredential {
    async fn fetch(&self) -> Result<AccessToken, AuthError> {
        let mut args = vec![
            "account",
            "get-access-token",
            "--resource",
            self.resource.as_str(),
            "--output",
            "json",
        ];
        if let Some(tenant) = &self.tenant_id {
            args.push("--tenant");
            args.push(tenant);
        }

        debug!("Running: az {}", args.join(" "));

        let mut cmd = Command::new("az");
        cmd.args(&args);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let output = match cmd.output().await {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AuthError::CliNotFound);
            }
            Err(e) => return Err(e.into()),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AuthError::CommandFailed(stderr.trim().to_string()));
        }

        parse_cli_token(&String::from_utf8_lossy(&output.stdout))
    }
}

// =============================================================================
// Cached credential
// =============================================================================

/// Token source with a cache shared by every request
pub struct Credential {
    source: Box<dyn TokenSource>,
    cached: RwLock<Option<AccessToken>>,
}

impl Credential {
    pub fn new(source: impl TokenSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            cached: RwLock::new(None),
        }
    }

    /// Pick the token source the configuration asks for
    pub fn from_config(config: &ProviderConfig, http: reqwest::Client) -> Result<Self, AuthError> {
        let env = config.environment;
        if config.use_cli {
            return Ok(Self::new(AzureCliCredential::new(
                env.resource_manager_endpoint(),
                config.tenant_id.clone(),
            )));
        }

        match (&config.tenant_id, &config.client_id, &config.client_secret) {
            (Some(tenant), Some(client), Some(secret)) => {
                Ok(Self::new(ClientSecretCredential::new(
                    http,
                    env.authority_host(),
                    tenant,
                    client.clone(),
                    secret.clone(),
                    env.token_scope(),
                )))
            }
            _ => Err(AuthError::MissingCredentials),
        }
    }

    /// Current bearer token, refreshed when it is about to expire
    pub async fn token(&self) -> Result<String, AuthError> {
        let now = Utc::now();
        if let Some(token) = self.cached.read().await.as_ref()
            && token.is_fresh(now)
        {
            return Ok(token.token.clone());
        }

        let mut cached = self.cached.write().await;
        if let Some(token) = cached.as_ref()
            && token.is_fresh(now)
        {
            return Ok(token.token.clone());
        }

        let token = self.source.fetch().await?;
        debug!("acquired token valid until {}", token.expires_at);
        let value = token.token.clone();
        *cached = Some(token);
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    struct CountingSource {
        calls: Arc<AtomicUsize>,
        lifetime_secs: i64,
    }

    #[async_trait]
    impl TokenSource for CountingSource {
        async fn fetch(&self) -> Result<AccessToken, AuthError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(AccessToken {
                token: format!("token-{}", n),
                expires_at: Utc::now() + chrono::Duration::seconds(self.lifetime_secs),
            })
        }
    }

    #[tokio::test]
    async fn token_is_cached_until_near_expiry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let credential = Credential::new(CountingSource {
            calls: calls.clone(),
            lifetime_secs: 3600,
        });

        assert_eq!(credential.token().await.unwrap(), "token-0");
        assert_eq!(credential.token().await.unwrap(), "token-0");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn token_inside_margin_is_refreshed() {
        let calls = Arc::new(AtomicUsize::new(0));
        let credential = Credential::new(CountingSource {
            calls: calls.clone(),
            lifetime_secs: 60,
        });

        assert_eq!(credential.token().await.unwrap(), "token-0");
        assert_eq!(credential.token().await.unwrap(), "token-1");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn parse_cli_token_with_unix_expiry() {
        let token = parse_cli_token(
            r#"{"accessToken":"abc","expiresOn":"2030-01-01 00:00:00.000000","expires_on":1893456000,"tokenType":"Bearer"}"#,
        )
        .unwrap();
        assert_eq!(token.token, "abc");
        assert_eq!(token.expires_at.timestamp(), 1893456000);
    }

    #[test]
    fn parse_cli_token_with_local_expiry() {
        let token =
            parse_cli_token(r#"{"accessToken":"abc","expiresOn":"2030-01-01 00:00:00.000000"}"#)
                .unwrap();
        assert!(token.expires_at > Utc::now());
    }

    #[test]
    fn parse_cli_token_without_expiry_fails() {
        assert!(matches!(
            parse_cli_token(r#"{"accessToken":"abc"}"#),
            Err(AuthError::InvalidExpiry(_))
        ));
    }
}
