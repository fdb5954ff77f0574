use crate::domain::models::OAuthToken;
use crate::infrastructure::config::OAuthClientSettings;
use crate::infrastructure::credential_store::CredentialStore;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::oauth_client::{
    OAuthCodeExchangeRequest, OAuthHttpClient, OAuthRefreshRequest, OAuthRevokeRequest,
    OAuthTokenResponse,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use url::Url;

const DEFAULT_TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_AUTHORIZATION_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const DEFAULT_REVOKE_ENDPOINT: &str = "https://oauth2.googleapis.com/revoke";

static NEXT_STATE: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub token_endpoint: String,
    pub authorization_endpoint: String,
    pub revoke_endpoint: String,
}

impl OAuthConfig {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            scopes,
            token_endpoint: DEFAULT_TOKEN_ENDPOINT.to_string(),
            authorization_endpoint: DEFAULT_AUTHORIZATION_ENDPOINT.to_string(),
            revoke_endpoint: DEFAULT_REVOKE_ENDPOINT.to_string(),
        }
    }
}

impl From<OAuthClientSettings> for OAuthConfig {
    fn from(settings: OAuthClientSettings) -> Self {
        Self::new(
            settings.client_id,
            settings.client_secret,
            settings.redirect_uri,
            settings.scopes,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnsureTokenResult {
    Existing(OAuthToken),
    Refreshed(OAuthToken),
    ReauthenticationRequired,
}

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub struct OAuthManager<S, C>
where
    S: CredentialStore,
    C: OAuthHttpClient,
{
    config: OAuthConfig,
    credential_store: Arc<S>,
    oauth_client: Arc<C>,
    now_provider: NowProvider,
}

impl<S, C> OAuthManager<S, C>
where
    S: CredentialStore,
    C: OAuthHttpClient,
{
    pub fn new(config: OAuthConfig, credential_store: Arc<S>, oauth_client: Arc<C>) -> Self {
        Self {
            config,
            credential_store,
            oauth_client,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn is_token_valid(&self, token: &OAuthToken) -> bool {
        token.is_valid_at((self.now_provider)(), 60)
    }

    pub fn build_authorization_url(&self, state: &str) -> Result<String, InfraError> {
        if state.trim().is_empty() {
            return Err(InfraError::OAuth("state must not be empty".to_string()));
        }
        if self.config.scopes.is_empty() {
            return Err(InfraError::OAuth("at least one scope is required".to_string()));
        }

        let mut url = Url::parse(&self.config.authorization_endpoint)
            .map_err(|error| InfraError::OAuth(format!("invalid authorization endpoint: {error}")))?;
        let scope = self.config.scopes.join(" ");

        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("scope", &scope)
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent")
            .append_pair("state", state);

        Ok(url.to_string())
    }

    pub async fn authenticate_with_code(&self, authorization_code: &str) -> Result<OAuthToken, InfraError> {
        if authorization_code.trim().is_empty() {
            return Err(InfraError::OAuth("authorization code must not be empty".to_string()));
        }

        let response = self
            .oauth_client
            .exchange_authorization_code(OAuthCodeExchangeRequest {
                token_endpoint: self.config.token_endpoint.clone(),
                client_id: self.config.client_id.clone(),
                client_secret: self.config.client_secret.clone(),
                redirect_uri: self.config.redirect_uri.clone(),
                authorization_code: authorization_code.trim().to_string(),
            })
            .await?;

        let token = self.token_from_response(response, None);
        self.credential_store.save_token(&token)?;
        Ok(token)
    }

    pub async fn ensure_access_token(&self) -> Result<EnsureTokenResult, InfraError> {
        let Some(stored_token) = self.credential_store.load_token()? else {
            return Ok(EnsureTokenResult::ReauthenticationRequired);
        };

        if self.is_token_valid(&stored_token) {
            return Ok(EnsureTokenResult::Existing(stored_token));
        }

        let Some(refresh_token) = stored_token.refresh_token.clone() else {
            return Ok(EnsureTokenResult::ReauthenticationRequired);
        };

        let refreshed = self
            .oauth_client
            .refresh_access_token(OAuthRefreshRequest {
                token_endpoint: self.config.token_endpoint.clone(),
                client_id: self.config.client_id.clone(),
                client_secret: self.config.client_secret.clone(),
                refresh_token,
            })
            .await;

        match refreshed {
            Ok(response) => {
                let token = self.token_from_response(response, stored_token.refresh_token);
                self.credential_store.save_token(&token)?;
                Ok(EnsureTokenResult::Refreshed(token))
            }
            Err(InfraError::OAuth(_)) => Ok(EnsureTokenResult::ReauthenticationRequired),
            Err(error) => Err(error),
        }
    }

    /// Revokes `access_token` at the provider (best effort) and forgets the stored token.
    pub async fn sign_out(&self, access_token: &str) -> Result<(), InfraError> {
        if !access_token.trim().is_empty() {
            let revoked = self
                .oauth_client
                .revoke_token(OAuthRevokeRequest {
                    revoke_endpoint: self.config.revoke_endpoint.clone(),
                    token: access_token.to_string(),
                })
                .await;
            if let Err(error) = revoked {
                tracing::warn!(error = %error, "token_revoke_failed");
            }
        }
        self.credential_store.delete_token()
    }

    fn token_from_response(
        &self,
        response: OAuthTokenResponse,
        fallback_refresh_token: Option<String>,
    ) -> OAuthToken {
        let expires_at = (self.now_provider)() + Duration::seconds(response.expires_in.max(0));
        OAuthToken {
            access_token: response.access_token,
            refresh_token: response.refresh_token.or(fallback_refresh_token),
            expires_at,
            token_type: response.token_type.unwrap_or_else(|| "Bearer".to_string()),
            scope: response.scope,
        }
    }
}

/// Shows the consent page to the user and hands back the authorization code.
#[async_trait]
pub trait AuthorizationPrompt: Send + Sync {
    /// `Ok(None)` means the user dismissed the prompt.
    async fn request_authorization_code(
        &self,
        authorization_url: &str,
    ) -> Result<Option<String>, InfraError>;
}

/// Identity broker used by the calendar side: hands out bearer tokens.
#[async_trait]
pub trait TokenBroker: Send + Sync {
    /// Returns a usable access token. Without `interactive` the user is never prompted and a
    /// missing sign-in is [`InfraError::AuthenticationRequired`].
    async fn acquire_token(&self, interactive: bool) -> Result<String, InfraError>;

    async fn release_token(&self, access_token: &str) -> Result<(), InfraError>;
}

pub struct OAuthTokenBroker<S, C, P>
where
    S: CredentialStore,
    C: OAuthHttpClient,
    P: AuthorizationPrompt,
{
    manager: OAuthManager<S, C>,
    prompt: Arc<P>,
}

impl<S, C, P> OAuthTokenBroker<S, C, P>
where
    S: CredentialStore,
    C: OAuthHttpClient,
    P: AuthorizationPrompt,
{
    pub fn new(manager: OAuthManager<S, C>, prompt: Arc<P>) -> Self {
        Self { manager, prompt }
    }

    fn next_state() -> String {
        let sequence = NEXT_STATE.fetch_add(1, Ordering::Relaxed);
        format!("slot-autofill-{}-{sequence}", Utc::now().timestamp_micros())
    }
}

#[async_trait]
impl<S, C, P> TokenBroker for OAuthTokenBroker<S, C, P>
where
    S: CredentialStore,
    C: OAuthHttpClient,
    P: AuthorizationPrompt,
{
    async fn acquire_token(&self, interactive: bool) -> Result<String, InfraError> {
        match self.manager.ensure_access_token().await? {
            EnsureTokenResult::Existing(token) | EnsureTokenResult::Refreshed(token) => {
                return Ok(token.access_token);
            }
            EnsureTokenResult::ReauthenticationRequired if !interactive => {
                return Err(InfraError::AuthenticationRequired);
            }
            EnsureTokenResult::ReauthenticationRequired => {}
        }

        let authorization_url = self.manager.build_authorization_url(&Self::next_state())?;
        let Some(code) = self
            .prompt
            .request_authorization_code(&authorization_url)
            .await?
        else {
            return Err(InfraError::AuthenticationRequired);
        };
        let token = self.manager.authenticate_with_code(&code).await?;
        tracing::info!("oauth_sign_in_completed");
        Ok(token.access_token)
    }

    async fn release_token(&self, access_token: &str) -> Result<(), InfraError> {
        self.manager.sign_out(access_token).await
    }
}
