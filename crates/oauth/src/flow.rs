use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
};

use {
    secrecy::ExposeSecret,
    tracing::{debug, info, warn},
};

use crate::{
    error::{AuthError, AuthErrorKind, Result, StorageError},
    storage::{KeyValueStore, PKCE_VERIFIER_KEY},
    token_store::TokenStore,
    types::{
        AuthorizationRequest, CallbackParams, OAuthConfig, PkceChallenge, TokenErrorBody,
        TokenResponse, UserProfile,
    },
};

/// Where a login attempt currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Idle,
    Redirecting,
    AwaitingCallback,
    Exchanging,
    Authenticated,
    Failed(AuthErrorKind),
}

/// Successful result of handling a callback.
#[derive(Debug)]
pub enum CallbackOutcome {
    Authenticated { profile: Option<UserProfile> },
    /// A previous invocation already consumed this callback; nothing was done.
    AlreadyHandled,
}

/// Tokens accepted from the token endpoint, before they are stored.
struct IssuedTokens {
    access_token: secrecy::SecretString,
    refresh_token: String,
    expires_in: u64,
}

/// PKCE authorization-code flow against a single provider.
///
/// The controller owns a one-shot latch so a callback is exchanged at most
/// once, no matter how often `handle_callback` is re-entered. `start_login`
/// re-arms it.
pub struct AuthFlow {
    config: OAuthConfig,
    storage: Arc<dyn KeyValueStore>,
    tokens: TokenStore,
    client: reqwest::Client,
    state: Mutex<FlowState>,
    exchange_attempted: AtomicBool,
}

impl AuthFlow {
    pub fn new(config: OAuthConfig, storage: Arc<dyn KeyValueStore>, tokens: TokenStore) -> Self {
        Self {
            config,
            storage,
            tokens,
            client: reqwest::Client::new(),
            state: Mutex::new(FlowState::Idle),
            exchange_attempted: AtomicBool::new(false),
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    pub fn state(&self) -> FlowState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: FlowState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        debug!(from = ?*state, to = ?next, "auth flow transition");
        *state = next;
    }

    /// Begin a login: replace any stale verifier with a fresh one and build the
    /// authorization URL the user must be sent to.
    ///
    /// Nothing is sent over the network. If the verifier cannot be persisted
    /// no URL is returned.
    pub fn start_login(&self) -> Result<AuthorizationRequest> {
        self.set_state(FlowState::Redirecting);
        self.exchange_attempted.store(false, Ordering::SeqCst);

        match self.prepare_redirect() {
            Ok(request) => {
                self.set_state(FlowState::AwaitingCallback);
                info!(auth_url = %self.config.auth_url, "login started");
                Ok(request)
            },
            Err(e) => {
                self.set_state(FlowState::Failed(e.kind()));
                warn!(error = %e, "could not start login");
                Err(e)
            },
        }
    }

    fn prepare_redirect(&self) -> Result<AuthorizationRequest> {
        self.storage.delete(PKCE_VERIFIER_KEY)?;

        let pkce = PkceChallenge::generate();
        self.storage.set(PKCE_VERIFIER_KEY, &pkce.verifier)?;
        if self.storage.get(PKCE_VERIFIER_KEY)?.as_deref() != Some(pkce.verifier.as_str()) {
            return Err(
                StorageError::Unavailable("stored verifier did not read back".into()).into(),
            );
        }

        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("client_id", &self.config.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("code_challenge_method", pkce.method())
            .append_pair("code_challenge", &pkce.challenge)
            .append_pair("scope", &self.config.scopes.join(" "))
            .append_pair("show_dialog", "true")
            .finish();

        Ok(AuthorizationRequest {
            url: format!("{}?{query}", self.config.auth_url),
            challenge: pkce.challenge,
        })
    }

    /// Handle the provider's redirect back to us.
    ///
    /// On success the token record is written and the verifier removed. On any
    /// failure the verifier is removed and the token record is cleared, so a
    /// failed re-login never leaves an older session authenticated.
    pub async fn handle_callback(&self, params: &CallbackParams) -> Result<CallbackOutcome> {
        if self.exchange_attempted.swap(true, Ordering::SeqCst) {
            debug!("callback already handled, skipping");
            return Ok(CallbackOutcome::AlreadyHandled);
        }
        self.set_state(FlowState::Exchanging);

        let result = match self.complete_callback(params).await {
            Ok(profile) => self.consume_verifier().map(|()| profile),
            Err(e) => Err(e),
        };

        match result {
            Ok(profile) => {
                self.set_state(FlowState::Authenticated);
                info!(
                    user = profile.as_ref().map(|p| p.id.as_str()),
                    "login complete"
                );
                Ok(CallbackOutcome::Authenticated { profile })
            },
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn complete_callback(&self, params: &CallbackParams) -> Result<Option<UserProfile>> {
        if let Some(error) = &params.error {
            let reason = match &params.error_description {
                Some(description) => format!("{error}: {description}"),
                None => error.clone(),
            };
            return Err(AuthError::AuthorizationDenied { reason });
        }

        let code = params
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or(AuthError::MissingAuthorizationCode)?;

        let verifier = self
            .storage
            .get(PKCE_VERIFIER_KEY)?
            .filter(|v| !v.is_empty())
            .ok_or(AuthError::MissingVerifier)?;

        let issued = self.exchange(code, &verifier).await?;

        let profile = match &self.config.profile_url {
            Some(url) => Some(self.verify(url, issued.access_token.expose_secret()).await?),
            None => None,
        };

        self.tokens.set_tokens(
            issued.access_token.expose_secret().as_str(),
            Some(issued.refresh_token),
            issued.expires_in,
        )?;
        Ok(profile)
    }

    async fn exchange(&self, code: &str, verifier: &str) -> Result<IssuedTokens> {
        debug!(token_url = %self.config.token_url, "exchanging authorization code");
        let resp = self
            .client
            .post(&self.config.token_url)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("client_id", self.config.client_id.as_str()),
                ("code_verifier", verifier),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body: TokenErrorBody = resp.json().await.unwrap_or_default();
            return Err(AuthError::ExchangeRejected {
                status: status.as_u16(),
                description: body.error_description.or(body.error),
            });
        }

        let body: TokenResponse = resp
            .json()
            .await
            .map_err(|e| AuthError::InvalidTokenResponse(format!("malformed body: {e}")))?;

        let access_token = body
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::InvalidTokenResponse("missing access_token".into()))?;
        let refresh_token = body
            .refresh_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::InvalidTokenResponse("missing refresh_token".into()))?;
        let expires_in = body
            .expires_in
            .ok_or_else(|| AuthError::InvalidTokenResponse("missing expires_in".into()))?;

        Ok(IssuedTokens {
            access_token: secrecy::Secret::new(access_token),
            refresh_token,
            expires_in,
        })
    }

    async fn verify(&self, url: &str, access_token: &str) -> Result<UserProfile> {
        let resp = self.client.get(url).bearer_auth(access_token).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body: serde_json::Value = resp.json().await.unwrap_or_default();
            let message = body["error"]["message"]
                .as_str()
                .unwrap_or("unknown error")
                .to_string();
            return Err(AuthError::TokenVerificationFailed {
                status: status.as_u16(),
                message,
            });
        }
        resp.json::<UserProfile>()
            .await
            .map_err(|e| AuthError::TokenVerificationFailed {
                status: status.as_u16(),
                message: format!("malformed profile: {e}"),
            })
    }

    /// Accept a legacy implicit-grant redirect, whose token arrives in the URL
    /// fragment (`#access_token=...&expires_in=...`). No refresh token is issued.
    pub fn handle_implicit_callback(&self, fragment: &str) -> Result<CallbackOutcome> {
        if self.exchange_attempted.swap(true, Ordering::SeqCst) {
            debug!("implicit callback already handled, skipping");
            return Ok(CallbackOutcome::AlreadyHandled);
        }

        self.set_state(FlowState::Exchanging);

        let result = self
            .store_implicit_token(fragment)
            .and_then(|()| self.consume_verifier());

        match result {
            Ok(()) => {
                self.set_state(FlowState::Authenticated);
                info!("login complete (implicit grant)");
                Ok(CallbackOutcome::Authenticated { profile: None })
            },
            Err(e) => Err(self.fail(e)),
        }
    }

    fn store_implicit_token(&self, fragment: &str) -> Result<()> {
        let fragment = fragment.strip_prefix('#').unwrap_or(fragment);
        let mut access_token = None;
        let mut expires_in = None;
        for (key, value) in url::form_urlencoded::parse(fragment.as_bytes()) {
            match key.as_ref() {
                "error" => {
                    return Err(AuthError::AuthorizationDenied {
                        reason: value.into_owned(),
                    });
                },
                "access_token" => access_token = Some(value.into_owned()),
                "expires_in" => expires_in = value.parse::<u64>().ok(),
                _ => {},
            }
        }

        let access_token = access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::InvalidTokenResponse("missing access_token".into()))?;
        let expires_in = expires_in
            .ok_or_else(|| AuthError::InvalidTokenResponse("missing expires_in".into()))?;

        self.tokens.set_tokens(access_token, None, expires_in)?;
        Ok(())
    }

    /// Give up on a login that never received its callback.
    pub fn abandon(&self) {
        self.discard_verifier();
        self.set_state(FlowState::Idle);
        info!("login abandoned");
    }

    /// Remove the verifier after a successful login. If it cannot be removed
    /// the login is rolled back: a verifier must never outlive its exchange.
    fn consume_verifier(&self) -> Result<()> {
        if let Err(e) = self.storage.delete(PKCE_VERIFIER_KEY) {
            self.discard_tokens();
            return Err(e.into());
        }
        Ok(())
    }

    /// Terminal failure of a callback: drop the verifier and any token record.
    fn fail(&self, e: AuthError) -> AuthError {
        self.discard_verifier();
        self.discard_tokens();
        self.set_state(FlowState::Failed(e.kind()));
        warn!(kind = %e.kind(), error = %e, "login failed");
        e
    }

    fn discard_tokens(&self) {
        if let Err(e) = self.tokens.clear_tokens() {
            warn!(error = %e, "could not clear token record");
        }
    }

    fn discard_verifier(&self) {
        if let Err(e) = self.storage.delete(PKCE_VERIFIER_KEY) {
            warn!(error = %e, "could not delete PKCE verifier");
        }
    }
}
