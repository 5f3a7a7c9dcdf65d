use {
    secrecy::{ExposeSecret, Secret, SecretString},
    serde::{Deserialize, Serialize, Serializer},
};

/// OAuth 2.0 provider configuration.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub auth_url: String,
    pub token_url: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    /// Current-user endpoint used to verify a freshly issued access token.
    /// Verification is skipped when unset.
    pub profile_url: Option<String>,
}

/// Persisted token record.
///
/// `expires_at` is an absolute Unix timestamp in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthTokens {
    #[serde(serialize_with = "serialize_secret")]
    pub access_token: SecretString,
    #[serde(default, serialize_with = "serialize_option_secret")]
    pub refresh_token: Option<SecretString>,
    #[serde(default)]
    pub expires_at: Option<u64>,
}

impl OAuthTokens {
    /// Whether the access token is present and not yet expired at `now_ms`.
    pub fn is_valid_at(&self, now_ms: u64) -> bool {
        !self.access_token.expose_secret().is_empty()
            && self.expires_at.is_some_and(|at| now_ms < at)
    }
}

/// PKCE verifier/challenge pair.
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    pub verifier: String,
    pub challenge: String,
}

/// Where to send the user to grant access.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: String,
    pub challenge: String,
}

/// Query parameters delivered to the redirect URI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
    pub state: Option<String>,
}

impl CallbackParams {
    /// Parse a raw query string (with or without a leading `?`).
    pub fn from_query(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        let mut params = Self::default();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let value = Some(value.into_owned());
            match key.as_ref() {
                "code" => params.code = value,
                "error" => params.error = value,
                "error_description" => params.error_description = value,
                "state" => params.state = value,
                _ => {},
            }
        }
        params
    }

    /// Parse the query part of a full callback URL.
    pub fn from_url(raw: &str) -> Result<Self, url::ParseError> {
        let url = url::Url::parse(raw)?;
        Ok(Self::from_query(url.query().unwrap_or_default()))
    }
}

/// Body of a token endpoint response. Every field is optional so that a
/// malformed response can be reported precisely instead of as a JSON error.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
}

/// Error body returned by the token endpoint on rejection.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct TokenErrorBody {
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Current-user profile returned by the identity endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct UserProfile {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

pub fn serialize_secret<S: Serializer>(secret: &Secret<String>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(secret.expose_secret())
}

pub fn serialize_option_secret<S: Serializer>(
    secret: &Option<Secret<String>>,
    s: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(secret) => s.serialize_some(secret.expose_secret()),
        None => s.serialize_none(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn callback_params_from_query() {
        let params = CallbackParams::from_query("?code=ABC123&state=xyz");
        assert_eq!(params.code.as_deref(), Some("ABC123"));
        assert_eq!(params.state.as_deref(), Some("xyz"));
        assert!(params.error.is_none());
    }

    #[test]
    fn callback_params_from_url_with_error() {
        let params = CallbackParams::from_url(
            "http://127.0.0.1:3000/callback?error=access_denied&error_description=User%20said%20no",
        )
        .unwrap();
        assert_eq!(params.error.as_deref(), Some("access_denied"));
        assert_eq!(params.error_description.as_deref(), Some("User said no"));
        assert!(params.code.is_none());
    }

    #[test]
    fn tokens_roundtrip_through_json() {
        let tokens = OAuthTokens {
            access_token: Secret::new("AT1".into()),
            refresh_token: Some(Secret::new("RT1".into())),
            expires_at: Some(42),
        };
        let json = serde_json::to_string(&tokens).unwrap();
        assert!(json.contains("\"access_token\":\"AT1\""));
        let back: OAuthTokens = serde_json::from_str(&json).unwrap();
        assert_eq!(back.access_token.expose_secret(), "AT1");
        assert_eq!(
            back.refresh_token.as_ref().map(|t| t.expose_secret().as_str()),
            Some("RT1")
        );
        assert_eq!(back.expires_at, Some(42));
    }

    #[test]
    fn tokens_debug_redacts_secrets() {
        let tokens = OAuthTokens {
            access_token: Secret::new("super-secret".into()),
            refresh_token: None,
            expires_at: None,
        };
        assert!(!format!("{tokens:?}").contains("super-secret"));
    }

    #[test]
    fn validity_requires_expiry() {
        let tokens = OAuthTokens {
            access_token: Secret::new("AT".into()),
            refresh_token: None,
            expires_at: None,
        };
        assert!(!tokens.is_valid_at(0));
    }
}
