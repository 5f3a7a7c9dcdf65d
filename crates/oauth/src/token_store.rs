use std::{
    sync::{Arc, PoisonError, RwLock},
    time::{SystemTime, UNIX_EPOCH},
};

use {
    secrecy::{ExposeSecret, Secret, SecretString},
    tracing::{info, warn},
};

use crate::{
    error::StorageError,
    storage::{AUTH_STATE_KEY, KeyValueStore},
    types::OAuthTokens,
};

/// Current wall-clock time in Unix milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Shared handle to the client's single token record.
///
/// Clones share the same record. Every mutation replaces the whole record and
/// is written to durable storage before it becomes visible to readers; if the
/// write fails the previous record stays in place.
#[derive(Clone)]
pub struct TokenStore {
    record: Arc<RwLock<Option<OAuthTokens>>>,
    storage: Arc<dyn KeyValueStore>,
}

impl TokenStore {
    /// Restore the persisted record, if any. Unreadable state is treated as
    /// logged out.
    pub fn load(storage: Arc<dyn KeyValueStore>) -> Self {
        let record = match storage.get(AUTH_STATE_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<OAuthTokens>(&raw) {
                Ok(tokens) => Some(tokens),
                Err(e) => {
                    warn!(error = %e, "ignoring corrupt persisted auth state");
                    None
                },
            },
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "could not read persisted auth state");
                None
            },
        };
        Self {
            record: Arc::new(RwLock::new(record)),
            storage,
        }
    }

    /// Store a freshly issued token; `expires_at = now + expires_in_secs * 1000`.
    pub fn set_tokens(
        &self,
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_in_secs: u64,
    ) -> Result<(), StorageError> {
        self.set_tokens_at(access_token, refresh_token, expires_in_secs, now_ms())
    }

    pub fn set_tokens_at(
        &self,
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_in_secs: u64,
        now_ms: u64,
    ) -> Result<(), StorageError> {
        let expires_at = now_ms.saturating_add(expires_in_secs.saturating_mul(1000));
        self.replace(OAuthTokens {
            access_token: Secret::new(access_token.into()),
            refresh_token: refresh_token.map(Secret::new),
            expires_at: Some(expires_at),
        })
    }

    /// Replace the whole record.
    pub fn replace(&self, tokens: OAuthTokens) -> Result<(), StorageError> {
        let raw = serde_json::to_string(&tokens)?;
        let mut record = self.record.write().unwrap_or_else(PoisonError::into_inner);
        self.storage.set(AUTH_STATE_KEY, &raw)?;
        info!(
            expires_at = tokens.expires_at,
            has_refresh_token = tokens.refresh_token.is_some(),
            "stored access token"
        );
        *record = Some(tokens);
        Ok(())
    }

    pub fn clear_tokens(&self) -> Result<(), StorageError> {
        let mut record = self.record.write().unwrap_or_else(PoisonError::into_inner);
        self.storage.delete(AUTH_STATE_KEY)?;
        if record.take().is_some() {
            info!("cleared access token");
        }
        Ok(())
    }

    pub fn logout(&self) -> Result<(), StorageError> {
        self.clear_tokens()
    }

    /// True iff an access token is present and has not expired. Never refreshes.
    pub fn is_authenticated(&self) -> bool {
        self.is_authenticated_at(now_ms())
    }

    pub fn is_authenticated_at(&self, now_ms: u64) -> bool {
        self.record
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|tokens| tokens.is_valid_at(now_ms))
    }

    /// Snapshot of the current record.
    pub fn record(&self) -> Option<OAuthTokens> {
        self.record
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Current access token, expired or not; callers decide whether to use it.
    pub fn access_token(&self) -> Option<SecretString> {
        self.record().map(|tokens| tokens.access_token)
    }

    pub fn refresh_token(&self) -> Option<SecretString> {
        self.record().and_then(|tokens| tokens.refresh_token)
    }

    pub fn expires_at(&self) -> Option<u64> {
        self.record().and_then(|tokens| tokens.expires_at)
    }

    /// `Authorization` header value for provider API calls.
    pub fn bearer_header(&self) -> Option<String> {
        self.access_token()
            .filter(|token| !token.expose_secret().is_empty())
            .map(|token| format!("Bearer {}", token.expose_secret()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use crate::storage::{FileStore, MemoryStore, testing::FlakyStore};

    fn memory() -> (Arc<MemoryStore>, TokenStore) {
        let storage = Arc::new(MemoryStore::new());
        let store = TokenStore::load(storage.clone());
        (storage, store)
    }

    #[test]
    fn cold_start_is_unauthenticated() {
        let (_, store) = memory();
        assert!(store.record().is_none());
        assert!(!store.is_authenticated());
        assert!(store.bearer_header().is_none());
    }

    #[test]
    fn set_tokens_computes_absolute_expiry() {
        let (_, store) = memory();
        store
            .set_tokens_at("AT1", Some("RT1".into()), 3600, 1_000)
            .unwrap();
        assert_eq!(store.expires_at(), Some(1_000 + 3_600_000));
        assert_eq!(store.access_token().unwrap().expose_secret(), "AT1");
        assert_eq!(store.refresh_token().unwrap().expose_secret(), "RT1");
        assert_eq!(store.bearer_header().as_deref(), Some("Bearer AT1"));
    }

    #[test]
    fn expiry_boundaries() {
        let (_, store) = memory();
        let now = now_ms();
        store
            .replace(OAuthTokens {
                access_token: Secret::new("AT".into()),
                refresh_token: None,
                expires_at: Some(now - 1),
            })
            .unwrap();
        assert!(!store.is_authenticated_at(now));

        store
            .replace(OAuthTokens {
                access_token: Secret::new("AT".into()),
                refresh_token: None,
                expires_at: Some(now + 3_600_000),
            })
            .unwrap();
        assert!(store.is_authenticated_at(now));
        assert!(store.is_authenticated());
    }

    #[test]
    fn missing_expiry_is_unauthenticated() {
        let (_, store) = memory();
        store
            .replace(OAuthTokens {
                access_token: Secret::new("AT".into()),
                refresh_token: None,
                expires_at: None,
            })
            .unwrap();
        assert!(!store.is_authenticated());
    }

    #[test]
    fn clear_always_unauthenticates() {
        let (storage, store) = memory();
        store.clear_tokens().unwrap();
        assert!(!store.is_authenticated());

        store.set_tokens("AT", Some("RT".into()), 3600).unwrap();
        assert!(store.is_authenticated());
        store.logout().unwrap();
        assert!(!store.is_authenticated());
        assert!(store.record().is_none());
        assert!(storage.get(AUTH_STATE_KEY).unwrap().is_none());
    }

    #[test]
    fn clones_share_the_record() {
        let (_, store) = memory();
        let reader = store.clone();
        store.set_tokens("AT", None, 60).unwrap();
        assert!(reader.is_authenticated());
        store.clear_tokens().unwrap();
        assert!(!reader.is_authenticated());
    }

    #[test]
    fn record_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");

        let store = TokenStore::load(Arc::new(FileStore::new(&path)));
        store
            .set_tokens_at("AT1", Some("RT1".into()), 3600, 5)
            .unwrap();

        let reloaded = TokenStore::load(Arc::new(FileStore::new(&path)));
        let record = reloaded.record().unwrap();
        assert_eq!(record.access_token.expose_secret(), "AT1");
        assert_eq!(record.expires_at, Some(3_600_005));
    }

    #[test]
    fn corrupt_persisted_state_loads_as_empty() {
        let storage = Arc::new(MemoryStore::new());
        storage.set(AUTH_STATE_KEY, "{ nope").unwrap();
        let store = TokenStore::load(storage);
        assert!(store.record().is_none());
        assert!(!store.is_authenticated());
    }

    #[test]
    fn failed_write_keeps_previous_record() {
        let storage = Arc::new(FlakyStore::default());
        let store = TokenStore::load(storage.clone());
        store.set_tokens("OLD", Some("RT".into()), 3600).unwrap();

        storage.set_failing(true);
        assert!(store.set_tokens("NEW", None, 3600).is_err());
        assert_eq!(store.access_token().unwrap().expose_secret(), "OLD");

        assert!(store.clear_tokens().is_err());
        assert!(store.is_authenticated());
    }
}
