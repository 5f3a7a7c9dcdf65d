//! PKCE login and token bookkeeping for the Spotify Web API.

pub mod callback_server;
pub mod defaults;
pub mod error;
pub mod flow;
pub mod pkce;
pub mod storage;
pub mod token_store;
pub mod types;

pub use {
    callback_server::CallbackServer,
    defaults::load_oauth_config,
    error::{AuthError, AuthErrorKind, Result, StorageError},
    flow::{AuthFlow, CallbackOutcome, FlowState},
    pkce::{generate_code_challenge, generate_code_verifier},
    storage::{FileStore, KeyValueStore, MemoryStore},
    token_store::TokenStore,
    types::{
        AuthorizationRequest, CallbackParams, OAuthConfig, OAuthTokens, PkceChallenge,
        UserProfile, serialize_option_secret, serialize_secret,
    },
};
