use std::path::{Path, PathBuf};

use {anyhow::Context, serde::Deserialize};

use crate::types::OAuthConfig;

pub const AUTH_URL: &str = "https://accounts.spotify.com/authorize";
pub const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
pub const PROFILE_URL: &str = "https://api.spotify.com/v1/me";
pub const REDIRECT_URI: &str = "http://127.0.0.1:3000/callback";

pub const SCOPES: &[&str] = &[
    "user-read-private",
    "user-read-email",
    "playlist-read-private",
    "playlist-read-collaborative",
    "user-library-read",
    "streaming",
    "user-read-playback-state",
    "user-modify-playback-state",
];

pub const CLIENT_ID_ENV: &str = "TUNEPORT_CLIENT_ID";
pub const REDIRECT_URI_ENV: &str = "TUNEPORT_REDIRECT_URI";

/// On-disk overrides, `~/.tuneport/oauth.toml`.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OAuthConfigFile {
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub scopes: Option<Vec<String>>,
    pub verify_identity: Option<bool>,
}

pub fn config_path() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new().context("could not determine home directory")?;
    Ok(home.home_dir().join(".tuneport/oauth.toml"))
}

pub fn read_config_file(path: &Path) -> anyhow::Result<OAuthConfigFile> {
    if !path.exists() {
        return Ok(OAuthConfigFile::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

/// Merge file settings, environment overrides and provider defaults.
pub fn resolve_config(
    file: OAuthConfigFile,
    env_client_id: Option<String>,
    env_redirect_uri: Option<String>,
) -> anyhow::Result<OAuthConfig> {
    let client_id = env_client_id
        .or(file.client_id)
        .filter(|id| !id.trim().is_empty())
        .with_context(|| {
            format!("no client id configured; set {CLIENT_ID_ENV} or client_id in oauth.toml")
        })?;

    let redirect_uri = env_redirect_uri
        .or(file.redirect_uri)
        .unwrap_or_else(|| REDIRECT_URI.to_string());
    url::Url::parse(&redirect_uri)
        .with_context(|| format!("invalid redirect URI: {redirect_uri}"))?;

    let scopes = file
        .scopes
        .unwrap_or_else(|| SCOPES.iter().map(|s| s.to_string()).collect());

    Ok(OAuthConfig {
        client_id,
        auth_url: AUTH_URL.to_string(),
        token_url: TOKEN_URL.to_string(),
        redirect_uri,
        scopes,
        profile_url: file
            .verify_identity
            .unwrap_or(true)
            .then(|| PROFILE_URL.to_string()),
    })
}

/// Load the provider configuration from `~/.tuneport/oauth.toml` and the
/// environment.
pub fn load_oauth_config() -> anyhow::Result<OAuthConfig> {
    let file = read_config_file(&config_path()?)?;
    resolve_config(
        file,
        std::env::var(CLIENT_ID_ENV).ok(),
        std::env::var(REDIRECT_URI_ENV).ok(),
    )
}
