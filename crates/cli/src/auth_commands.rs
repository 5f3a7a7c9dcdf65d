use std::{sync::Arc, time::Duration};

use {
    anyhow::{Context, Result},
    clap::Subcommand,
    secrecy::ExposeSecret,
    tuneport_oauth::{
        AuthFlow, CallbackOutcome, CallbackServer, FileStore, KeyValueStore, TokenStore,
        load_oauth_config, token_store::now_ms,
    },
};

#[derive(Subcommand)]
pub enum AuthAction {
    /// Log in to Spotify in the browser.
    Login {
        /// Log in again even if a valid token is stored.
        #[arg(long)]
        force: bool,
        /// Seconds to wait for the browser redirect.
        #[arg(long, default_value_t = 300)]
        timeout: u64,
    },
    /// Show whether a valid token is stored.
    Status,
    /// Forget the stored tokens.
    Logout,
    /// Print the current access token.
    Token {
        /// Print a full `Authorization` header value instead.
        #[arg(long)]
        header: bool,
    },
}

pub async fn handle_auth(action: AuthAction) -> Result<()> {
    let storage = open_storage()?;
    match action {
        AuthAction::Login { force, timeout } => {
            login(storage, force, Duration::from_secs(timeout)).await
        },
        AuthAction::Status => {
            println!("{}", status_line(&TokenStore::load(storage), now_ms()));
            Ok(())
        },
        AuthAction::Logout => {
            TokenStore::load(storage).logout()?;
            println!("Logged out.");
            Ok(())
        },
        AuthAction::Token { header } => {
            println!("{}", token_output(&TokenStore::load(storage), header)?);
            Ok(())
        },
    }
}

fn open_storage() -> Result<Arc<dyn KeyValueStore>> {
    Ok(Arc::new(FileStore::new(FileStore::default_path()?)))
}

async fn login(storage: Arc<dyn KeyValueStore>, force: bool, timeout: Duration) -> Result<()> {
    let config = load_oauth_config()?;
    let tokens = TokenStore::load(storage.clone());
    if tokens.is_authenticated() && !force {
        println!("Already logged in. Use --force to log in again.");
        return Ok(());
    }

    // Listen before sending the user away so the redirect cannot beat us.
    let server = CallbackServer::bind(&config.redirect_uri).await?;
    let flow = AuthFlow::new(config, storage, tokens);
    let req = flow.start_login()?;

    println!("Opening browser for authentication...");
    if open::that(&req.url).is_err() {
        println!("Could not open browser. Please visit:\n{}", req.url);
    }

    println!("Waiting for callback on {} ...", flow.config().redirect_uri);
    let params = match tokio::time::timeout(timeout, server.wait()).await {
        Ok(params) => params?,
        Err(_) => {
            flow.abandon();
            anyhow::bail!("no callback received within {}s", timeout.as_secs());
        },
    };

    println!("Exchanging code for tokens...");
    match flow.handle_callback(&params).await? {
        CallbackOutcome::Authenticated { profile: Some(profile) } => {
            let name = profile.display_name.as_deref().unwrap_or(&profile.id);
            println!("Successfully logged in as {name}");
        },
        CallbackOutcome::Authenticated { profile: None } => println!("Successfully logged in"),
        CallbackOutcome::AlreadyHandled => {},
    }
    Ok(())
}

fn status_line(tokens: &TokenStore, now_ms: u64) -> String {
    let Some(record) = tokens.record() else {
        return "Not logged in.".to_string();
    };
    match record.expires_at {
        Some(at) if at > now_ms => {
            let remaining = (at - now_ms) / 1000;
            let hours = remaining / 3600;
            let mins = (remaining % 3600) / 60;
            format!("Logged in [valid ({hours}h {mins}m remaining)]")
        },
        Some(_) => "Logged in [expired]".to_string(),
        None => "Logged in [expiry unknown]".to_string(),
    }
}

fn token_output(tokens: &TokenStore, header: bool) -> Result<String> {
    if !tokens.is_authenticated() {
        anyhow::bail!("not logged in or token expired; run `tuneport auth login`");
    }
    if header {
        return tokens.bearer_header().context("no access token stored");
    }
    let token = tokens.access_token().context("no access token stored")?;
    Ok(token.expose_secret().clone())
}
