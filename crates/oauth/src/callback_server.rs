use std::{
    net::SocketAddr,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use {
    anyhow::Context,
    axum::{
        Router,
        extract::{Query, State},
        response::Html,
        routing::get,
    },
    tokio::{net::TcpListener, sync::oneshot},
    tracing::{debug, info},
};

use crate::types::CallbackParams;

const SUCCESS_PAGE: &str = "<html><body><h1>Login received</h1><p>You can close this window and \
                            return to the terminal.</p></body></html>";
const FAILURE_PAGE: &str = "<html><body><h1>Login failed</h1><p>The provider reported an error. \
                            See the terminal for details.</p></body></html>";

type Slot = Arc<Mutex<Option<oneshot::Sender<CallbackParams>>>>;

/// One-shot local HTTP listener for the provider's redirect.
pub struct CallbackServer {
    listener: TcpListener,
    path: String,
}

impl CallbackServer {
    /// Listen on the host, port and path of `redirect_uri`.
    pub async fn bind(redirect_uri: &str) -> anyhow::Result<Self> {
        let url = url::Url::parse(redirect_uri)
            .with_context(|| format!("invalid redirect URI: {redirect_uri}"))?;
        let host = url.host_str().context("redirect URI has no host")?;
        let port = url
            .port_or_known_default()
            .context("redirect URI has no port")?;
        let listener = TcpListener::bind((host, port))
            .await
            .with_context(|| format!("failed to listen on {host}:{port}"))?;
        Ok(Self {
            listener,
            path: url.path().to_string(),
        })
    }

    pub async fn bind_addr(addr: SocketAddr, path: &str) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to listen on {addr}"))?;
        Ok(Self {
            listener,
            path: path.to_string(),
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until the first request hits the callback path, then shut down.
    pub async fn wait(self) -> anyhow::Result<CallbackParams> {
        let Self { listener, path } = self;
        let (tx, rx) = oneshot::channel();
        let slot: Slot = Arc::new(Mutex::new(Some(tx)));
        let app = Router::new().route(&path, get(receive)).with_state(slot);

        let addr = listener.local_addr()?;
        info!(%addr, %path, "waiting for OAuth callback");

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = stop_rx.await;
                })
                .await
        });

        let params = rx
            .await
            .context("callback listener stopped before a redirect arrived")?;
        let _ = stop_tx.send(());
        if tokio::time::timeout(Duration::from_secs(2), server)
            .await
            .is_err()
        {
            debug!("callback listener did not drain in time");
        }
        Ok(params)
    }
}

async fn receive(
    State(slot): State<Slot>,
    Query(params): Query<CallbackParams>,
) -> Html<&'static str> {
    let page = if params.error.is_some() {
        FAILURE_PAGE
    } else {
        SUCCESS_PAGE
    };
    let sender = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
    match sender {
        Some(tx) => {
            let _ = tx.send(params);
        },
        None => debug!("ignoring repeated callback request"),
    }
    Html(page)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn receives_callback_parameters() {
        let server = CallbackServer::bind_addr("127.0.0.1:0".parse().unwrap(), "/callback")
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let waiter = tokio::spawn(server.wait());

        let resp = reqwest::get(format!("http://{addr}/callback?code=ABC123&state=s1"))
            .await
            .unwrap();
        assert!(resp.status().is_success());
        assert!(resp.text().await.unwrap().contains("Login received"));

        let params = waiter.await.unwrap().unwrap();
        assert_eq!(params.code.as_deref(), Some("ABC123"));
        assert_eq!(params.state.as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn forwards_provider_errors() {
        let server = CallbackServer::bind_addr("127.0.0.1:0".parse().unwrap(), "/callback")
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let waiter = tokio::spawn(server.wait());

        let resp = reqwest::get(format!("http://{addr}/callback?error=access_denied"))
            .await
            .unwrap();
        assert!(resp.text().await.unwrap().contains("Login failed"));

        let params = waiter.await.unwrap().unwrap();
        assert_eq!(params.error.as_deref(), Some("access_denied"));
        assert!(params.code.is_none());
    }

    #[tokio::test]
    async fn bind_rejects_invalid_redirect_uri() {
        assert!(CallbackServer::bind("not a url").await.is_err());
    }
}
