//! Bootstrap endpoint serving the master's public key.
//!
//! Nodes fetch the PEM over HTTP before dialing the control port so the
//! key exchange can be encrypted for the current master key.

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use rsa::RsaPublicKey;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info, instrument};

use crate::config::PUBLIC_KEY_ROUTE;
use crate::error::{ProtocolError, Result};
use crate::utils::crypto::public_key_from_pem;

/// Router with the public key route bound to `pem`
pub fn router(pem: Arc<str>) -> Router {
    Router::new()
        .route(PUBLIC_KEY_ROUTE, get(public_key))
        .with_state(pem)
}

async fn public_key(State(pem): State<Arc<str>>) -> impl IntoResponse {
    debug!("Public key requested");
    ([(header::CONTENT_TYPE, "text/plain")], pem.to_string())
}

/// Serve the bootstrap endpoint on `listener` until the server fails
pub async fn serve(listener: TcpListener, pem: String) -> Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, route = PUBLIC_KEY_ROUTE, "Bootstrap endpoint listening");
    axum::serve(listener, router(Arc::from(pem)))
        .await
        .map_err(ProtocolError::Io)
}

/// Fetch and parse the master's public key from `url`
#[instrument(skip(client))]
pub async fn fetch_public_key(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<RsaPublicKey> {
    let response = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| ProtocolError::Bootstrap(format!("request failed: {e}")))?
        .error_for_status()
        .map_err(|e| ProtocolError::Bootstrap(format!("bad status: {e}")))?;
    let pem = response
        .text()
        .await
        .map_err(|e| ProtocolError::Bootstrap(format!("unreadable body: {e}")))?;
    public_key_from_pem(&pem)
}
