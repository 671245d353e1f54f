//! HTTP surface of a follower node.
//!
//! A follower binds the conventional leader port and redirects every request to
//! the real leader, so clients that hard-code the port still find it. If the
//! port is taken (a leader really runs here) the responder quietly stays off.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use beacon_common::LeaderAddress;

mod redirect;

pub use redirect::RedirectTarget;

/// Router answering every method and path with a redirect to `leader`
pub fn redirect_router(leader: &LeaderAddress) -> Router {
    Router::new()
        .fallback(redirect::redirect_to_leader)
        .with_state(Arc::new(RedirectTarget::new(leader)))
        .layer(TraceLayer::new_for_http())
}

/// A running redirect responder
pub struct RedirectResponder {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl RedirectResponder {
    #[cfg(test)]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stop(&self) {
        self.task.abort();
        tracing::debug!(addr = %self.local_addr, "Redirect responder stopped");
    }
}

/// Start redirecting `bind_addr` to `leader`.
///
/// Returns `None` without binding when `self_candidate` is the leader, and
/// `None` when the address cannot be bound.
pub async fn start_redirect_responder(
    bind_addr: SocketAddr,
    self_candidate: &LeaderAddress,
    leader: &LeaderAddress,
) -> Option<RedirectResponder> {
    if self_candidate == leader {
        tracing::debug!(leader = %leader, "We are the leader, no redirect responder");
        return None;
    }

    let listener = match TcpListener::bind(bind_addr).await {
        Ok(listener) => listener,
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            tracing::info!(addr = %bind_addr, "Leader port already in use locally, not redirecting");
            return None;
        }
        Err(e) => {
            tracing::warn!(addr = %bind_addr, error = %e, "Cannot bind redirect responder, not redirecting");
            return None;
        }
    };

    let local_addr = listener.local_addr().unwrap_or(bind_addr);
    let app = redirect_router(leader);

    tracing::info!(addr = %local_addr, leader = %leader.url(), "↪️ Redirect responder listening");

    let task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::warn!(error = %e, "Redirect responder stopped");
        }
    });

    Some(RedirectResponder { local_addr, task })
}
