//! Redirect handler.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};

use beacon_common::LeaderAddress;

/// Fixed redirect target, rendered once
#[derive(Debug, Clone)]
pub struct RedirectTarget {
    pub location: String,
    pub body: String,
}

impl RedirectTarget {
    pub fn new(leader: &LeaderAddress) -> Self {
        let location = leader.url();
        let body = format!(
            "<!DOCTYPE html>\n<html><head><title>Moved</title></head><body>\
             <p>The leader is at <a href=\"{location}\">{location}</a>.</p>\
             </body></html>\n"
        );
        Self { location, body }
    }
}

/// 302 to the leader for any request
pub async fn redirect_to_leader(
    State(target): State<Arc<RedirectTarget>>,
    method: Method,
    uri: Uri,
) -> Response {
    tracing::debug!(method = %method, uri = %uri, location = %target.location, "Redirecting to leader");

    (
        StatusCode::FOUND,
        [
            (header::LOCATION, target.location.as_str()),
            (header::CONNECTION, "close"),
            (header::CONTENT_TYPE, "text/html; charset=utf-8"),
        ],
        target.body.clone(),
    )
        .into_response()
}
