use crate::portero::{
    verifier::{Attempt, Rejection},
    AppVerifier,
};
use axum::{
    extract::{ConnectInfo, Extension, Query},
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse},
};
use serde::Deserialize;
use std::{net::SocketAddr, sync::Arc};
use tracing::{info, instrument};
use utoipa::IntoParams;

#[derive(IntoParams, Debug, Deserialize, Default)]
#[into_params(parameter_in = Query)]
pub struct CallbackArgs {
    /// Authorization code returned by the provider.
    code: Option<String>,
    /// The one-time verification token issued at `/auth`.
    state: Option<String>,
}

const SUCCESS_PAGE: &str = "<!doctype html><html><body>\
    <h1>Verified</h1><p>Your identity has been confirmed and access granted.</p>\
    </body></html>";

const INVALID_PAGE: &str = "<!doctype html><html><body>\
    <h1>Verification failed</h1><p>This verification link is invalid or was already used.</p>\
    </body></html>";

const EXPIRED_PAGE: &str = "<!doctype html><html><body>\
    <h1>Link expired</h1><p>This verification link has expired. Start over to get a new one.</p>\
    </body></html>";

const ORIGIN_BLOCKED_PAGE: &str = "<!doctype html><html><body>\
    <h1>Connection blocked</h1><p>Verification is not available over VPN or hosting networks.</p>\
    </body></html>";

const ORIGIN_USED_PAGE: &str = "<!doctype html><html><body>\
    <h1>Already verified</h1><p>A verification from this network address already exists.</p>\
    </body></html>";

const PROVIDER_FAILED_PAGE: &str = "<!doctype html><html><body>\
    <h1>Verification failed</h1><p>The identity provider could not confirm your sign-in.</p>\
    </body></html>";

#[utoipa::path(
    get,
    path= "/callback",
    params(CallbackArgs),
    responses (
        (status = 200, description = "Verification completed", content_type = "text/html"),
        (status = 400, description = "Missing, unknown or expired token", content_type = "text/html"),
        (status = 403, description = "Network origin blocked", content_type = "text/html"),
        (status = 409, description = "Origin already verified", content_type = "text/html"),
        (status = 502, description = "Identity provider failure", content_type = "text/html"),
    ),
    tag = "verify",
)]
/// OAuth2 redirect target: runs the verification state machine.
#[instrument(skip_all)]
pub async fn callback(
    Extension(verifier): Extension<Arc<AppVerifier>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(args): Query<CallbackArgs>,
) -> impl IntoResponse {
    let attempt = Attempt {
        token: args.state.unwrap_or_default(),
        code: args.code.unwrap_or_default(),
        origin: client_origin(&headers, peer),
        user_agent: header_str(&headers, "User-Agent"),
    };

    match verifier.verify(attempt).await {
        Ok(record) => {
            info!("Verification completed for identity {}", record.id);
            (StatusCode::OK, Html(SUCCESS_PAGE))
        }
        Err(rejection) => {
            info!("Verification rejected: {}", rejection.reason());
            rejection_response(rejection)
        }
    }
}

fn rejection_response(rejection: Rejection) -> (StatusCode, Html<&'static str>) {
    match rejection {
        Rejection::InvalidRequest => (StatusCode::BAD_REQUEST, Html(INVALID_PAGE)),
        Rejection::TokenExpired => (StatusCode::BAD_REQUEST, Html(EXPIRED_PAGE)),
        Rejection::OriginBlocked => (StatusCode::FORBIDDEN, Html(ORIGIN_BLOCKED_PAGE)),
        Rejection::OriginAlreadyVerified => (StatusCode::CONFLICT, Html(ORIGIN_USED_PAGE)),
        Rejection::ProviderAuthFailed => (StatusCode::BAD_GATEWAY, Html(PROVIDER_FAILED_PAGE)),
    }
}

/// The caller's network origin: first `X-Forwarded-For` entry, falling back
/// to the socket peer address.
fn client_origin(headers: &HeaderMap, peer: SocketAddr) -> Option<String> {
    let forwarded = headers
        .get("X-Forwarded-For")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());

    match forwarded {
        Some(origin) => Some(origin.to_string()),
        None => Some(peer.ip().to_string()),
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}
