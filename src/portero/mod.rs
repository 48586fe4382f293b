use crate::cli::globals::GlobalArgs;
use anyhow::{Context, Result};
use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Method, Request},
    routing::get,
    Extension, Router,
};
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{debug_span, info, Span};
use ulid::Ulid;
use utoipa::OpenApi;

pub mod classifier;
pub mod device;
pub mod grant;
pub mod handlers;
pub mod notify;
pub mod provider;
pub mod store;
pub mod tokens;
pub mod verifier;

use classifier::OriginClassifier;
use grant::RoleClient;
use notify::WebhookSink;
use provider::ProviderClient;
use store::RecordStore;
use verifier::Verifier;

#[allow(unused_imports)]
use handlers::{
    auth::__path_auth, callback::__path_callback, health::__path_health,
    records::__path_user_record,
};

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub(crate) static APP_USER_AGENT: &str =
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// The verifier wired to the real collaborators.
pub type AppVerifier = Verifier<ProviderClient, RecordStore, RoleClient, WebhookSink>;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health,
        handlers::auth::auth,
        handlers::callback::callback,
        handlers::records::user_record,
    ),
    components(schemas(store::VerificationRecord)),
    tags(
        (name = "verify", description = "Single-use identity verification gate"),
        (name = "records", description = "Verification record lookup"),
        (name = "health", description = "Service health"),
    )
)]
struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

/// Start the verification gate.
/// # Errors
/// Returns an error if the database is unreachable or the server fails to start.
pub async fn new(port: u16, dsn: String, globals: &GlobalArgs) -> Result<()> {
    // Connect to database
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    let record_store = RecordStore::new(pool);

    let verifier: AppVerifier = Verifier::new(
        OriginClassifier::default(),
        ProviderClient::new(globals)?,
        record_store.clone(),
        RoleClient::new(globals)?,
        WebhookSink::new(globals)?,
    );

    let cors = CorsLayer::new()
        // allow `GET` and `POST` when accessing the resource
        .allow_methods([Method::GET, Method::POST])
        // allow requests from any origin
        .allow_origin(Any);

    let app = Router::new()
        .route("/auth", get(handlers::auth))
        .route("/callback", get(handlers::callback))
        .route("/users/:id", get(handlers::user_record))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &Request<Body>| {
                        HeaderValue::from_str(Ulid::new().to_string().as_str()).ok()
                    },
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(Arc::new(verifier)))
                .layer(Extension(Arc::new(record_store))),
        )
        .route("/health", get(handlers::health).options(handlers::health));

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

// span
fn make_span(request: &Request<Body>) -> Span {
    let headers = request.headers();
    let path = request.uri().path();
    let request_id = headers
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");

    debug_span!("http-request", path, ?headers, request_id)
}
