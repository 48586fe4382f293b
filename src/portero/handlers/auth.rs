use crate::portero::AppVerifier;
use axum::{
    extract::Extension,
    http::StatusCode,
    response::{Html, IntoResponse},
};
use std::sync::Arc;
use tracing::{debug, error, instrument};

const AUTH_PAGE: &str = r#"<!doctype html>
<html lang="en">
  <head>
    <meta charset="utf-8">
    <title>Verification</title>
  </head>
  <body>
    <h1>Verify your identity</h1>
    <p>You will be redirected to the identity provider to sign in.</p>
    <p><a href="{{AUTH_URL}}">Continue to verification</a></p>
  </body>
</html>
"#;

#[utoipa::path(
    get,
    path= "/auth",
    responses (
        (status = 200, description = "Verification landing page", content_type = "text/html"),
        (status = 500, description = "Authorization URL could not be built"),
    ),
    tag = "verify",
)]
/// Issue a one-time token and serve the page linking to the provider.
#[instrument(skip(verifier))]
pub async fn auth(Extension(verifier): Extension<Arc<AppVerifier>>) -> impl IntoResponse {
    let state = verifier.issue_token();

    match verifier.authorize_url(&state) {
        Ok(url) => {
            debug!("Issued verification token");
            (StatusCode::OK, Html(AUTH_PAGE.replace("{{AUTH_URL}}", &url))).into_response()
        }
        Err(err) => {
            error!("Failed to build authorization URL: {err:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Verification is temporarily unavailable".to_string(),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::AUTH_PAGE;

    #[test]
    fn auth_page_has_url_placeholder() {
        assert!(AUTH_PAGE.contains("{{AUTH_URL}}"));

        let rendered = AUTH_PAGE.replace("{{AUTH_URL}}", "https://provider.test/authorize");
        assert!(rendered.contains(r#"href="https://provider.test/authorize""#));
        assert!(!rendered.contains("{{AUTH_URL}}"));
    }
}
