use crate::{cli::globals::GlobalArgs, portero::APP_USER_AGENT};
use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Bound every provider round-trip so a stalled upstream cannot pin a
/// callback handler.
const PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);

const OAUTH_SCOPE: &str = "identify email";

/// The authenticated principal as returned by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub username: String,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawIdentity {
    id: String,
    username: String,
    discriminator: Option<String>,
    global_name: Option<String>,
    email: Option<String>,
}

/// OAuth2 client for the external identity provider.
///
/// Both operations are single network round-trips; the idempotent identity
/// GET is retried once on transport-level failure, the token exchange POST
/// never is.
#[derive(Debug, Clone)]
pub struct ProviderClient {
    http: Client,
    base_url: String,
    client_id: String,
    client_secret: SecretString,
    redirect_uri: String,
}

impl ProviderClient {
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(globals: &GlobalArgs) -> Result<Self> {
        let http = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(PROVIDER_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            base_url: globals.provider_url.trim_end_matches('/').to_string(),
            client_id: globals.client_id.clone(),
            client_secret: globals.client_secret.clone(),
            redirect_uri: globals.redirect_uri.clone(),
        })
    }

    /// Provider authorization URL for the given state token.
    ///
    /// # Errors
    /// Returns an error if the configured base URL cannot be parsed.
    pub fn authorize_url(&self, state: &str) -> Result<String> {
        let mut url = Url::parse(&format!("{}/oauth2/authorize", self.base_url))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", OAUTH_SCOPE)
            .append_pair("state", state);
        Ok(url.to_string())
    }

    /// Exchange an authorization code for an access token.
    ///
    /// Neither the code nor the client secret may end up in logs.
    ///
    /// # Errors
    /// Returns an error if the request fails, the response is not parseable,
    /// or the response lacks an access token.
    pub async fn exchange_code(&self, code: &str) -> Result<SecretString> {
        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("scope", OAUTH_SCOPE),
        ];

        let token_url = format!("{}/oauth2/token", self.base_url);
        let response = self
            .http
            .post(&token_url)
            .form(&params)
            .send()
            .await
            .context("Token exchange request failed")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read token exchange response")?;

        if !status.is_success() {
            return Err(anyhow!("Token endpoint returned {status}"));
        }

        parse_access_token(&body).map(SecretString::from)
    }

    /// Fetch the authenticated identity with the bearer token.
    ///
    /// # Errors
    /// Returns an error if the request fails after one retry on transport
    /// errors, or if the response cannot be mapped into an [`Identity`].
    pub async fn fetch_identity(&self, access_token: &SecretString) -> Result<Identity> {
        let identity_url = format!("{}/users/@me", self.base_url);

        let response = match self.identity_request(&identity_url, access_token).await {
            Ok(response) => response,
            // A GET is safe to replay; give transient network failures one
            // more chance before failing the attempt.
            Err(err) if err.is_timeout() || err.is_connect() => {
                warn!("Identity fetch failed ({err}), retrying once");
                self.identity_request(&identity_url, access_token)
                    .await
                    .context("Identity request failed after retry")?
            }
            Err(err) => return Err(err).context("Identity request failed"),
        };

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("Identity endpoint returned {status}"));
        }

        let body = response
            .text()
            .await
            .context("Failed to read identity response")?;

        let identity = parse_identity(&body)?;
        debug!("Fetched identity {}", identity.id);
        Ok(identity)
    }

    async fn identity_request(
        &self,
        url: &str,
        access_token: &SecretString,
    ) -> Result<reqwest::Response, reqwest::Error> {
        self.http
            .get(url)
            .bearer_auth(access_token.expose_secret())
            .send()
            .await
    }
}

fn parse_access_token(body: &str) -> Result<String> {
    let parsed: TokenResponse =
        serde_json::from_str(body).context("Token response is not valid JSON")?;

    parsed
        .access_token
        .filter(|token| !token.is_empty())
        .ok_or_else(|| anyhow!("Token response has no access_token"))
}

fn parse_identity(body: &str) -> Result<Identity> {
    let raw: RawIdentity =
        serde_json::from_str(body).context("Identity response is not valid JSON")?;

    Ok(identity_from_raw(raw))
}

/// Prefer the display name; fall back to the legacy `name#discriminator`
/// composite, or the bare username for migrated accounts.
fn identity_from_raw(raw: RawIdentity) -> Identity {
    let username = match raw.global_name.filter(|name| !name.is_empty()) {
        Some(display_name) => display_name,
        None => match raw.discriminator.as_deref() {
            Some(d) if !d.is_empty() && d != "0" => format!("{}#{d}", raw.username),
            _ => raw.username,
        },
    };

    Identity {
        id: raw.id,
        username,
        email: raw.email.filter(|email| !email.is_empty()),
    }
}
