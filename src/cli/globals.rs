use secrecy::SecretString;

/// Configuration every verification attempt depends on, resolved once at
/// startup and passed down explicitly instead of read from ambient state.
#[derive(Debug, Clone)]
pub struct GlobalArgs {
    pub provider_url: String,
    pub client_id: String,
    pub client_secret: SecretString,
    pub redirect_uri: String,
    pub bot_token: SecretString,
    pub group_id: String,
    pub role_id: String,
    pub webhook_url: Option<String>,
}

impl GlobalArgs {
    #[must_use]
    pub fn new(provider_url: String) -> Self {
        Self {
            provider_url,
            client_id: String::new(),
            client_secret: SecretString::default(),
            redirect_uri: String::new(),
            bot_token: SecretString::default(),
            group_id: String::new(),
            role_id: String::new(),
            webhook_url: None,
        }
    }
}
