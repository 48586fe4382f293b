use crate::{cli::globals::GlobalArgs, portero::APP_USER_AGENT};
use anyhow::{anyhow, Context, Result};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tracing::debug;

const GRANT_TIMEOUT: Duration = Duration::from_secs(10);

/// What happened to a grant request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantOutcome {
    Granted,
    /// The identity left the group between provider auth and this step.
    /// Benign: the user can self-heal by reopening the invite.
    NotAMember,
}

/// Grants the configured role in the external group-management system.
///
/// Role assignment is idempotent upstream; assigning an already-held role is
/// a no-op.
#[derive(Debug, Clone)]
pub struct RoleClient {
    http: Client,
    base_url: String,
    bot_token: SecretString,
    group_id: String,
    role_id: String,
}

impl RoleClient {
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(globals: &GlobalArgs) -> Result<Self> {
        let http = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(GRANT_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            base_url: globals.provider_url.trim_end_matches('/').to_string(),
            bot_token: globals.bot_token.clone(),
            group_id: globals.group_id.clone(),
            role_id: globals.role_id.clone(),
        })
    }

    /// Assign the configured role to `identity_id` if it is a group member.
    ///
    /// # Errors
    /// Returns an error if the group-management API fails; a missing
    /// membership is [`GrantOutcome::NotAMember`], not an error.
    pub async fn grant(&self, identity_id: &str) -> Result<GrantOutcome> {
        let member_url = self.member_url(identity_id);
        let response = self
            .http
            .get(&member_url)
            .header("Authorization", self.auth_header())
            .send()
            .await
            .context("Membership lookup request failed")?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                debug!("Identity {identity_id} is not a member, skipping role grant");
                return Ok(GrantOutcome::NotAMember);
            }
            status if !status.is_success() => {
                return Err(anyhow!("Membership lookup returned {status}"));
            }
            _ => {}
        }

        let role_url = self.role_url(identity_id);
        let response = self
            .http
            .put(&role_url)
            .header("Authorization", self.auth_header())
            .header("Content-Length", "0")
            .send()
            .await
            .context("Role assignment request failed")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("Role assignment returned {status}"));
        }

        debug!("Granted role {} to {identity_id}", self.role_id);
        Ok(GrantOutcome::Granted)
    }

    fn auth_header(&self) -> String {
        format!("Bot {}", self.bot_token.expose_secret())
    }

    fn member_url(&self, identity_id: &str) -> String {
        format!(
            "{}/guilds/{}/members/{identity_id}",
            self.base_url, self.group_id
        )
    }

    fn role_url(&self, identity_id: &str) -> String {
        format!(
            "{}/guilds/{}/members/{identity_id}/roles/{}",
            self.base_url, self.group_id, self.role_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> Result<RoleClient> {
        let mut globals = GlobalArgs::new("https://provider.tld/api/".to_string());
        globals.bot_token = SecretString::from("bot-token");
        globals.group_id = "1111".to_string();
        globals.role_id = "2222".to_string();
        RoleClient::new(&globals)
    }

    #[test]
    fn member_url_targets_group_member() -> Result<()> {
        let client = test_client()?;
        assert_eq!(
            client.member_url("42"),
            "https://provider.tld/api/guilds/1111/members/42"
        );
        Ok(())
    }

    #[test]
    fn role_url_targets_member_role() -> Result<()> {
        let client = test_client()?;
        assert_eq!(
            client.role_url("42"),
            "https://provider.tld/api/guilds/1111/members/42/roles/2222"
        );
        Ok(())
    }

    #[test]
    fn auth_header_uses_bot_scheme() -> Result<()> {
        let client = test_client()?;
        assert_eq!(client.auth_header(), "Bot bot-token");
        Ok(())
    }
}
