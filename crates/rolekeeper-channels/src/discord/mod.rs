//! Discord platform adapter — REST client + gateway listener.
//!
//! Plain I/O wrapper around the Discord HTTP API for one guild. No retries
//! and no rate limiting here: callers own the failure semantics.

pub mod gateway;

use async_trait::async_trait;
use serde::Deserialize;

use rolekeeper_core::error::{Result, RolekeeperError};
use rolekeeper_core::traits::Platform;
use rolekeeper_core::types::{Member, RoleInfo, RoleSet, ScheduledEvent};

const API_BASE: &str = "https://discord.com/api/v10";

/// Discord REST client scoped to a single guild.
pub struct DiscordClient {
    http: reqwest::Client,
    token: String,
    guild_id: String,
    application_id: String,
}

impl DiscordClient {
    pub fn new(bot_token: &str, guild_id: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            token: format!("Bot {bot_token}"),
            guild_id: guild_id.to_string(),
            application_id: String::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{API_BASE}{path}")
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .http
            .get(self.url(path))
            .header("Authorization", &self.token)
            .send()
            .await
            .map_err(|e| RolekeeperError::Platform(format!("GET {path} failed: {e}")))?;
        Self::check_status(path, &response)?;
        response
            .json()
            .await
            .map_err(|e| RolekeeperError::Platform(format!("Invalid response for {path}: {e}")))
    }

    async fn send_empty(&self, request: reqwest::RequestBuilder, what: &str) -> Result<()> {
        let response = request
            .header("Authorization", &self.token)
            .send()
            .await
            .map_err(|e| RolekeeperError::Platform(format!("{what} failed: {e}")))?;
        Self::check_status(what, &response)
    }

    fn check_status(what: &str, response: &reqwest::Response) -> Result<()> {
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(RolekeeperError::Platform(format!("{what}: HTTP {status}")))
        }
    }

    /// Fetch and remember the application id; required before registering
    /// commands.
    pub async fn connect(&mut self) -> Result<()> {
        let app: DiscordApplication = self.get_json("/applications/@me").await?;
        tracing::info!("Connected as application {} ({})", app.name, app.id);
        self.application_id = app.id;
        Ok(())
    }

    /// The guild owner's member id.
    pub async fn owner_id(&self) -> Result<String> {
        let guild: DiscordGuild = self.get_json(&format!("/guilds/{}", self.guild_id)).await?;
        Ok(guild.owner_id)
    }

    /// The websocket URL for the gateway listener.
    pub async fn gateway_url(&self) -> Result<String> {
        let gateway: DiscordGateway = self.get_json("/gateway/bot").await?;
        Ok(gateway.url)
    }

    /// Register a guild application command, returning its id.
    pub async fn register_command(&self, name: &str, description: &str) -> Result<String> {
        let path = format!(
            "/applications/{}/guilds/{}/commands",
            self.application_id, self.guild_id
        );
        let response = self
            .http
            .post(self.url(&path))
            .header("Authorization", &self.token)
            .json(&serde_json::json!({ "name": name, "description": description }))
            .send()
            .await
            .map_err(|e| RolekeeperError::Platform(format!("Command creation failed: {e}")))?;
        Self::check_status("command creation", &response)?;
        let created: DiscordCommand = response
            .json()
            .await
            .map_err(|e| RolekeeperError::Platform(format!("Invalid command response: {e}")))?;
        Ok(created.id)
    }

    /// Delete a previously registered guild command.
    pub async fn delete_command(&self, command_id: &str) -> Result<()> {
        let path = format!(
            "/applications/{}/guilds/{}/commands/{command_id}",
            self.application_id, self.guild_id
        );
        self.send_empty(self.http.delete(self.url(&path)), "command deletion")
            .await
    }

    /// Reply to a command interaction with a plain text message.
    pub async fn respond_interaction(
        &self,
        interaction_id: &str,
        interaction_token: &str,
        content: &str,
    ) -> Result<()> {
        let path = format!("/interactions/{interaction_id}/{interaction_token}/callback");
        let request = self.http.post(self.url(&path)).json(&serde_json::json!({
            "type": 4,
            "data": { "content": content },
        }));
        self.send_empty(request, "interaction response").await
    }
}

#[async_trait]
impl Platform for DiscordClient {
    async fn list_roles(&self) -> Result<Vec<RoleInfo>> {
        let roles: Vec<DiscordRole> = self
            .get_json(&format!("/guilds/{}/roles", self.guild_id))
            .await?;
        Ok(roles
            .into_iter()
            .map(|r| RoleInfo { id: r.id, name: r.name })
            .collect())
    }

    async fn list_members(&self) -> Result<Vec<Member>> {
        let members: Vec<DiscordMember> = self
            .get_json(&format!("/guilds/{}/members?limit=1000", self.guild_id))
            .await?;
        Ok(members.into_iter().map(DiscordMember::into_member).collect())
    }

    async fn get_member(&self, member_id: &str) -> Result<Member> {
        let member: DiscordMember = self
            .get_json(&format!("/guilds/{}/members/{member_id}", self.guild_id))
            .await?;
        Ok(member.into_member())
    }

    async fn rename_member(&self, member_id: &str, name: &str) -> Result<()> {
        let path = format!("/guilds/{}/members/{member_id}", self.guild_id);
        let request = self
            .http
            .patch(self.url(&path))
            .json(&serde_json::json!({ "nick": name }));
        self.send_empty(request, "rename").await
    }

    async fn add_role(&self, member_id: &str, role_id: &str) -> Result<()> {
        let path = format!(
            "/guilds/{}/members/{member_id}/roles/{role_id}",
            self.guild_id
        );
        self.send_empty(self.http.put(self.url(&path)), "role addition")
            .await
    }

    async fn remove_role(&self, member_id: &str, role_id: &str) -> Result<()> {
        let path = format!(
            "/guilds/{}/members/{member_id}/roles/{role_id}",
            self.guild_id
        );
        self.send_empty(self.http.delete(self.url(&path)), "role removal")
            .await
    }

    async fn send_message(&self, destination: &str, text: &str) -> Result<()> {
        let path = format!("/channels/{destination}/messages");
        let request = self
            .http
            .post(self.url(&path))
            .json(&serde_json::json!({ "content": text }));
        self.send_empty(request, "message send").await
    }

    async fn send_file(
        &self,
        destination: &str,
        caption: &str,
        file_name: &str,
        data: &[u8],
    ) -> Result<()> {
        let path = format!("/channels/{destination}/messages");
        let payload = serde_json::json!({ "content": caption }).to_string();
        let form = reqwest::multipart::Form::new()
            .text("payload_json", payload)
            .part(
                "files[0]",
                reqwest::multipart::Part::bytes(data.to_vec()).file_name(file_name.to_string()),
            );
        let request = self.http.post(self.url(&path)).multipart(form);
        self.send_empty(request, "file send").await
    }

    async fn list_scheduled_events(&self) -> Result<Vec<ScheduledEvent>> {
        let events: Vec<DiscordScheduledEvent> = self
            .get_json(&format!("/guilds/{}/scheduled-events", self.guild_id))
            .await?;
        Ok(events
            .into_iter()
            .map(|e| ScheduledEvent {
                id: e.id,
                name: e.name,
                start_time: e.scheduled_start_time,
            })
            .collect())
    }
}

// --- Discord API types ---

#[derive(Debug, Deserialize)]
struct DiscordApplication {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct DiscordGuild {
    owner_id: String,
}

#[derive(Debug, Deserialize)]
struct DiscordGateway {
    url: String,
}

#[derive(Debug, Deserialize)]
struct DiscordRole {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct DiscordCommand {
    id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DiscordUser {
    pub id: String,
    pub username: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DiscordMember {
    pub user: DiscordUser,
    #[serde(default)]
    pub nick: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl DiscordMember {
    pub(crate) fn into_member(self) -> Member {
        Member {
            id: self.user.id,
            username: self.user.username,
            nick: self.nick,
            roles: self.roles.into_iter().collect::<RoleSet>(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DiscordScheduledEvent {
    id: String,
    name: String,
    scheduled_start_time: chrono::DateTime<chrono::Utc>,
}
