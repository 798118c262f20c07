use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::cache::{ConversationKey, Draft, MessageGateway};
use crate::groups::GroupGateway;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("not authenticated (token missing or expired)")]
    Unauthorized,
    #[error("unexpected status: {0}")]
    Status(u16),
    #[error("api error: {message}")]
    Api { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: i64,
    pub sender_id: i64,
    pub sender_name: String,
    pub body: Option<String>,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupRole {
    Admin,
    Member,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMember {
    pub user_id: i64,
    pub name: String,
    pub role: GroupRole,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: i64,
    pub name: String,
    pub avatar_color: Option<String>,
    pub members: Vec<GroupMember>,
}

#[derive(Debug, Deserialize)]
struct MessagesEnvelope {
    messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct MessageEnvelope {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct GroupsEnvelope {
    groups: Vec<Group>,
}

#[derive(Debug, Deserialize)]
struct GroupEnvelope {
    group: Group,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    http: Client,
}

impl ApiClient {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: Client::new(),
        }
    }

    pub async fn list_messages(
        &self,
        token: &str,
        conversation: &ConversationKey,
        after_id: i64,
    ) -> Result<Vec<Message>, ApiError> {
        let (url, mut query) = match conversation {
            ConversationKey::OrgWide => (
                format!("{}/messages", self.base_url),
                vec![("type".to_string(), "group".to_string())],
            ),
            ConversationKey::Direct { peer_user_id } => (
                format!("{}/messages", self.base_url),
                vec![
                    ("type".to_string(), "pm".to_string()),
                    ("with".to_string(), peer_user_id.to_string()),
                ],
            ),
            ConversationKey::CustomGroup { group_id } => (
                format!("{}/group-chats/{}/messages", self.base_url, group_id),
                Vec::new(),
            ),
        };
        if after_id > 0 {
            query.push(("after_id".to_string(), after_id.to_string()));
        }

        let request = self.http.get(url).bearer_auth(token).query(&query);
        let envelope: MessagesEnvelope = send(request).await?;
        Ok(envelope.messages)
    }

    pub async fn send_message(
        &self,
        token: &str,
        conversation: &ConversationKey,
        text: Option<&str>,
        image: Option<&Path>,
    ) -> Result<Message, ApiError> {
        let mut form = message_form(text, image)?;
        let url = match conversation {
            ConversationKey::OrgWide => {
                form = form.text("type", "group");
                format!("{}/messages", self.base_url)
            }
            ConversationKey::Direct { peer_user_id } => {
                form = form
                    .text("type", "pm")
                    .text("receiver_id", peer_user_id.to_string());
                format!("{}/messages", self.base_url)
            }
            ConversationKey::CustomGroup { group_id } => {
                format!("{}/group-chats/{}/messages", self.base_url, group_id)
            }
        };

        let request = self.http.post(url).bearer_auth(token).multipart(form);
        let envelope: MessageEnvelope = send(request).await?;
        Ok(envelope.message)
    }

    pub async fn list_group_chats(&self, token: &str) -> Result<Vec<Group>, ApiError> {
        let url = format!("{}/group-chats", self.base_url);
        let request = self.http.get(url).bearer_auth(token);
        let envelope: GroupsEnvelope = send(request).await?;
        Ok(envelope.groups)
    }

    pub async fn create_group_chat(
        &self,
        token: &str,
        name: &str,
        member_ids: &[i64],
        avatar_color: Option<&str>,
    ) -> Result<Group, ApiError> {
        let url = format!("{}/group-chats", self.base_url);
        let mut payload = serde_json::Map::new();
        payload.insert("name".to_string(), json!(name));
        payload.insert("member_ids".to_string(), json!(member_ids));
        if let Some(color) = avatar_color {
            payload.insert("avatar_color".to_string(), json!(color));
        }
        let request = self.http.post(url).bearer_auth(token).json(&payload);
        let envelope: GroupEnvelope = send(request).await?;
        Ok(envelope.group)
    }

    pub async fn update_group_chat(
        &self,
        token: &str,
        group_id: i64,
        name: Option<&str>,
        avatar_color: Option<&str>,
    ) -> Result<Group, ApiError> {
        let url = format!("{}/group-chats/{}", self.base_url, group_id);
        let mut payload = serde_json::Map::new();
        if let Some(name) = name {
            payload.insert("name".to_string(), json!(name));
        }
        if let Some(color) = avatar_color {
            payload.insert("avatar_color".to_string(), json!(color));
        }
        let request = self
            .http
            .request(Method::PATCH, url)
            .bearer_auth(token)
            .json(&payload);
        let envelope: GroupEnvelope = send(request).await?;
        Ok(envelope.group)
    }

    pub async fn add_group_members(
        &self,
        token: &str,
        group_id: i64,
        user_ids: &[i64],
    ) -> Result<Group, ApiError> {
        let url = format!("{}/group-chats/{}/members", self.base_url, group_id);
        let mut payload = serde_json::Map::new();
        payload.insert("user_ids".to_string(), json!(user_ids));
        let request = self.http.post(url).bearer_auth(token).json(&payload);
        let envelope: GroupEnvelope = send(request).await?;
        Ok(envelope.group)
    }

    pub async fn remove_group_member(
        &self,
        token: &str,
        group_id: i64,
        user_id: i64,
    ) -> Result<(), ApiError> {
        let url = format!(
            "{}/group-chats/{}/members/{}",
            self.base_url, group_id, user_id
        );
        let response = self.http.delete(url).bearer_auth(token).send().await?;
        check_status(response.status())?;
        Ok(())
    }
}

fn message_form(
    text: Option<&str>,
    image: Option<&Path>,
) -> Result<reqwest::multipart::Form, ApiError> {
    let mut form = reqwest::multipart::Form::new();
    if let Some(text) = text {
        form = form.text("message", text.to_string());
    }
    if let Some(path) = image {
        let bytes = fs::read(path)?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        let mut part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
        if let Some(mime) = mime_guess::from_path(path).first() {
            part = part.mime_str(mime.essence_str())?;
        }
        form = form.part("image", part);
    }
    Ok(form)
}

async fn send<T: for<'de> Deserialize<'de>>(request: RequestBuilder) -> Result<T, ApiError> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized);
        }
        if let Ok(body) = response.json::<ErrorBody>().await {
            return Err(ApiError::Api {
                message: body.message,
            });
        }
        return Err(ApiError::Status(status.as_u16()));
    }
    Ok(response.json().await?)
}

fn check_status(status: StatusCode) -> Result<(), ApiError> {
    if status == StatusCode::UNAUTHORIZED {
        return Err(ApiError::Unauthorized);
    }
    if !status.is_success() {
        return Err(ApiError::Status(status.as_u16()));
    }
    Ok(())
}

/// An [`ApiClient`] paired with the bearer token it authenticates with, so
/// cache and registry code can stay token-agnostic.
#[derive(Clone)]
pub struct AuthorizedClient {
    api: ApiClient,
    token: String,
}

impl AuthorizedClient {
    pub fn new(api: ApiClient, token: String) -> Self {
        Self { api, token }
    }
}

impl MessageGateway for AuthorizedClient {
    async fn fetch_messages(
        &self,
        conversation: &ConversationKey,
        after_id: i64,
    ) -> Result<Vec<Message>, ApiError> {
        self.api
            .list_messages(&self.token, conversation, after_id)
            .await
    }

    async fn post_message(
        &self,
        conversation: &ConversationKey,
        draft: &Draft,
    ) -> Result<Message, ApiError> {
        self.api
            .send_message(
                &self.token,
                conversation,
                draft.text.as_deref(),
                draft.image.as_deref(),
            )
            .await
    }
}

impl GroupGateway for AuthorizedClient {
    async fn list_groups(&self) -> Result<Vec<Group>, ApiError> {
        self.api.list_group_chats(&self.token).await
    }

    async fn create_group(
        &self,
        name: &str,
        member_ids: &[i64],
        avatar_color: Option<&str>,
    ) -> Result<Group, ApiError> {
        self.api
            .create_group_chat(&self.token, name, member_ids, avatar_color)
            .await
    }

    async fn update_group(
        &self,
        group_id: i64,
        name: Option<&str>,
        avatar_color: Option<&str>,
    ) -> Result<Group, ApiError> {
        self.api
            .update_group_chat(&self.token, group_id, name, avatar_color)
            .await
    }

    async fn add_members(&self, group_id: i64, user_ids: &[i64]) -> Result<Group, ApiError> {
        self.api
            .add_group_members(&self.token, group_id, user_ids)
            .await
    }

    async fn remove_member(&self, group_id: i64, user_id: i64) -> Result<(), ApiError> {
        self.api
            .remove_group_member(&self.token, group_id, user_id)
            .await
    }
}
