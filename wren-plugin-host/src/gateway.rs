//! Host service seams the runtime is wired against.
//!
//! The chat network boundary is abstracted behind small traits so the
//! runtime, loader and capability surface can be tested with in-process
//! fakes. Field names serialize in lowerCamelCase because that is the
//! spelling scripts see.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::HostError;
use crate::permissions::Permissions;

/// Channel metadata exposed to scripts via the entity cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelInfo {
    pub id: String,
    pub name: String,
    pub kind: String,
}

/// Guild member metadata exposed to scripts via the entity cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberInfo {
    pub user_id: String,
    pub username: String,
    pub nick: Option<String>,
    pub role_ids: Vec<String>,
}

/// Role metadata exposed to scripts via the entity cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleInfo {
    pub id: String,
    pub name: String,
    pub position: i64,
}

/// Entry appended to a guild's moderation event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventLogEntry {
    pub title: String,
    pub description: String,
    pub author_id: String,
}

/// Read access to cached guild entities.
pub trait EntityCache: Send + Sync {
    fn channel(&self, guild_id: &str, channel_id: &str) -> Result<ChannelInfo, HostError>;
    fn member(&self, guild_id: &str, user_id: &str) -> Result<MemberInfo, HostError>;
    fn role(&self, guild_id: &str, role_id: &str) -> Result<RoleInfo, HostError>;
    fn roles(&self, guild_id: &str) -> Result<Vec<RoleInfo>, HostError>;
}

/// Support-ticket operations scripts may drive.
pub trait TicketDesk: Send + Sync {
    /// Opens a ticket for `user_id`, returning the ticket channel id.
    fn open(&self, guild_id: &str, user_id: &str, executor_id: &str) -> Result<String, HostError>;
    fn close(&self, guild_id: &str, user_id: &str, executor_id: &str) -> Result<(), HostError>;
}

/// Sink for guild moderation log entries.
pub trait EventLog: Send + Sync {
    fn append(&self, guild_id: &str, entry: EventLogEntry) -> Result<(), HostError>;
}

/// Command registration surface of the chat network.
pub trait ChatGateway: Send + Sync {
    /// Publishes the given application command schemas.
    fn publish_commands(&self, schemas: &[CommandSchema]) -> Result<(), HostError>;

    /// Lists commands currently published on the network.
    fn published_commands(&self) -> Result<Vec<PublishedCommand>, HostError>;

    /// Deletes a published command by id.
    fn delete_command(&self, command_id: &str) -> Result<(), HostError>;
}

/// An application command as the network reports it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PublishedCommand {
    pub id: String,
    pub name: String,
}

/// Declarative schema for a published top-level command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommandSchema {
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<OptionSchema>,
    /// Member permissions the network requires before showing the command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_permissions: Option<Permissions>,
}

/// Option (or subcommand) of a published command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OptionSchema {
    pub kind: OptionKind,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub autocomplete: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<OptionSchema>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum OptionKind {
    SubCommand,
    String,
}

/// Bundle of host services handed to each plugin's capability surface.
#[derive(Clone)]
pub struct HostServices {
    pub cache: Arc<dyn EntityCache>,
    pub tickets: Arc<dyn TicketDesk>,
    pub eventlog: Arc<dyn EventLog>,
}
