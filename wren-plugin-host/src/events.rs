//! Chat network events and their fan-out to plugin handlers.
//!
//! Events are an explicit tagged union; handlers subscribe by tag name.
//! Dispatch is tenant-scoped: an event that carries no guild id is never
//! delivered to plugin handlers.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use mlua::{Function, Lua, RegistryKey, Table};

use crate::enablement::EnablementStore;
use crate::engine::ScriptEngine;
use crate::error::HostError;

/// Guild payload carried by [`HostEvent::GuildCreate`].
#[derive(Debug, Clone)]
pub struct GuildInfo {
    pub id: String,
    pub name: String,
}

/// Events the host forwards to plugin handlers.
#[derive(Debug, Clone)]
pub enum HostEvent {
    MessageCreate {
        guild_id: String,
        channel_id: String,
        message_id: String,
        author_id: String,
        content: String,
    },
    MessageDelete {
        guild_id: String,
        channel_id: String,
        message_id: String,
    },
    ReactionAdd {
        guild_id: String,
        channel_id: String,
        message_id: String,
        user_id: String,
        emoji: String,
    },
    ReactionRemove {
        guild_id: String,
        channel_id: String,
        message_id: String,
        user_id: String,
        emoji: String,
    },
    MemberJoin {
        guild_id: String,
        user_id: String,
        username: String,
    },
    MemberLeave {
        guild_id: String,
        user_id: String,
    },
    GuildCreate {
        guild: GuildInfo,
    },
    /// Session-level event; carries no tenant.
    Ready {
        session_id: String,
    },
}

impl HostEvent {
    /// Tag scripts subscribe with.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::MessageCreate { .. } => "MessageCreate",
            Self::MessageDelete { .. } => "MessageDelete",
            Self::ReactionAdd { .. } => "ReactionAdd",
            Self::ReactionRemove { .. } => "ReactionRemove",
            Self::MemberJoin { .. } => "MemberJoin",
            Self::MemberLeave { .. } => "MemberLeave",
            Self::GuildCreate { .. } => "GuildCreate",
            Self::Ready { .. } => "Ready",
        }
    }

    /// Guild the event belongs to, if any.
    pub fn guild_scope(&self) -> Option<&str> {
        match self {
            Self::MessageCreate { guild_id, .. }
            | Self::MessageDelete { guild_id, .. }
            | Self::ReactionAdd { guild_id, .. }
            | Self::ReactionRemove { guild_id, .. }
            | Self::MemberJoin { guild_id, .. }
            | Self::MemberLeave { guild_id, .. } => Some(guild_id),
            Self::GuildCreate { guild } => Some(&guild.id),
            Self::Ready { .. } => None,
        }
    }

    /// Builds the guest-visible event table.
    pub(crate) fn to_lua(&self, lua: &Lua) -> mlua::Result<Table> {
        let t = lua.create_table()?;
        t.set("type", self.tag())?;
        match self {
            Self::MessageCreate {
                guild_id,
                channel_id,
                message_id,
                author_id,
                content,
            } => {
                t.set("guildId", guild_id.as_str())?;
                t.set("channelId", channel_id.as_str())?;
                t.set("messageId", message_id.as_str())?;
                t.set("authorId", author_id.as_str())?;
                t.set("content", content.as_str())?;
            }
            Self::MessageDelete {
                guild_id,
                channel_id,
                message_id,
            } => {
                t.set("guildId", guild_id.as_str())?;
                t.set("channelId", channel_id.as_str())?;
                t.set("messageId", message_id.as_str())?;
            }
            Self::ReactionAdd {
                guild_id,
                channel_id,
                message_id,
                user_id,
                emoji,
            }
            | Self::ReactionRemove {
                guild_id,
                channel_id,
                message_id,
                user_id,
                emoji,
            } => {
                t.set("guildId", guild_id.as_str())?;
                t.set("channelId", channel_id.as_str())?;
                t.set("messageId", message_id.as_str())?;
                t.set("userId", user_id.as_str())?;
                t.set("emoji", emoji.as_str())?;
            }
            Self::MemberJoin {
                guild_id,
                user_id,
                username,
            } => {
                t.set("guildId", guild_id.as_str())?;
                t.set("userId", user_id.as_str())?;
                t.set("username", username.as_str())?;
            }
            Self::MemberLeave { guild_id, user_id } => {
                t.set("guildId", guild_id.as_str())?;
                t.set("userId", user_id.as_str())?;
            }
            Self::GuildCreate { guild } => {
                let g = lua.create_table()?;
                g.set("id", guild.id.as_str())?;
                g.set("name", guild.name.as_str())?;
                t.set("guild", g)?;
            }
            Self::Ready { session_id } => {
                t.set("sessionId", session_id.as_str())?;
            }
        }
        Ok(t)
    }
}

/// A registered plugin event handler.
#[derive(Clone)]
pub struct HandlerEntry {
    pub plugin: String,
    pub tag: String,
    engine: ScriptEngine,
    callback: Arc<RegistryKey>,
}

impl HandlerEntry {
    pub fn new(
        plugin: String,
        tag: String,
        engine: ScriptEngine,
        callback: Arc<RegistryKey>,
    ) -> Self {
        Self {
            plugin,
            tag,
            engine,
            callback,
        }
    }
}

/// Routes host events to the handlers of enabled plugins.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: RwLock<HashMap<String, Vec<HandlerEntry>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, entry: HandlerEntry) {
        self.handlers
            .write()
            .expect("handler lock poisoned")
            .entry(entry.tag.clone())
            .or_default()
            .push(entry);
    }

    pub fn handler_count(&self, tag: &str) -> usize {
        self.handlers
            .read()
            .expect("handler lock poisoned")
            .get(tag)
            .map_or(0, Vec::len)
    }

    /// Fans the event out to every matching handler of an enabled plugin.
    /// Handler execution is queued on each plugin's worker; errors are
    /// logged there and never reach the caller.
    pub fn dispatch(&self, enablement: &EnablementStore, event: &HostEvent) {
        for entry in self.matching(enablement, event) {
            let event = event.clone();
            let callback = Arc::clone(&entry.callback);
            entry.engine.submit(move |lua| {
                let handler: Function = lua.registry_value(&callback)?;
                handler.call::<()>(event.to_lua(lua)?)
            });
        }
    }

    /// Like [`dispatch`](Self::dispatch) but waits for every handler and
    /// surfaces the first failure.
    pub fn dispatch_sync(
        &self,
        enablement: &EnablementStore,
        event: &HostEvent,
    ) -> Result<(), HostError> {
        for entry in self.matching(enablement, event) {
            let event = event.clone();
            let callback = Arc::clone(&entry.callback);
            entry.engine.call(move |lua| {
                let handler: Function = lua.registry_value(&callback)?;
                handler.call::<()>(event.to_lua(lua)?)
            })?;
        }
        Ok(())
    }

    fn matching(&self, enablement: &EnablementStore, event: &HostEvent) -> Vec<HandlerEntry> {
        // Untenanted events have no enablement scope to check against.
        let Some(guild_id) = event.guild_scope() else {
            return Vec::new();
        };
        self.handlers
            .read()
            .expect("handler lock poisoned")
            .get(event.tag())
            .map_or_else(Vec::new, |entries| {
                entries
                    .iter()
                    .filter(|e| enablement.is_enabled(guild_id, &e.plugin))
                    .cloned()
                    .collect()
            })
    }
}
