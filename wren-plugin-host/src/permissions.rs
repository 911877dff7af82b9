//! Chat permission model for plugin commands.
//!
//! Command nodes declare the permissions an invoker must hold; the
//! dispatcher checks the resolved node only, never its ancestors.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Individual chat permission a command may require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Administrator,
    ManageGuild,
    ManageChannels,
    ManageRoles,
    ManageMessages,
    ManageWebhooks,
    ManageEvents,
    KickMembers,
    BanMembers,
    ModerateMembers,
    MentionEveryone,
    ViewAuditLog,
    MoveMembers,
}

impl Permission {
    /// Returns the name scripts use to request this permission.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Administrator => "administrator",
            Self::ManageGuild => "manage_guild",
            Self::ManageChannels => "manage_channels",
            Self::ManageRoles => "manage_roles",
            Self::ManageMessages => "manage_messages",
            Self::ManageWebhooks => "manage_webhooks",
            Self::ManageEvents => "manage_events",
            Self::KickMembers => "kick_members",
            Self::BanMembers => "ban_members",
            Self::ModerateMembers => "moderate_members",
            Self::MentionEveryone => "mention_everyone",
            Self::ViewAuditLog => "view_audit_log",
            Self::MoveMembers => "move_members",
        }
    }

    /// Parses a script-facing permission name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "administrator" => Some(Self::Administrator),
            "manage_guild" => Some(Self::ManageGuild),
            "manage_channels" => Some(Self::ManageChannels),
            "manage_roles" => Some(Self::ManageRoles),
            "manage_messages" => Some(Self::ManageMessages),
            "manage_webhooks" => Some(Self::ManageWebhooks),
            "manage_events" => Some(Self::ManageEvents),
            "kick_members" => Some(Self::KickMembers),
            "ban_members" => Some(Self::BanMembers),
            "moderate_members" => Some(Self::ModerateMembers),
            "mention_everyone" => Some(Self::MentionEveryone),
            "view_audit_log" => Some(Self::ViewAuditLog),
            "move_members" => Some(Self::MoveMembers),
            _ => None,
        }
    }
}

/// Set of permissions held by an invoker or required by a command node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    held: HashSet<Permission>,
}

impl Permissions {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Set holding every permission (for administrators and tests).
    pub fn all() -> Self {
        let held = [
            Permission::Administrator,
            Permission::ManageGuild,
            Permission::ManageChannels,
            Permission::ManageRoles,
            Permission::ManageMessages,
            Permission::ManageWebhooks,
            Permission::ManageEvents,
            Permission::KickMembers,
            Permission::BanMembers,
            Permission::ModerateMembers,
            Permission::MentionEveryone,
            Permission::ViewAuditLog,
            Permission::MoveMembers,
        ]
        .into_iter()
        .collect();

        Self { held }
    }

    pub fn insert(&mut self, permission: Permission) {
        self.held.insert(permission);
    }

    pub fn contains(&self, permission: Permission) -> bool {
        // Administrator implies everything.
        self.held.contains(&Permission::Administrator) || self.held.contains(&permission)
    }

    /// True when every permission in `required` is held.
    pub fn contains_all(&self, required: &Permissions) -> bool {
        required.held.iter().all(|p| self.contains(*p))
    }

    /// First permission in `required` that is not held, if any.
    pub fn first_missing(&self, required: &Permissions) -> Option<Permission> {
        required.held.iter().find(|p| !self.contains(**p)).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = Permission> + '_ {
        self.held.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }
}

impl FromIterator<Permission> for Permissions {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        Self {
            held: iter.into_iter().collect(),
        }
    }
}
