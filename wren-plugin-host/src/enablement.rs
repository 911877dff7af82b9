//! Per-guild plugin enablement.
//!
//! An in-memory map mirrors the persistent store and answers every check;
//! mutations write through to the database under the same lock so the two
//! never diverge. A failed write rolls the in-memory change back.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use crate::error::HostError;
use wren_storage::Database;

pub struct EnablementStore {
    db: Arc<Database>,
    enabled: RwLock<HashMap<String, HashSet<String>>>,
}

impl EnablementStore {
    /// Loads all guild enablement lists from the database.
    pub fn load(db: Arc<Database>) -> Result<Self, HostError> {
        let mut enabled = HashMap::new();
        for (guild_id, plugins) in db.all_enablements()? {
            enabled.insert(guild_id, plugins.into_iter().collect());
        }
        Ok(Self {
            db,
            enabled: RwLock::new(enabled),
        })
    }

    /// Whether `plugin` is enabled in `guild_id`. The empty guild id (events
    /// and invocations outside any guild) is never enabled for anything.
    pub fn is_enabled(&self, guild_id: &str, plugin: &str) -> bool {
        if guild_id.is_empty() {
            return false;
        }
        self.enabled
            .read()
            .expect("enablement lock poisoned")
            .get(guild_id)
            .is_some_and(|set| set.contains(plugin))
    }

    pub fn enable(&self, guild_id: &str, plugin: &str) -> Result<(), HostError> {
        let mut enabled = self.enabled.write().expect("enablement lock poisoned");
        let set = enabled.entry(guild_id.to_string()).or_default();
        if !set.insert(plugin.to_string()) {
            return Err(HostError::AlreadyEnabled(plugin.to_string()));
        }
        if let Err(err) = self.persist(guild_id, set) {
            set.remove(plugin);
            return Err(err);
        }
        Ok(())
    }

    pub fn disable(&self, guild_id: &str, plugin: &str) -> Result<(), HostError> {
        let mut enabled = self.enabled.write().expect("enablement lock poisoned");
        let set = enabled.entry(guild_id.to_string()).or_default();
        if !set.remove(plugin) {
            return Err(HostError::AlreadyDisabled(plugin.to_string()));
        }
        if let Err(err) = self.persist(guild_id, set) {
            set.insert(plugin.to_string());
            return Err(err);
        }
        Ok(())
    }

    fn persist(&self, guild_id: &str, set: &HashSet<String>) -> Result<(), HostError> {
        let mut plugins: Vec<String> = set.iter().cloned().collect();
        plugins.sort_unstable();
        self.db.create_guild(guild_id)?;
        self.db.set_enabled_plugins(guild_id, &plugins)?;
        Ok(())
    }
}
