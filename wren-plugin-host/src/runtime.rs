//! Top-level plugin runtime.
//!
//! Owns the loaded plugins, their enablement state and the event
//! dispatcher, and exposes the two host commands (`plugin`, `pluginadm`)
//! that drive them.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::dispatch;
use crate::enablement::EnablementStore;
use crate::error::HostError;
use crate::events::{EventDispatcher, HostEvent};
use crate::gateway::{CommandSchema, HostServices, OptionKind, OptionSchema};
use crate::loader::{self, LoaderDeps};
use crate::permissions::Permission;
use crate::plugin::Plugin;
use crate::registry::{CommandInvocation, CommandRegistry, Invoker, Reply};
use wren_storage::Database;

struct RuntimeInner {
    plugins: Vec<Plugin>,
    enablement: Arc<EnablementStore>,
    events: Arc<EventDispatcher>,
    db: Arc<Database>,
}

/// Handle to the plugin runtime. Clones share state.
#[derive(Clone)]
pub struct PluginRuntime {
    inner: Arc<RuntimeInner>,
}

impl PluginRuntime {
    /// Loads every plugin under `plugin_dir` and restores enablement state
    /// from the database.
    pub fn new(
        db: Arc<Database>,
        services: HostServices,
        plugin_dir: &Path,
    ) -> Result<Self, HostError> {
        let enablement = Arc::new(EnablementStore::load(Arc::clone(&db))?);
        let events = Arc::new(EventDispatcher::new());

        let plugins = loader::load_dir(
            plugin_dir,
            &LoaderDeps {
                db: Arc::clone(&db),
                services,
                enablement: Arc::clone(&enablement),
                events: Arc::clone(&events),
            },
        )?;
        info!(count = plugins.len(), "plugin runtime ready");

        Ok(Self {
            inner: Arc::new(RuntimeInner {
                plugins,
                enablement,
                events,
                db,
            }),
        })
    }

    pub fn plugins(&self) -> &[Plugin] {
        &self.inner.plugins
    }

    pub fn enablement(&self) -> &EnablementStore {
        &self.inner.enablement
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.inner.db
    }

    /// Fans an event out to enabled plugin handlers without waiting.
    pub fn dispatch_event(&self, event: &HostEvent) {
        self.inner.events.dispatch(&self.inner.enablement, event);
    }

    /// Fans an event out and waits for every handler to finish.
    pub fn dispatch_event_sync(&self, event: &HostEvent) -> Result<(), HostError> {
        self.inner.events.dispatch_sync(&self.inner.enablement, event)
    }

    pub fn run_command(
        &self,
        guild_id: &str,
        invoker: &Invoker,
        raw: &str,
    ) -> Result<Reply, HostError> {
        dispatch::run(
            &self.inner.plugins,
            &self.inner.enablement,
            guild_id,
            invoker,
            raw,
        )
    }

    pub fn help_command(
        &self,
        guild_id: &str,
        invoker: &Invoker,
        raw: &str,
    ) -> Result<Reply, HostError> {
        dispatch::help(
            &self.inner.plugins,
            &self.inner.enablement,
            guild_id,
            invoker,
            raw,
        )
    }

    pub fn autocomplete(&self, guild_id: &str, invoker: &Invoker, partial: &str) -> Vec<String> {
        dispatch::autocomplete(
            &self.inner.plugins,
            &self.inner.enablement,
            guild_id,
            invoker,
            partial,
        )
    }

    /// Renders the plugin list for a guild; enabled ones are starred.
    pub fn list_plugins(&self, guild_id: &str) -> Reply {
        let mut text = String::new();
        for plugin in &self.inner.plugins {
            text.push_str(plugin.name());
            text.push_str(" (");
            text.push_str(&plugin.descriptor.version);
            text.push_str("): \"");
            text.push_str(&plugin.descriptor.description);
            text.push('"');
            if self.inner.enablement.is_enabled(guild_id, plugin.name()) {
                text.push_str(" *");
            }
            text.push('\n');
        }
        Reply::private(text)
    }

    /// Enables a plugin in a guild and runs its enable hook.
    pub fn enable_plugin(&self, guild_id: &str, name: &str) -> Result<Reply, HostError> {
        let plugin = self.find_plugin(name)?;
        self.inner.enablement.enable(guild_id, name)?;

        self.run_hook(plugin, plugin.on_enable.clone(), guild_id)?;
        info!(plugin = %name, guild = %guild_id, "plugin enabled");
        Ok(Reply::private(format!(
            "Successfully enabled the \"{name}\" plugin!"
        )))
    }

    /// Disables a plugin in a guild and runs its disable hook.
    pub fn disable_plugin(&self, guild_id: &str, name: &str) -> Result<Reply, HostError> {
        let plugin = self.find_plugin(name)?;
        self.inner.enablement.disable(guild_id, name)?;

        self.run_hook(plugin, plugin.on_disable.clone(), guild_id)?;
        info!(plugin = %name, guild = %guild_id, "plugin disabled");
        Ok(Reply::private(format!(
            "Successfully disabled the \"{name}\" plugin"
        )))
    }

    fn find_plugin(&self, name: &str) -> Result<&Plugin, HostError> {
        self.inner
            .plugins
            .iter()
            .find(|p| p.name() == name)
            .ok_or_else(|| HostError::PluginNotFound(name.to_string()))
    }

    fn run_hook(
        &self,
        plugin: &Plugin,
        hook: Option<Arc<mlua::RegistryKey>>,
        guild_id: &str,
    ) -> Result<(), HostError> {
        let Some(hook) = hook else {
            return Ok(());
        };
        let guild_id = guild_id.to_string();
        plugin.engine.call(move |lua| {
            let f: mlua::Function = lua.registry_value(&hook)?;
            f.call::<()>(guild_id)
        })
    }

    /// Registers the `plugin` and `pluginadm` commands.
    pub fn install_commands(&self, registry: &CommandRegistry) {
        let runtime = self.clone();
        registry.register(
            plugin_cmd_schema(),
            Arc::new(move |invocation| runtime.handle_plugin_cmd(invocation)),
        );

        let runtime = self.clone();
        registry.register(
            pluginadm_cmd_schema(),
            Arc::new(move |invocation| runtime.handle_pluginadm_cmd(invocation)),
        );
    }

    fn handle_plugin_cmd(&self, invocation: &CommandInvocation) -> Result<Reply, HostError> {
        let raw = invocation
            .arg
            .as_deref()
            .ok_or_else(|| HostError::BadInvocation("missing required option: cmd".into()))?;
        match invocation.subcommand.as_deref() {
            Some("run") => self.run_command(&invocation.guild_id, &invocation.invoker, raw),
            Some("help") => self.help_command(&invocation.guild_id, &invocation.invoker, raw),
            other => Err(HostError::BadInvocation(format!(
                "unknown plugin subcommand: {}",
                other.unwrap_or("<none>")
            ))),
        }
    }

    fn handle_pluginadm_cmd(&self, invocation: &CommandInvocation) -> Result<Reply, HostError> {
        match invocation.subcommand.as_deref() {
            Some("list") => Ok(self.list_plugins(&invocation.guild_id)),
            Some("enable") | Some("disable") => {
                let name = invocation.arg.as_deref().ok_or_else(|| {
                    HostError::BadInvocation("missing required option: plugin".into())
                })?;
                if invocation.subcommand.as_deref() == Some("enable") {
                    self.enable_plugin(&invocation.guild_id, name)
                } else {
                    self.disable_plugin(&invocation.guild_id, name)
                }
            }
            other => Err(HostError::BadInvocation(format!(
                "unknown pluginadm subcommand: {}",
                other.unwrap_or("<none>")
            ))),
        }
    }
}

fn command_option(name: &str, description: &str) -> OptionSchema {
    OptionSchema {
        kind: OptionKind::String,
        name: name.into(),
        description: description.into(),
        required: true,
        autocomplete: true,
        options: Vec::new(),
    }
}

fn plugin_cmd_schema() -> CommandSchema {
    CommandSchema {
        name: "plugin".into(),
        description: "Interact with the plugins on this server".into(),
        options: vec![
            OptionSchema {
                kind: OptionKind::SubCommand,
                name: "run".into(),
                description: "Run a plugin command".into(),
                required: false,
                autocomplete: false,
                options: vec![command_option("cmd", "The plugin command to run")],
            },
            OptionSchema {
                kind: OptionKind::SubCommand,
                name: "help".into(),
                description: "See how to use a plugin command".into(),
                required: false,
                autocomplete: false,
                options: vec![command_option("cmd", "The plugin command to help with")],
            },
        ],
        default_permissions: None,
    }
}

fn pluginadm_cmd_schema() -> CommandSchema {
    let plugin_option = |description: &str| OptionSchema {
        kind: OptionKind::String,
        name: "plugin".into(),
        description: description.into(),
        required: true,
        autocomplete: false,
        options: Vec::new(),
    };

    CommandSchema {
        name: "pluginadm".into(),
        description: "Manage dynamic plugins for your server".into(),
        options: vec![
            OptionSchema {
                kind: OptionKind::SubCommand,
                name: "list".into(),
                description: "List all available plugins".into(),
                required: false,
                autocomplete: false,
                options: Vec::new(),
            },
            OptionSchema {
                kind: OptionKind::SubCommand,
                name: "enable".into(),
                description: "Enable a plugin in this guild".into(),
                required: false,
                autocomplete: false,
                options: vec![plugin_option("The name of the plugin to enable")],
            },
            OptionSchema {
                kind: OptionKind::SubCommand,
                name: "disable".into(),
                description: "Disable a plugin in this guild".into(),
                required: false,
                autocomplete: false,
                options: vec![plugin_option("The name of the plugin to disable")],
            },
        ],
        default_permissions: Some([Permission::ManageGuild].into_iter().collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{
        ChannelInfo, EntityCache, EventLog, EventLogEntry, MemberInfo, RoleInfo, TicketDesk,
    };
    use crate::permissions::Permissions;
    use std::fs;

    struct NullCache;

    impl EntityCache for NullCache {
        fn channel(&self, _: &str, _: &str) -> Result<ChannelInfo, HostError> {
            Err(HostError::Gateway("not cached".into()))
        }
        fn member(&self, _: &str, _: &str) -> Result<MemberInfo, HostError> {
            Err(HostError::Gateway("not cached".into()))
        }
        fn role(&self, _: &str, _: &str) -> Result<RoleInfo, HostError> {
            Err(HostError::Gateway("not cached".into()))
        }
        fn roles(&self, _: &str) -> Result<Vec<RoleInfo>, HostError> {
            Ok(Vec::new())
        }
    }

    struct NullTickets;

    impl TicketDesk for NullTickets {
        fn open(&self, _: &str, _: &str, _: &str) -> Result<String, HostError> {
            Ok("t".into())
        }
        fn close(&self, _: &str, _: &str, _: &str) -> Result<(), HostError> {
            Ok(())
        }
    }

    struct NullEventLog;

    impl EventLog for NullEventLog {
        fn append(&self, _: &str, _: EventLogEntry) -> Result<(), HostError> {
            Ok(())
        }
    }

    fn runtime_with(script: &str) -> PluginRuntime {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("plugin.lua"), script).unwrap();
        let db = Arc::new(Database::open_in_memory().unwrap());
        let services = HostServices {
            cache: Arc::new(NullCache),
            tickets: Arc::new(NullTickets),
            eventlog: Arc::new(NullEventLog),
        };
        PluginRuntime::new(db, services, dir.path()).unwrap()
    }

    fn anyone() -> Invoker {
        Invoker {
            user_id: "u1".into(),
            permissions: Permissions::empty(),
        }
    }

    const GREETER: &str = r#"
        wren.setup{ name = "greeter", version = "1.0.0", description = "Greets people" }
        wren.command{
            name = "greet",
            description = "Say hello",
            exec = function(ctx, args) return "hello " .. (args[1] or "world") end,
        }
        wren.onEnable(function(guild) last_enabled = guild end)
        wren.onDisable(function(guild) last_disabled = guild end)
    "#;

    #[test]
    fn enable_runs_hook_and_gates_commands() {
        let runtime = runtime_with(GREETER);

        // Disabled: the command does not resolve.
        assert!(matches!(
            runtime.run_command("g1", &anyone(), "greet"),
            Err(HostError::CommandNotFound(_))
        ));

        let reply = runtime.enable_plugin("g1", "greeter").unwrap();
        assert!(reply.text.contains("enabled"));
        let hook_guild: String = runtime.plugins()[0]
            .engine
            .call(|lua| lua.load("return last_enabled").eval())
            .unwrap();
        assert_eq!(hook_guild, "g1");

        let reply = runtime.run_command("g1", &anyone(), "greet reader").unwrap();
        assert_eq!(reply.text, "hello reader");

        runtime.disable_plugin("g1", "greeter").unwrap();
        assert!(matches!(
            runtime.run_command("g1", &anyone(), "greet"),
            Err(HostError::CommandNotFound(_))
        ));
    }

    #[test]
    fn unknown_plugin_cannot_be_enabled() {
        let runtime = runtime_with(GREETER);
        assert!(matches!(
            runtime.enable_plugin("g1", "ghost"),
            Err(HostError::PluginNotFound(_))
        ));
    }

    #[test]
    fn list_stars_enabled_plugins() {
        let runtime = runtime_with(GREETER);
        let before = runtime.list_plugins("g1");
        assert_eq!(before.text, "greeter (1.0.0): \"Greets people\"\n");

        runtime.enable_plugin("g1", "greeter").unwrap();
        let after = runtime.list_plugins("g1");
        assert_eq!(after.text, "greeter (1.0.0): \"Greets people\" *\n");
    }

    #[test]
    fn host_commands_route_subcommands() {
        let runtime = runtime_with(GREETER);
        runtime.enable_plugin("g1", "greeter").unwrap();

        let registry = CommandRegistry::new();
        runtime.install_commands(&registry);
        assert_eq!(registry.names(), ["plugin", "pluginadm"]);

        let invocation = CommandInvocation {
            guild_id: "g1".into(),
            invoker: anyone(),
            subcommand: Some("run".into()),
            arg: Some("greet there".into()),
        };
        let reply = registry.dispatch("plugin", &invocation).unwrap();
        assert_eq!(reply.text, "hello there");

        let list = CommandInvocation {
            guild_id: "g1".into(),
            invoker: anyone(),
            subcommand: Some("list".into()),
            arg: None,
        };
        let reply = registry.dispatch("pluginadm", &list).unwrap();
        assert!(reply.text.contains("greeter"));
    }
}
