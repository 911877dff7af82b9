//! Plugin discovery and loading.
//!
//! Walks the plugin directory in sorted order (so load order, and therefore
//! dispatch precedence, is deterministic), evaluating every `.lua` file.
//! Read and evaluation failures abort the whole load; a script that never
//! declares a complete descriptor is skipped with a warning.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};
use walkdir::WalkDir;

use crate::enablement::EnablementStore;
use crate::engine::ScriptEngine;
use crate::error::HostError;
use crate::events::{EventDispatcher, HandlerEntry};
use crate::gateway::HostServices;
use crate::plugin::Plugin;
use crate::surface::{self, CapabilityDeps};
use wren_storage::Database;

pub(crate) struct LoaderDeps {
    pub db: Arc<Database>,
    pub services: HostServices,
    pub enablement: Arc<EnablementStore>,
    pub events: Arc<EventDispatcher>,
}

/// Loads every plugin under `dir`.
pub(crate) fn load_dir(dir: &Path, deps: &LoaderDeps) -> Result<Vec<Plugin>, HostError> {
    let mut plugins = Vec::new();

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|err| HostError::Load(err.to_string()))?;
        let path = entry.path();
        if entry.file_type().is_dir() || path.extension().and_then(|ext| ext.to_str()) != Some("lua")
        {
            continue;
        }
        if let Some(plugin) = load_script(path, deps)? {
            plugins.push(plugin);
        }
    }

    Ok(plugins)
}

fn load_script(path: &Path, deps: &LoaderDeps) -> Result<Option<Plugin>, HostError> {
    let source =
        fs::read_to_string(path).map_err(|err| HostError::Load(format!("{}: {err}", path.display())))?;

    let label = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let engine = ScriptEngine::spawn(&label)?;

    // Evaluate with only the registration API in scope.
    let chunk_name = path.display().to_string();
    let eval_name = chunk_name.clone();
    engine
        .call(move |lua| {
            surface::install_registration_api(lua, &eval_name)?;
            lua.load(source).set_name(eval_name.as_str()).exec()
        })
        .map_err(|err| HostError::Load(err.to_string()))?;

    let descriptor = engine.call(surface::peek_descriptor)?;
    let Some(descriptor) = descriptor.filter(wren_storage::PluginDescriptor::is_complete) else {
        warn!(path = %chunk_name, "plugin info not provided, skipping");
        return Ok(None);
    };

    // A failed lookup of the previous record is treated as a first load.
    let prev = deps.db.plugin(&descriptor.name).ok().flatten();
    deps.db.upsert_plugin(&descriptor)?;

    let capability_deps = CapabilityDeps {
        db: Arc::clone(&deps.db),
        services: deps.services.clone(),
        enablement: Arc::clone(&deps.enablement),
        events: Arc::clone(&deps.events),
        engine: engine.clone(),
    };
    let bind_descriptor = descriptor.clone();
    engine
        .call(move |lua| surface::bind_capabilities(lua, &capability_deps, &bind_descriptor))
        .map_err(|err| HostError::Load(err.to_string()))?;

    engine
        .call(move |lua| surface::call_init(lua, prev))
        .map_err(|err| HostError::Load(format!("{} init: {err}", descriptor.name)))?;

    let loaded = engine.call(surface::extract)?;
    for (tag, callback) in loaded.handlers {
        deps.events.register(HandlerEntry::new(
            descriptor.name.clone(),
            tag,
            engine.clone(),
            callback,
        ));
    }

    info!(
        plugin = %descriptor.name,
        version = %descriptor.version,
        path = %chunk_name,
        "loaded plugin"
    );

    Ok(Some(Plugin {
        descriptor,
        path: path.to_path_buf(),
        engine,
        commands: loaded.commands,
        on_enable: loaded.on_enable,
        on_disable: loaded.on_disable,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HostError;
    use crate::gateway::{
        ChannelInfo, EntityCache, EventLog, EventLogEntry, MemberInfo, RoleInfo, TicketDesk,
    };
    use std::io::Write;

    struct NullCache;

    impl EntityCache for NullCache {
        fn channel(&self, _: &str, id: &str) -> Result<ChannelInfo, HostError> {
            Ok(ChannelInfo {
                id: id.into(),
                name: "general".into(),
                kind: "text".into(),
            })
        }
        fn member(&self, _: &str, id: &str) -> Result<MemberInfo, HostError> {
            Ok(MemberInfo {
                user_id: id.into(),
                username: "someone".into(),
                nick: None,
                role_ids: Vec::new(),
            })
        }
        fn role(&self, _: &str, _: &str) -> Result<RoleInfo, HostError> {
            Err(HostError::Gateway("no such role".into()))
        }
        fn roles(&self, _: &str) -> Result<Vec<RoleInfo>, HostError> {
            Ok(Vec::new())
        }
    }

    struct NullTickets;

    impl TicketDesk for NullTickets {
        fn open(&self, _: &str, _: &str, _: &str) -> Result<String, HostError> {
            Ok("ticket-1".into())
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

    fn services() -> HostServices {
        HostServices {
            cache: Arc::new(NullCache),
            tickets: Arc::new(NullTickets),
            eventlog: Arc::new(NullEventLog),
        }
    }

    fn deps() -> LoaderDeps {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let enablement = Arc::new(EnablementStore::load(Arc::clone(&db)).unwrap());
        LoaderDeps {
            db,
            services: services(),
            enablement,
            events: Arc::new(EventDispatcher::new()),
        }
    }

    fn write_script(dir: &Path, name: &str, source: &str) {
        let mut f = fs::File::create(dir.join(name)).unwrap();
        f.write_all(source.as_bytes()).unwrap();
    }

    #[test]
    fn loads_scripts_in_sorted_order() {
        let dir = tempfile::tempdir().unwrap();
        write_script(
            dir.path(),
            "b.lua",
            r#"wren.setup{ name = "beta", version = "1", description = "b" }"#,
        );
        write_script(
            dir.path(),
            "a.lua",
            r#"wren.setup{ name = "alpha", version = "1", description = "a" }"#,
        );

        let deps = deps();
        let plugins = load_dir(dir.path(), &deps).unwrap();
        let names: Vec<&str> = plugins.iter().map(Plugin::name).collect();
        assert_eq!(names, ["alpha", "beta"]);
    }

    #[test]
    fn skips_incomplete_descriptor_and_ignores_other_files() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "nameless.lua", r#"wren.setup{ version = "1" }"#);
        write_script(dir.path(), "notes.txt", "not a script");
        write_script(
            dir.path(),
            "real.lua",
            r#"wren.setup{ name = "real", version = "1", description = "r" }"#,
        );

        let deps = deps();
        let plugins = load_dir(dir.path(), &deps).unwrap();
        assert_eq!(plugins.len(), 1);
        assert_eq!(plugins[0].name(), "real");
    }

    #[test]
    fn eval_failure_aborts_the_load() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "broken.lua", "this is not lua (");

        let deps = deps();
        assert!(matches!(
            load_dir(dir.path(), &deps),
            Err(HostError::Load(_))
        ));
    }

    #[test]
    fn init_runs_with_previous_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        write_script(
            dir.path(),
            "up.lua",
            r#"
            wren.setup{ name = "up", version = "2.0.0", description = "d" }
            wren.onInit(function(prev)
                if prev == nil then
                    sql.exec("CREATE TABLE seen (version TEXT)")
                    sql.exec("INSERT INTO seen (version) VALUES ('fresh')")
                else
                    sql.exec("INSERT INTO seen (version) VALUES (?)", prev.version)
                end
            end)
            "#,
        );

        let deps = deps();
        load_dir(dir.path(), &deps).unwrap();
        // Descriptor was persisted under its name.
        let stored = deps.db.plugin("up").unwrap().unwrap();
        assert_eq!(stored.version, "2.0.0");

        // Second load sees the stored record as `prev`.
        let plugins = load_dir(dir.path(), &deps).unwrap();
        let versions: Vec<String> = plugins[0]
            .engine
            .call(|lua| {
                lua.load(
                    r#"
                    local out = {}
                    for _, row in ipairs(sql.query("SELECT version FROM seen ORDER BY rowid")) do
                        out[#out + 1] = row.version
                    end
                    return out
                    "#,
                )
                .eval::<Vec<String>>()
            })
            .unwrap();
        assert_eq!(versions, ["fresh", "2.0.0"]);
    }

    #[test]
    fn init_failure_aborts_with_plugin_name() {
        let dir = tempfile::tempdir().unwrap();
        write_script(
            dir.path(),
            "bad.lua",
            r#"
            wren.setup{ name = "bad", version = "1", description = "d" }
            wren.onInit(function(prev) error("nope") end)
            "#,
        );

        let deps = deps();
        let err = match load_dir(dir.path(), &deps) {
            Ok(_) => panic!("load should fail when init raises"),
            Err(err) => err,
        };
        assert!(matches!(err, HostError::Load(msg) if msg.contains("init")));
    }
}
