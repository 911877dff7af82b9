//! Guest-visible API surface.
//!
//! Binding happens in two stages on the plugin's worker thread. Before the
//! script is evaluated, only the registration API (`wren`, `print`) exists;
//! the script declares its descriptor, commands, handlers and lifecycle
//! hooks into worker-local [`SurfaceState`]. Once the descriptor has been
//! validated, the capability globals (`sql`, `vercmp`, `cache`, `tickets`,
//! `eventlog`, `fetch`) are bound against that identity.
//!
//! Guest-visible names are derived from the host-side ones through
//! [`lower_camel`] once, at bind time.

use std::sync::Arc;

use mlua::{Function, Lua, RegistryKey, Table, Value, Variadic};
use tracing::warn;

use crate::enablement::EnablementStore;
use crate::engine::ScriptEngine;
use crate::events::{EventDispatcher, HandlerEntry};
use crate::fetch::{FetchOptions, Fetcher};
use crate::gateway::{EventLogEntry, HostServices};
use crate::permissions::{Permission, Permissions};
use crate::plugin::CommandSpec;
use crate::vercmp;
use wren_sqlscope::TableNamespace;
use wren_storage::{Database, PluginDescriptor, SqlRow, SqlValue};

/// Registrations collected while a script runs, before the host has decided
/// whether the plugin is valid. Lives in the worker's Lua app data.
#[derive(Default)]
pub(crate) struct SurfaceState {
    pub descriptor: Option<PluginDescriptor>,
    pub commands: Vec<CommandDraft>,
    pub handlers: Vec<(String, RegistryKey)>,
    pub init: Option<RegistryKey>,
    pub on_enable: Option<RegistryKey>,
    pub on_disable: Option<RegistryKey>,
}

/// Command node as declared by the script, before host-side adoption.
pub(crate) struct CommandDraft {
    pub name: String,
    pub description: String,
    pub usage: String,
    pub permissions: Permissions,
    pub exec: Option<RegistryKey>,
    pub subcommands: Vec<CommandDraft>,
}

impl CommandDraft {
    fn into_spec(self) -> CommandSpec {
        CommandSpec {
            name: self.name,
            description: self.description,
            usage: self.usage,
            permissions: self.permissions,
            exec: self.exec.map(Arc::new),
            subcommands: self.subcommands.into_iter().map(Self::into_spec).collect(),
        }
    }
}

/// Registrations extracted from [`SurfaceState`] after init has run.
pub(crate) struct LoadedSurface {
    pub commands: Vec<CommandSpec>,
    pub handlers: Vec<(String, Arc<RegistryKey>)>,
    pub on_enable: Option<Arc<RegistryKey>>,
    pub on_disable: Option<Arc<RegistryKey>>,
}

/// Everything a capability binding may reach back into the host for.
#[derive(Clone)]
pub(crate) struct CapabilityDeps {
    pub db: Arc<Database>,
    pub services: HostServices,
    pub enablement: Arc<EnablementStore>,
    pub events: Arc<EventDispatcher>,
    pub engine: ScriptEngine,
}

/// Translates a host-side snake_case member name into the guest spelling.
pub(crate) fn lower_camel(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for (i, part) in name.split('_').filter(|p| !p.is_empty()).enumerate() {
        if i == 0 {
            out.push_str(&part.to_ascii_lowercase());
        } else {
            let mut chars = part.chars();
            if let Some(first) = chars.next() {
                out.extend(first.to_uppercase());
                out.push_str(chars.as_str());
            }
        }
    }
    out
}

// ==================== stage 1: registration API ====================

/// Binds the registration API into a fresh guest state. Must run before the
/// script is evaluated.
pub(crate) fn install_registration_api(lua: &Lua, script_path: &str) -> mlua::Result<()> {
    lua.set_app_data(SurfaceState::default());
    let globals = lua.globals();

    let wren = lua.create_table()?;

    wren.set(
        lower_camel("setup"),
        lua.create_function(|lua, spec: Table| {
            let descriptor = PluginDescriptor {
                name: spec.get::<Option<String>>("name")?.unwrap_or_default(),
                version: spec.get::<Option<String>>("version")?.unwrap_or_default(),
                description: spec
                    .get::<Option<String>>("description")?
                    .unwrap_or_default(),
            };
            state_mut(lua)?.descriptor = Some(descriptor);
            Ok(())
        })?,
    )?;

    wren.set(
        lower_camel("command"),
        lua.create_function(|lua, spec: Table| {
            let draft = parse_command(lua, &spec)?;
            state_mut(lua)?.commands.push(draft);
            Ok(())
        })?,
    )?;

    let path = script_path.to_string();
    wren.set(
        lower_camel("on"),
        lua.create_function(move |lua, (tag, callback): (String, Function)| {
            let key = lua.create_registry_value(callback)?;
            let mut state = state_mut(lua)?;
            if !state
                .descriptor
                .as_ref()
                .is_some_and(PluginDescriptor::is_complete)
            {
                warn!(path = %path, "plugin information not provided, ignoring handler registration");
                return Ok(());
            }
            state.handlers.push((tag, key));
            Ok(())
        })?,
    )?;

    wren.set(
        lower_camel("on_init"),
        lua.create_function(|lua, callback: Function| {
            state_mut(lua)?.init = Some(lua.create_registry_value(callback)?);
            Ok(())
        })?,
    )?;
    wren.set(
        lower_camel("on_enable"),
        lua.create_function(|lua, callback: Function| {
            state_mut(lua)?.on_enable = Some(lua.create_registry_value(callback)?);
            Ok(())
        })?,
    )?;
    wren.set(
        lower_camel("on_disable"),
        lua.create_function(|lua, callback: Function| {
            state_mut(lua)?.on_disable = Some(lua.create_registry_value(callback)?);
            Ok(())
        })?,
    )?;

    globals.set("wren", wren)?;

    let print_path = script_path.to_string();
    globals.set(
        "print",
        lua.create_function(move |_, args: Variadic<Value>| {
            let line = args
                .iter()
                .map(|v| v.to_string().unwrap_or_else(|_| format!("{v:?}")))
                .collect::<Vec<_>>()
                .join("\t");
            tracing::info!(script = %print_path, "{line}");
            Ok(())
        })?,
    )?;

    Ok(())
}

fn parse_command(lua: &Lua, spec: &Table) -> mlua::Result<CommandDraft> {
    let name: String = spec
        .get::<Option<String>>("name")?
        .filter(|n| !n.is_empty())
        .ok_or_else(|| mlua::Error::RuntimeError("command registration requires a name".into()))?;

    let mut permissions = Permissions::empty();
    if let Some(list) = spec.get::<Option<Table>>("permissions")? {
        for value in list.sequence_values::<String>() {
            let value = value?;
            match Permission::from_name(&value) {
                Some(p) => permissions.insert(p),
                None => warn!(command = %name, permission = %value, "unknown permission, ignoring"),
            }
        }
    }

    let exec = spec
        .get::<Option<Function>>("exec")?
        .map(|f| lua.create_registry_value(f))
        .transpose()?;

    let mut subcommands = Vec::new();
    if let Some(list) = spec.get::<Option<Table>>("subcommands")? {
        for sub in list.sequence_values::<Table>() {
            subcommands.push(parse_command(lua, &sub?)?);
        }
    }

    Ok(CommandDraft {
        name,
        description: spec.get::<Option<String>>("description")?.unwrap_or_default(),
        usage: spec.get::<Option<String>>("usage")?.unwrap_or_default(),
        permissions,
        exec,
        subcommands,
    })
}

fn state_mut(lua: &Lua) -> mlua::Result<mlua::AppDataRefMut<'_, SurfaceState>> {
    lua.app_data_mut::<SurfaceState>()
        .ok_or_else(|| mlua::Error::RuntimeError("registration surface not installed".into()))
}

/// Descriptor declared so far, if any.
pub(crate) fn peek_descriptor(lua: &Lua) -> mlua::Result<Option<PluginDescriptor>> {
    Ok(lua
        .app_data_ref::<SurfaceState>()
        .and_then(|state| state.descriptor.clone()))
}

// ==================== stage 2: capability globals ====================

/// Binds the capability globals for a validated plugin. Also rebinds
/// `wren.on` so handlers registered after load go straight to the
/// dispatcher, and adds `wren.enabled`.
pub(crate) fn bind_capabilities(
    lua: &Lua,
    deps: &CapabilityDeps,
    descriptor: &PluginDescriptor,
) -> mlua::Result<()> {
    let globals = lua.globals();

    globals.set("sql", sql_table(lua, deps, descriptor)?)?;
    globals.set("vercmp", vercmp_table(lua)?)?;
    globals.set("cache", cache_table(lua, deps)?)?;
    globals.set("tickets", tickets_table(lua, deps)?)?;
    globals.set("eventlog", eventlog_table(lua, deps)?)?;

    let fetcher = Arc::new(
        Fetcher::new(&descriptor.name, &descriptor.version)
            .map_err(mlua::Error::external)?,
    );
    globals.set(
        "fetch",
        lua.create_function(move |lua, (url, opts): (String, Option<Table>)| {
            let opts = parse_fetch_options(opts)?;
            let response = fetcher.fetch(&url, opts).map_err(mlua::Error::external)?;
            fetch_response_table(lua, response)
        })?,
    )?;

    let wren: Table = globals.get("wren")?;

    let enablement = Arc::clone(&deps.enablement);
    let plugin_name = descriptor.name.clone();
    wren.set(
        lower_camel("enabled"),
        lua.create_function(move |_, guild_id: String| {
            Ok(enablement.is_enabled(&guild_id, &plugin_name))
        })?,
    )?;

    // Handlers registered from here on (init, commands, other handlers)
    // become live on the next dispatch rather than waiting for load
    // extraction.
    let events = Arc::clone(&deps.events);
    let engine = deps.engine.clone();
    let plugin_name = descriptor.name.clone();
    wren.set(
        lower_camel("on"),
        lua.create_function(move |lua, (tag, callback): (String, Function)| {
            let key = lua.create_registry_value(callback)?;
            events.register(HandlerEntry::new(
                plugin_name.clone(),
                tag,
                engine.clone(),
                Arc::new(key),
            ));
            Ok(())
        })?,
    )?;

    Ok(())
}

fn sql_table(lua: &Lua, deps: &CapabilityDeps, descriptor: &PluginDescriptor) -> mlua::Result<Table> {
    let ns = TableNamespace::for_plugin(&descriptor.name);
    let t = lua.create_table()?;

    let db = Arc::clone(&deps.db);
    let namespace = ns.clone();
    t.set(
        lower_camel("exec"),
        lua.create_function(move |_, (sql, args): (String, Variadic<Value>)| {
            let sql = wren_sqlscope::rewrite(&sql, &namespace).map_err(mlua::Error::external)?;
            let args = to_sql_args(args)?;
            let changed = db.exec(&sql, &args).map_err(mlua::Error::external)?;
            Ok(changed as i64)
        })?,
    )?;

    let db = Arc::clone(&deps.db);
    let namespace = ns.clone();
    t.set(
        lower_camel("query"),
        lua.create_function(move |lua, (sql, args): (String, Variadic<Value>)| {
            let sql = wren_sqlscope::rewrite(&sql, &namespace).map_err(mlua::Error::external)?;
            let args = to_sql_args(args)?;
            let rows = db.query(&sql, &args).map_err(mlua::Error::external)?;
            let out = lua.create_table()?;
            for (i, row) in rows.into_iter().enumerate() {
                out.set(i as i64 + 1, row_table(lua, row)?)?;
            }
            Ok(out)
        })?,
    )?;

    let db = Arc::clone(&deps.db);
    t.set(
        lower_camel("query_one"),
        lua.create_function(move |lua, (sql, args): (String, Variadic<Value>)| {
            let sql = wren_sqlscope::rewrite(&sql, &ns).map_err(mlua::Error::external)?;
            let args = to_sql_args(args)?;
            match db.query_one(&sql, &args).map_err(mlua::Error::external)? {
                Some(row) => Ok(Value::Table(row_table(lua, row)?)),
                None => Ok(Value::Nil),
            }
        })?,
    )?;

    Ok(t)
}

fn vercmp_table(lua: &Lua) -> mlua::Result<Table> {
    let t = lua.create_table()?;
    t.set(
        lower_camel("newer"),
        lua.create_function(|_, (a, b): (String, String)| Ok(vercmp::newer(&a, &b)))?,
    )?;
    t.set(
        lower_camel("older"),
        lua.create_function(|_, (a, b): (String, String)| Ok(vercmp::older(&a, &b)))?,
    )?;
    t.set(
        lower_camel("equal"),
        lua.create_function(|_, (a, b): (String, String)| Ok(vercmp::equal(&a, &b)))?,
    )?;
    t.set(
        lower_camel("compare"),
        lua.create_function(|_, (a, b): (String, String)| {
            Ok(match vercmp::compare(&a, &b) {
                std::cmp::Ordering::Less => -1,
                std::cmp::Ordering::Equal => 0,
                std::cmp::Ordering::Greater => 1,
            })
        })?,
    )?;
    Ok(t)
}

fn cache_table(lua: &Lua, deps: &CapabilityDeps) -> mlua::Result<Table> {
    use mlua::LuaSerdeExt;
    let t = lua.create_table()?;

    let cache = Arc::clone(&deps.services.cache);
    t.set(
        lower_camel("channel"),
        lua.create_function(move |lua, (guild_id, channel_id): (String, String)| {
            let info = cache
                .channel(&guild_id, &channel_id)
                .map_err(mlua::Error::external)?;
            lua.to_value(&info)
        })?,
    )?;

    let cache = Arc::clone(&deps.services.cache);
    t.set(
        lower_camel("member"),
        lua.create_function(move |lua, (guild_id, user_id): (String, String)| {
            let info = cache
                .member(&guild_id, &user_id)
                .map_err(mlua::Error::external)?;
            lua.to_value(&info)
        })?,
    )?;

    let cache = Arc::clone(&deps.services.cache);
    t.set(
        lower_camel("role"),
        lua.create_function(move |lua, (guild_id, role_id): (String, String)| {
            let info = cache
                .role(&guild_id, &role_id)
                .map_err(mlua::Error::external)?;
            lua.to_value(&info)
        })?,
    )?;

    let cache = Arc::clone(&deps.services.cache);
    t.set(
        lower_camel("roles"),
        lua.create_function(move |lua, guild_id: String| {
            let roles = cache.roles(&guild_id).map_err(mlua::Error::external)?;
            lua.to_value(&roles)
        })?,
    )?;

    Ok(t)
}

fn tickets_table(lua: &Lua, deps: &CapabilityDeps) -> mlua::Result<Table> {
    let t = lua.create_table()?;

    let tickets = Arc::clone(&deps.services.tickets);
    t.set(
        lower_camel("open"),
        lua.create_function(
            move |_, (guild_id, user_id, executor_id): (String, String, String)| {
                tickets
                    .open(&guild_id, &user_id, &executor_id)
                    .map_err(mlua::Error::external)
            },
        )?,
    )?;

    let tickets = Arc::clone(&deps.services.tickets);
    t.set(
        lower_camel("close"),
        lua.create_function(
            move |_, (guild_id, user_id, executor_id): (String, String, String)| {
                tickets
                    .close(&guild_id, &user_id, &executor_id)
                    .map_err(mlua::Error::external)
            },
        )?,
    )?;

    Ok(t)
}

fn eventlog_table(lua: &Lua, deps: &CapabilityDeps) -> mlua::Result<Table> {
    let t = lua.create_table()?;
    let eventlog = Arc::clone(&deps.services.eventlog);
    t.set(
        lower_camel("log"),
        lua.create_function(move |_, (guild_id, entry): (String, Table)| {
            let entry = EventLogEntry {
                title: entry.get::<Option<String>>("title")?.unwrap_or_default(),
                description: entry
                    .get::<Option<String>>("description")?
                    .unwrap_or_default(),
                author_id: entry.get::<Option<String>>("authorId")?.unwrap_or_default(),
            };
            eventlog
                .append(&guild_id, entry)
                .map_err(mlua::Error::external)
        })?,
    )?;
    Ok(t)
}

fn parse_fetch_options(opts: Option<Table>) -> mlua::Result<FetchOptions> {
    let Some(opts) = opts else {
        return Ok(FetchOptions::default());
    };
    let mut parsed = FetchOptions {
        method: opts.get::<Option<String>>("method")?,
        body: opts.get::<Option<String>>("body")?,
        ..FetchOptions::default()
    };
    if let Some(handle) = opts.get::<Option<bool>>("handleCookies")? {
        parsed.handle_cookies = handle;
    }
    if let Some(headers) = opts.get::<Option<Table>>("headers")? {
        for pair in headers.pairs::<String, String>() {
            let (key, value) = pair?;
            parsed.headers.push((key, value));
        }
    }
    Ok(parsed)
}

fn fetch_response_table(lua: &Lua, response: crate::fetch::FetchResponse) -> mlua::Result<Table> {
    use mlua::LuaSerdeExt;

    let t = lua.create_table()?;
    t.set(lower_camel("status"), response.status)?;
    t.set(lower_camel("status_code"), response.status_code)?;

    let headers = lua.create_table()?;
    for (key, value) in response.headers {
        headers.set(key, value)?;
    }
    t.set(lower_camel("headers"), headers)?;

    let body = Arc::new(response.body);
    let text_body = Arc::clone(&body);
    t.set(
        lower_camel("text"),
        lua.create_function(move |lua, ()| lua.create_string(text_body.as_slice()))?,
    )?;
    t.set(
        lower_camel("json"),
        lua.create_function(move |lua, ()| {
            let parsed: serde_json::Value =
                serde_json::from_slice(&body).map_err(mlua::Error::external)?;
            lua.to_value(&parsed)
        })?,
    )?;

    Ok(t)
}

// ==================== stage 3: extraction ====================

/// Calls the script's init hook, if declared, passing the previously
/// persisted descriptor (or nil on first load).
pub(crate) fn call_init(lua: &Lua, prev: Option<PluginDescriptor>) -> mlua::Result<()> {
    use mlua::LuaSerdeExt;

    let Some(key) = state_mut(lua)?.init.take() else {
        return Ok(());
    };
    let init: Function = lua.registry_value(&key)?;
    lua.remove_registry_value(key)?;
    let prev = match prev {
        Some(descriptor) => lua.to_value(&descriptor)?,
        None => Value::Nil,
    };
    init.call::<()>(prev)
}

/// Drains everything the script registered into host-side form. The state
/// itself stays installed so later registrations still have a home.
pub(crate) fn extract(lua: &Lua) -> mlua::Result<LoadedSurface> {
    let mut state = state_mut(lua)?;
    Ok(LoadedSurface {
        commands: std::mem::take(&mut state.commands)
            .into_iter()
            .map(CommandDraft::into_spec)
            .collect(),
        handlers: std::mem::take(&mut state.handlers)
            .into_iter()
            .map(|(tag, key)| (tag, Arc::new(key)))
            .collect(),
        on_enable: state.on_enable.take().map(Arc::new),
        on_disable: state.on_disable.take().map(Arc::new),
    })
}

// ==================== conversions ====================

fn to_sql_args(values: Variadic<Value>) -> mlua::Result<Vec<SqlValue>> {
    values
        .into_iter()
        .map(|value| match value {
            Value::Nil => Ok(SqlValue::Null),
            Value::Boolean(b) => Ok(SqlValue::Integer(b as i64)),
            Value::Integer(i) => Ok(SqlValue::Integer(i)),
            Value::Number(f) => Ok(SqlValue::Real(f)),
            Value::String(s) => Ok(SqlValue::Text(s.to_string_lossy().to_string())),
            other => Err(mlua::Error::RuntimeError(format!(
                "unsupported sql argument type: {}",
                other.type_name()
            ))),
        })
        .collect()
}

fn row_table(lua: &Lua, row: SqlRow) -> mlua::Result<Table> {
    let t = lua.create_table()?;
    for (column, value) in row {
        match value {
            SqlValue::Null => {}
            SqlValue::Integer(i) => t.set(column, i)?,
            SqlValue::Real(f) => t.set(column, f)?,
            SqlValue::Text(s) => t.set(column, s)?,
            SqlValue::Blob(b) => t.set(column, lua.create_string(&b)?)?,
        }
    }
    Ok(t)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lower_camel_translation() {
        assert_eq!(lower_camel("exec"), "exec");
        assert_eq!(lower_camel("query_one"), "queryOne");
        assert_eq!(lower_camel("on_disable"), "onDisable");
        assert_eq!(lower_camel("handle_cookies"), "handleCookies");
    }

    #[test]
    fn setup_records_descriptor() {
        let lua = Lua::new();
        install_registration_api(&lua, "test.lua").unwrap();
        lua.load(r#"wren.setup{ name = "greeter", version = "1.0.0", description = "hi" }"#)
            .exec()
            .unwrap();
        let descriptor = peek_descriptor(&lua).unwrap().unwrap();
        assert_eq!(descriptor.name, "greeter");
        assert!(descriptor.is_complete());
    }

    #[test]
    fn incomplete_descriptor_blocks_handlers() {
        let lua = Lua::new();
        install_registration_api(&lua, "test.lua").unwrap();
        lua.load(
            r#"
            wren.on("MessageCreate", function(e) end)
            wren.setup{ name = "x", version = "1", description = "d" }
            wren.on("MessageDelete", function(e) end)
            "#,
        )
        .exec()
        .unwrap();
        let surface = extract(&lua).unwrap();
        let tags: Vec<&str> = surface.handlers.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(tags, ["MessageDelete"]);
    }

    #[test]
    fn command_tree_parses_with_permissions() {
        let lua = Lua::new();
        install_registration_api(&lua, "test.lua").unwrap();
        lua.load(
            r#"
            wren.setup{ name = "mod", version = "1", description = "d" }
            wren.command{
                name = "warn",
                description = "Warn a member",
                usage = "<user>",
                permissions = { "kick_members", "not_a_permission" },
                exec = function(ctx, args) return "warned" end,
                subcommands = {
                    { name = "list", description = "List warnings", exec = function() end },
                },
            }
            "#,
        )
        .exec()
        .unwrap();

        let surface = extract(&lua).unwrap();
        assert_eq!(surface.commands.len(), 1);
        let warn = &surface.commands[0];
        assert_eq!(warn.name, "warn");
        assert_eq!(warn.usage, "<user>");
        assert!(warn.is_executable());
        assert!(warn.permissions.contains(Permission::KickMembers));
        assert_eq!(warn.permissions.len(), 1);
        assert_eq!(warn.subcommands.len(), 1);
        assert_eq!(warn.subcommands[0].name, "list");
    }

    #[test]
    fn command_without_name_is_an_error() {
        let lua = Lua::new();
        install_registration_api(&lua, "test.lua").unwrap();
        let err = lua
            .load(r#"wren.command{ description = "nameless" }"#)
            .exec()
            .unwrap_err();
        assert!(err.to_string().contains("requires a name"));
    }

    #[test]
    fn sql_args_convert_scalars_only() {
        let lua = Lua::new();
        let args: Variadic<Value> = Variadic::from_iter([
            Value::Nil,
            Value::Boolean(true),
            Value::Integer(7),
            Value::Number(1.5),
        ]);
        let converted = to_sql_args(args).unwrap();
        assert_eq!(
            converted,
            vec![
                SqlValue::Null,
                SqlValue::Integer(1),
                SqlValue::Integer(7),
                SqlValue::Real(1.5),
            ]
        );

        let table = lua.create_table().unwrap();
        let bad: Variadic<Value> = Variadic::from_iter([Value::Table(table)]);
        assert!(to_sql_args(bad).is_err());
    }
}
