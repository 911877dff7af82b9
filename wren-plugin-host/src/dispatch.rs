//! Execution, help and autocomplete over the plugin command trees.
//!
//! The raw command string is shell-tokenized, then resolved against each
//! enabled plugin in load order; the first plugin whose tree matches wins.
//! Permissions are checked on the resolved node only.

use std::sync::Arc;

use mlua::Function;

use crate::enablement::EnablementStore;
use crate::error::HostError;
use crate::plugin::{resolve, CommandSpec, Plugin};
use crate::registry::{Invoker, Reply};

/// Runs a plugin command for an invoker.
pub(crate) fn run(
    plugins: &[Plugin],
    enablement: &EnablementStore,
    guild_id: &str,
    invoker: &Invoker,
    raw: &str,
) -> Result<Reply, HostError> {
    let tokens = tokenize(raw)?;

    for plugin in plugins {
        if !enablement.is_enabled(guild_id, plugin.name()) {
            continue;
        }
        let Some((cmd, rest)) = resolve(&plugin.commands, &tokens) else {
            continue;
        };

        check_permissions(cmd, invoker)?;
        let exec = cmd
            .exec
            .as_ref()
            .ok_or_else(|| HostError::NotExecutable(cmd.name.clone()))?;

        let callback = Arc::clone(exec);
        let guild_id = guild_id.to_string();
        let user_id = invoker.user_id.clone();
        let command = cmd.name.clone();
        let args: Vec<String> = rest.to_vec();

        let text = plugin.engine.call(move |lua| {
            let ctx = lua.create_table()?;
            ctx.set("guildId", guild_id)?;
            ctx.set("userId", user_id)?;
            ctx.set("command", command)?;
            let handler: Function = lua.registry_value(&callback)?;
            handler.call::<Option<String>>((ctx, args))
        })?;

        return Ok(Reply::private(text.unwrap_or_default()));
    }

    Err(HostError::CommandNotFound(tokens[0].clone()))
}

/// Renders the help text for a plugin command.
pub(crate) fn help(
    plugins: &[Plugin],
    enablement: &EnablementStore,
    guild_id: &str,
    invoker: &Invoker,
    raw: &str,
) -> Result<Reply, HostError> {
    let tokens = tokenize(raw)?;

    for plugin in plugins {
        if !enablement.is_enabled(guild_id, plugin.name()) {
            continue;
        }
        let Some((cmd, _)) = resolve(&plugin.commands, &tokens) else {
            continue;
        };

        check_permissions(cmd, invoker)?;

        let mut text = format!("Command `{}`\nUsage: `{raw}", cmd.name);
        if !cmd.usage.is_empty() {
            text.push(' ');
            text.push_str(&cmd.usage);
        }
        text.push('`');
        text.push_str("\n\nDescription:\n```text\n");
        text.push_str(&cmd.description);
        text.push_str("\n```\n");

        if !cmd.subcommands.is_empty() {
            text.push_str("Subcommands:\n");
            for sub in &cmd.subcommands {
                text.push_str("- `");
                text.push_str(&sub.name);
                if !sub.usage.is_empty() {
                    text.push(' ');
                    text.push_str(&sub.usage);
                }
                text.push_str("`: `");
                text.push_str(&sub.description);
                text.push_str("`\n");
            }
        }

        return Ok(Reply::private(text));
    }

    Err(HostError::CommandNotFound(tokens[0].clone()))
}

/// Enumerates qualified command strings matching a partial input.
pub(crate) fn autocomplete(
    plugins: &[Plugin],
    enablement: &EnablementStore,
    guild_id: &str,
    invoker: &Invoker,
    partial: &str,
) -> Vec<String> {
    let mut out = Vec::new();
    for plugin in plugins {
        if !enablement.is_enabled(guild_id, plugin.name()) {
            continue;
        }
        choices(partial.trim(), "", &plugin.commands, invoker, &mut out);
    }
    out
}

fn choices(
    partial: &str,
    prefix: &str,
    commands: &[CommandSpec],
    invoker: &Invoker,
    out: &mut Vec<String>,
) {
    for cmd in commands {
        // A node the invoker may not run is skipped, but enumeration goes
        // on past it.
        if !invoker.permissions.contains_all(&cmd.permissions) {
            continue;
        }

        let remaining = partial.strip_prefix(cmd.name.as_str()).unwrap_or(partial);
        choices(
            remaining.trim_start(),
            &format!("{prefix}{} ", cmd.name),
            &cmd.subcommands,
            invoker,
            out,
        );

        if cmd.exec.is_none() {
            continue;
        }
        let qualified = format!("{prefix}{}", cmd.name);
        if qualified.contains(partial) {
            out.push(qualified);
        }
    }
}

fn tokenize(raw: &str) -> Result<Vec<String>, HostError> {
    let tokens = shlex::split(raw)
        .ok_or_else(|| HostError::BadInvocation(format!("unbalanced quoting: {raw}")))?;
    if tokens.is_empty() {
        return Err(HostError::CommandNotFound(raw.to_string()));
    }
    Ok(tokens)
}

fn check_permissions(cmd: &CommandSpec, invoker: &Invoker) -> Result<(), HostError> {
    if let Some(missing) = invoker.permissions.first_missing(&cmd.permissions) {
        return Err(HostError::PermissionDenied {
            command: cmd.name.clone(),
            permission: missing.name().to_string(),
        });
    }
    Ok(())
}
