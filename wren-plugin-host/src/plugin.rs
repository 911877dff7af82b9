//! Loaded plugin representation and command-tree resolution.

use std::path::PathBuf;
use std::sync::Arc;

use mlua::RegistryKey;

use crate::engine::ScriptEngine;
use crate::permissions::Permissions;
use wren_storage::PluginDescriptor;

/// One node of a plugin's command tree.
#[derive(Clone)]
pub struct CommandSpec {
    pub name: String,
    pub description: String,
    pub usage: String,
    pub permissions: Permissions,
    /// Callback run when the node is executed. A node without one is a
    /// pure grouping node.
    pub exec: Option<Arc<RegistryKey>>,
    pub subcommands: Vec<CommandSpec>,
}

impl CommandSpec {
    pub fn is_executable(&self) -> bool {
        self.exec.is_some()
    }
}

/// A successfully loaded plugin.
pub struct Plugin {
    pub descriptor: PluginDescriptor,
    pub path: PathBuf,
    pub engine: ScriptEngine,
    pub commands: Vec<CommandSpec>,
    pub(crate) on_enable: Option<Arc<RegistryKey>>,
    pub(crate) on_disable: Option<Arc<RegistryKey>>,
}

impl Plugin {
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }
}

/// Resolves a token list against a command tree.
///
/// Matches the first token at the current level, then greedily tries to
/// descend with the remaining tokens. If no deeper node matches, the
/// remaining tokens become the arguments of the node matched so far.
pub fn resolve<'a>(
    commands: &'a [CommandSpec],
    args: &'a [String],
) -> Option<(&'a CommandSpec, &'a [String])> {
    let (first, rest) = args.split_first()?;
    for cmd in commands {
        if cmd.name != *first {
            continue;
        }
        if !cmd.subcommands.is_empty() && !rest.is_empty() {
            if let Some(found) = resolve(&cmd.subcommands, rest) {
                return Some(found);
            }
        }
        return Some((cmd, rest));
    }
    None
}
