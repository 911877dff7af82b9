//! Host-level command registry.
//!
//! Commands register a handler plus a declarative schema. Schemas accumulate
//! until [`CommandRegistry::publish`] pushes them to the network in one
//! batch; [`CommandRegistry::reconcile`] deletes anything published remotely
//! that no longer has a local handler.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::error::HostError;
use crate::gateway::{ChatGateway, CommandSchema};
use crate::permissions::Permissions;

/// Signature of a host command handler.
pub type CommandHandler = Arc<dyn Fn(&CommandInvocation) -> Result<Reply, HostError> + Send + Sync>;

/// Who invoked a command, with the permissions the network resolved for
/// them in the invoking channel.
#[derive(Debug, Clone)]
pub struct Invoker {
    pub user_id: String,
    pub permissions: Permissions,
}

/// A single command interaction as received from the network.
#[derive(Debug, Clone)]
pub struct CommandInvocation {
    /// Empty outside any guild.
    pub guild_id: String,
    pub invoker: Invoker,
    pub subcommand: Option<String>,
    pub arg: Option<String>,
}

/// Handler response sent back to the invoker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    /// Private replies are shown only to the invoker.
    pub private: bool,
}

impl Reply {
    pub fn public(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            private: false,
        }
    }

    pub fn private(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            private: true,
        }
    }
}

#[derive(Default)]
struct RegistryInner {
    handlers: HashMap<String, CommandHandler>,
    /// Schemas not yet pushed to the network.
    pending: Vec<CommandSchema>,
}

/// Thread-safe name-to-handler map plus pending schema batch.
#[derive(Default)]
pub struct CommandRegistry {
    inner: Mutex<RegistryInner>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a command. A name that is already taken is skipped.
    pub fn register(&self, schema: CommandSchema, handler: CommandHandler) {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        if inner.handlers.contains_key(&schema.name) {
            warn!(command = %schema.name, "command already registered, skipping");
            return;
        }
        inner.handlers.insert(schema.name.clone(), handler);
        inner.pending.push(schema);
    }

    /// Routes an interaction to its handler.
    pub fn dispatch(&self, name: &str, invocation: &CommandInvocation) -> Result<Reply, HostError> {
        let handler = {
            let inner = self.inner.lock().expect("registry lock poisoned");
            inner
                .handlers
                .get(name)
                .cloned()
                .ok_or_else(|| HostError::CommandNotFound(name.to_string()))?
        };
        handler(invocation)
    }

    /// Pushes all pending schemas to the network in one batch. The batch is
    /// dropped afterwards so repeated publishes are cheap no-ops.
    pub fn publish(&self, gateway: &dyn ChatGateway) -> Result<(), HostError> {
        let pending = {
            let mut inner = self.inner.lock().expect("registry lock poisoned");
            std::mem::take(&mut inner.pending)
        };
        if pending.is_empty() {
            return Ok(());
        }
        gateway.publish_commands(&pending)?;
        info!(count = pending.len(), "published commands");
        Ok(())
    }

    /// Deletes remotely published commands that have no local handler.
    /// Returns how many were removed.
    pub fn reconcile(&self, gateway: &dyn ChatGateway) -> Result<usize, HostError> {
        let published = gateway.published_commands()?;
        let mut deleted = 0;
        for remote in published {
            let known = {
                let inner = self.inner.lock().expect("registry lock poisoned");
                inner.handlers.contains_key(&remote.name)
            };
            if !known {
                gateway.delete_command(&remote.id)?;
                deleted += 1;
            }
        }
        if deleted > 0 {
            info!(deleted, "removed stale published commands");
        }
        Ok(deleted)
    }

    pub fn names(&self) -> Vec<String> {
        let inner = self.inner.lock().expect("registry lock poisoned");
        let mut names: Vec<String> = inner.handlers.keys().cloned().collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::PublishedCommand;
    use std::sync::Mutex as StdMutex;

    fn schema(name: &str) -> CommandSchema {
        CommandSchema {
            name: name.into(),
            description: "test command".into(),
            options: Vec::new(),
            default_permissions: None,
        }
    }

    fn echo_handler() -> CommandHandler {
        Arc::new(|inv| Ok(Reply::private(inv.arg.clone().unwrap_or_default())))
    }

    fn invocation(arg: &str) -> CommandInvocation {
        CommandInvocation {
            guild_id: "g1".into(),
            invoker: Invoker {
                user_id: "u1".into(),
                permissions: Permissions::empty(),
            },
            subcommand: None,
            arg: Some(arg.into()),
        }
    }

    #[derive(Default)]
    struct FakeGateway {
        published: StdMutex<Vec<CommandSchema>>,
        remote: StdMutex<Vec<PublishedCommand>>,
        deleted: StdMutex<Vec<String>>,
    }

    impl ChatGateway for FakeGateway {
        fn publish_commands(&self, schemas: &[CommandSchema]) -> Result<(), HostError> {
            self.published.lock().unwrap().extend_from_slice(schemas);
            Ok(())
        }

        fn published_commands(&self) -> Result<Vec<PublishedCommand>, HostError> {
            Ok(self.remote.lock().unwrap().clone())
        }

        fn delete_command(&self, command_id: &str) -> Result<(), HostError> {
            self.deleted.lock().unwrap().push(command_id.to_string());
            Ok(())
        }
    }

    #[test]
    fn register_and_dispatch() {
        let registry = CommandRegistry::new();
        registry.register(schema("echo"), echo_handler());

        let reply = registry.dispatch("echo", &invocation("hello")).unwrap();
        assert_eq!(reply, Reply::private("hello"));

        assert!(matches!(
            registry.dispatch("nope", &invocation("x")),
            Err(HostError::CommandNotFound(_))
        ));
    }

    #[test]
    fn duplicate_registration_is_skipped() {
        let registry = CommandRegistry::new();
        registry.register(schema("echo"), echo_handler());
        registry.register(
            schema("echo"),
            Arc::new(|_| Ok(Reply::private("other"))),
        );

        let reply = registry.dispatch("echo", &invocation("hi")).unwrap();
        assert_eq!(reply.text, "hi");
        assert_eq!(registry.names(), vec!["echo".to_string()]);
    }

    #[test]
    fn publish_sends_batch_once() {
        let registry = CommandRegistry::new();
        registry.register(schema("a"), echo_handler());
        registry.register(schema("b"), echo_handler());

        let gateway = FakeGateway::default();
        registry.publish(&gateway).unwrap();
        registry.publish(&gateway).unwrap();

        assert_eq!(gateway.published.lock().unwrap().len(), 2);
    }

    #[test]
    fn reconcile_deletes_unknown_remote_commands() {
        let registry = CommandRegistry::new();
        registry.register(schema("keep"), echo_handler());

        let gateway = FakeGateway::default();
        gateway.remote.lock().unwrap().extend([
            PublishedCommand {
                id: "1".into(),
                name: "keep".into(),
            },
            PublishedCommand {
                id: "2".into(),
                name: "stale".into(),
            },
        ]);

        let deleted = registry.reconcile(&gateway).unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(*gateway.deleted.lock().unwrap(), vec!["2".to_string()]);
    }
}
