//! Lua plugin runtime for wren.
//!
//! Loads sandboxed Lua plugins, routes chat commands and events to them,
//! and scopes every capability — SQL, HTTP, cache, tickets, event log — to
//! the declaring plugin.
//!
//! Each plugin runs on its own worker thread with a private Lua state;
//! per-guild enablement gates both command dispatch and event delivery.

mod dispatch;
mod enablement;
mod engine;
mod error;
mod events;
mod fetch;
mod gateway;
mod loader;
mod permissions;
mod plugin;
mod registry;
mod runtime;
mod surface;
pub mod vercmp;

pub use enablement::EnablementStore;
pub use engine::ScriptEngine;
pub use error::HostError;
pub use events::{EventDispatcher, GuildInfo, HandlerEntry, HostEvent};
pub use fetch::{FetchOptions, FetchResponse, Fetcher};
pub use gateway::{
    ChannelInfo, ChatGateway, CommandSchema, EntityCache, EventLog, EventLogEntry, HostServices,
    MemberInfo, OptionKind, OptionSchema, PublishedCommand, RoleInfo, TicketDesk,
};
pub use permissions::{Permission, Permissions};
pub use plugin::{resolve, CommandSpec, Plugin};
pub use registry::{CommandHandler, CommandInvocation, CommandRegistry, Invoker, Reply};
pub use runtime::PluginRuntime;
