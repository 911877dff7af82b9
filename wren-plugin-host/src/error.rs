//! Error types for the plugin host.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("plugin load error: {0}")]
    Load(String),

    #[error("plugin not found: {0}")]
    PluginNotFound(String),

    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("command not executable: {0}")]
    NotExecutable(String),

    #[error("bad invocation: {0}")]
    BadInvocation(String),

    #[error("permission denied: command '{command}' requires '{permission}'")]
    PermissionDenied { command: String, permission: String },

    #[error("script error: {plugin}: {message}")]
    Script { plugin: String, message: String },

    #[error("script worker stopped: {0}")]
    EngineStopped(String),

    #[error("plugin already enabled: {0}")]
    AlreadyEnabled(String),

    #[error("plugin already disabled: {0}")]
    AlreadyDisabled(String),

    #[error("query rewrite error: {0}")]
    Rewrite(#[from] wren_sqlscope::RewriteError),

    #[error("storage error: {0}")]
    Storage(#[from] wren_storage::StorageError),

    #[error("network error: {0}")]
    Network(String),

    #[error("gateway error: {0}")]
    Gateway(String),
}
