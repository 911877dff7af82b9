//! Per-plugin script execution engine.
//!
//! Each plugin owns one sandboxed Lua state. The state is not `Send`, so it
//! lives on a dedicated worker thread that drains a task queue in submission
//! order. Host threads hand closures to the worker and either fire-and-forget
//! ([`ScriptEngine::submit`]) or block for a typed result
//! ([`ScriptEngine::call`]). Tasks for one plugin are strictly serialized;
//! different plugins run on independent workers and never block each other.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use mlua::{Lua, LuaOptions, StdLib};
use tracing::{debug, warn};

use crate::error::HostError;

type Task = Box<dyn FnOnce(&Lua) + Send + 'static>;

/// Handle to a plugin's script worker. Cheap to clone; all clones feed the
/// same queue. The worker exits when the last handle is dropped.
#[derive(Clone)]
pub struct ScriptEngine {
    label: Arc<str>,
    queue: mpsc::Sender<Task>,
}

impl ScriptEngine {
    /// Spawns a worker thread with a fresh sandboxed Lua state.
    ///
    /// Blocks until the state is ready so that a returned engine is always
    /// usable.
    pub fn spawn(label: &str) -> Result<Self, HostError> {
        let label: Arc<str> = Arc::from(label);
        let (queue, tasks) = mpsc::channel::<Task>();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(), String>>(1);

        let worker_label = Arc::clone(&label);
        thread::Builder::new()
            .name(format!("wren-script-{label}"))
            .spawn(move || {
                let lua = match sandboxed_state() {
                    Ok(lua) => {
                        let _ = ready_tx.send(Ok(()));
                        lua
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err.to_string()));
                        return;
                    }
                };

                while let Ok(task) = tasks.recv() {
                    task(&lua);
                }
                debug!(plugin = %worker_label, "script worker stopped");
            })
            .map_err(|err| HostError::Load(format!("spawning script worker: {err}")))?;

        ready_rx
            .recv()
            .map_err(|_| HostError::EngineStopped(label.to_string()))?
            .map_err(HostError::Load)?;

        Ok(Self { label, queue })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Queues a task without waiting for it. Errors raised by the task are
    /// logged on the worker and dropped.
    pub fn submit<F>(&self, task: F)
    where
        F: FnOnce(&Lua) -> mlua::Result<()> + Send + 'static,
    {
        let label = Arc::clone(&self.label);
        let boxed: Task = Box::new(move |lua| {
            if let Err(err) = task(lua) {
                warn!(plugin = %label, error = %err, "background script task failed");
            }
        });
        if self.queue.send(boxed).is_err() {
            warn!(plugin = %self.label, "script worker gone, task dropped");
        }
    }

    /// Queues a task and blocks until the worker has run it, returning its
    /// result. Tasks queued earlier (from any thread) complete first.
    pub fn call<R, F>(&self, task: F) -> Result<R, HostError>
    where
        R: Send + 'static,
        F: FnOnce(&Lua) -> mlua::Result<R> + Send + 'static,
    {
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        let boxed: Task = Box::new(move |lua| {
            let _ = reply_tx.send(task(lua).map_err(|err| err.to_string()));
        });

        self.queue
            .send(boxed)
            .map_err(|_| HostError::EngineStopped(self.label.to_string()))?;
        reply_rx
            .recv()
            .map_err(|_| HostError::EngineStopped(self.label.to_string()))?
            .map_err(|message| HostError::Script {
                plugin: self.label.to_string(),
                message,
            })
    }
}

/// Builds the sandboxed guest state: tables, strings, math and coroutines
/// only. No `io`, no `os`, no `require`, no debug introspection.
fn sandboxed_state() -> mlua::Result<Lua> {
    Lua::new_with(
        StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::COROUTINE,
        LuaOptions::default(),
    )
}
