//! Bridge executor: the sole egress point into the web surface.
//!
//! Every response and event leaves the native side through here. Calls are
//! marshaled over a channel onto a dedicated injection pump thread that owns
//! the [`WebSurface`], because script injection is only defined on the one
//! thread the host environment designates for it. Completions may therefore
//! be posted from any thread (dispatch thread, storage worker, host
//! callbacks) without further coordination.

use std::sync::mpsc;
use std::thread;

use thiserror::Error;

use super::protocol;

/// Failure reported by the rendering surface when a script cannot be run.
///
/// By the time injection fails the surface state is no longer trustworthy,
/// so this is terminal for the bridge session; it is never retried.
#[derive(Debug, Error)]
#[error("script injection failed: {0}")]
pub struct SurfaceError(pub String);

/// The rendering surface boundary: executes injected script in the web
/// content. Implementations are moved onto the injection pump thread and
/// are only ever called from there.
pub trait WebSurface: Send {
    fn run_script(&mut self, script: &str) -> Result<(), SurfaceError>;
}

#[derive(Debug)]
enum ScriptCall {
    Success { id: String, payload: String },
    Error { id: String, message: String },
    Event { name: String, payload: String },
}

/// Cheap cloneable handle used by the router and every sub-dispatcher to
/// deliver terminal responses and native events.
///
/// # Panics
///
/// All methods panic if the injection pump has already died from an
/// injection fault: the surface is gone and there is nothing left to answer
/// into. This mirrors the fatal, non-retried semantics of injection
/// failures.
#[derive(Debug, Clone)]
pub struct BridgeExecutor {
    namespace: String,
    tx: mpsc::Sender<ScriptCall>,
}

impl BridgeExecutor {
    /// Spawn the injection pump for `surface` and return the executor
    /// handle plus the pump join handle.
    pub(crate) fn spawn(
        namespace: String,
        mut surface: Box<dyn WebSurface>,
    ) -> (Self, thread::JoinHandle<()>) {
        let (tx, rx) = mpsc::channel::<ScriptCall>();
        let pump_namespace = namespace.clone();
        let pump = thread::spawn(move || {
            while let Ok(call) = rx.recv() {
                let script = match &call {
                    ScriptCall::Success { id, payload } => {
                        protocol::success_script(&pump_namespace, id, payload)
                    }
                    ScriptCall::Error { id, message } => {
                        protocol::error_script(&pump_namespace, id, message)
                    }
                    ScriptCall::Event { name, payload } => {
                        protocol::event_script(&pump_namespace, name, payload)
                    }
                };
                if let Err(err) = surface.run_script(&script) {
                    tracing::error!(
                        event = "bridge.executor.injection_fault",
                        error = %err,
                        "script injection failed; surface state untrusted, stopping pump"
                    );
                    panic!("{err}");
                }
            }
        });
        (Self { namespace, tx }, pump)
    }

    /// Resolve the web-side callback registered under `id` with
    /// `payload`.
    pub fn post_value(&self, id: &str, payload: &str) {
        tracing::debug!(
            event = "bridge.executor.post_value",
            callback_id = id,
            payload_bytes = payload.len(),
        );
        self.send(ScriptCall::Success {
            id: id.to_string(),
            payload: payload.to_string(),
        });
    }

    /// Reject the web-side callback registered under `id` with `message`.
    pub fn post_error(&self, id: &str, message: &str) {
        tracing::debug!(
            event = "bridge.executor.post_error",
            callback_id = id,
            message,
        );
        self.send(ScriptCall::Error {
            id: id.to_string(),
            message: message.to_string(),
        });
    }

    /// Fire a named, non-correlated event listener in the web content.
    /// Best-effort: nothing reports whether the listener ran.
    pub fn dispatch_event(&self, event: &str, payload: &str) {
        tracing::debug!(
            event = "bridge.executor.dispatch_event",
            event_name = event,
            payload_bytes = payload.len(),
        );
        self.send(ScriptCall::Event {
            name: event.to_string(),
            payload: payload.to_string(),
        });
    }

    /// The web-side namespace object this executor calls into.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn send(&self, call: ScriptCall) {
        if self.tx.send(call).is_err() {
            panic!("injection pump is gone; the web surface was torn down by an injection fault");
        }
    }
}

/// One-shot completion token for a single correlated request.
///
/// A handler that accepts an operation receives exactly one `Responder` and
/// must consume it with [`Responder::succeed`] or [`Responder::fail`]. Both
/// take `self` by value, so delivering a second terminal response for the
/// same token is unrepresentable. Dropping a responder without consuming it
/// leaves the web-side callback unresolved, which the protocol accepts.
#[derive(Debug)]
pub struct Responder {
    id: String,
    executor: BridgeExecutor,
}

impl Responder {
    pub(crate) fn new(executor: BridgeExecutor, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            executor,
        }
    }

    /// The correlation id this responder answers.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Deliver the single success response.
    pub fn succeed(self, payload: &str) {
        self.executor.post_value(&self.id, payload);
    }

    /// Deliver the single error response.
    pub fn fail(self, message: &str) {
        self.executor.post_error(&self.id, message);
    }
}
