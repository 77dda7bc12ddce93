//! Capability handler boundaries.
//!
//! The business logic behind each capability group (permission prompts,
//! file chooser UI, chat UI, analytics transport, generic host messages)
//! lives in the host application. The bridge owns only the seam: typed
//! request payloads parsed out of the envelope, a trait per capability
//! group, and the routing shims that reject malformed params before the
//! host ever sees them.
//!
//! A handler that accepts an operation receives a [`Responder`] and may
//! complete it synchronously, later from another thread, or never —
//! dropping the responder leaves the web-side callback unresolved, which
//! the protocol accepts.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use super::executor::Responder;
use super::protocol::{
    Envelope, ERR_ANALYTICS_FORMAT, ERR_CHAT_FORMAT, ERR_FILE_DOWNLOAD_FORMAT, ERR_NO_IMPL,
    ERR_PERMISSION_FORMAT, ERR_UNIVERSAL_BRIDGE,
};

/// Failure raised by the host while consuming a universal-bridge message.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HostMessageError(pub String);

/// Generic host passthrough: receives opaque JSON the web content sent via
/// the `universalBridge` action. Runs synchronously on the dispatch thread;
/// the host must not block here.
pub trait HostMessageHandler: Send + Sync {
    fn on_send_to_host(&self, json: &str) -> Result<(), HostMessageError>;
}

/// Host-scoped unique id returned by the `getUniqueId` builtin.
pub trait UniqueIdProvider: Send + Sync {
    fn unique_id(&self) -> String;
}

#[derive(Debug, Clone, Deserialize)]
pub struct PermissionRequest {
    pub permission: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CustomPermissionRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
struct CustomPermissionsParam {
    permissions: Vec<CustomPermissionRequest>,
}

pub trait PermissionHandler: Send + Sync {
    fn request_device_permission(&self, request: PermissionRequest, responder: Responder);
    fn request_custom_permissions(
        &self,
        requests: Vec<CustomPermissionRequest>,
        responder: Responder,
    );
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileDownloadRequest {
    pub filename: String,
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

pub trait FileHandler: Send + Sync {
    fn download_file(&self, request: FileDownloadRequest, responder: Responder);
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContactMessage {
    pub text: String,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContactMessageParam {
    #[serde(rename = "messageToContact")]
    message_to_contact: ContactMessage,
    #[serde(rename = "contactId", default)]
    contact_id: Option<String>,
}

pub trait ChatHandler: Send + Sync {
    /// Let the user pick a contact, then deliver `message` to it.
    fn send_message_to_contact(&self, message: ContactMessage, responder: Responder);
    /// Deliver `message` to a specific, already-known contact.
    fn send_message_to_contact_id(
        &self,
        contact_id: String,
        message: ContactMessage,
        responder: Responder,
    );
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsEvent {
    #[serde(rename = "eventType")]
    pub event_type: String,
    #[serde(default)]
    pub data: Option<Value>,
}

pub trait AnalyticsHandler: Send + Sync {
    fn send_analytics(&self, event: AnalyticsEvent, responder: Responder);
}

/// The full handler set wired into one bridge session.
///
/// Every field defaults to a no-implementation handler that answers
/// [`ERR_NO_IMPL`], so hosts only wire the capability groups their web
/// content actually uses.
#[derive(Clone)]
pub struct BridgeHandlers {
    pub host_message: Arc<dyn HostMessageHandler>,
    pub permissions: Arc<dyn PermissionHandler>,
    pub file: Arc<dyn FileHandler>,
    pub chat: Arc<dyn ChatHandler>,
    pub analytics: Arc<dyn AnalyticsHandler>,
    /// Overrides the builtin per-session unique id when set.
    pub unique_id: Option<Arc<dyn UniqueIdProvider>>,
}

impl Default for BridgeHandlers {
    fn default() -> Self {
        let noop = Arc::new(NoImpl);
        Self {
            host_message: noop.clone(),
            permissions: noop.clone(),
            file: noop.clone(),
            chat: noop.clone(),
            analytics: noop,
            unique_id: None,
        }
    }
}

impl std::fmt::Debug for BridgeHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeHandlers")
            .field("unique_id_override", &self.unique_id.is_some())
            .finish_non_exhaustive()
    }
}

/// Default for every capability group the host did not wire.
struct NoImpl;

impl HostMessageHandler for NoImpl {
    fn on_send_to_host(&self, _json: &str) -> Result<(), HostMessageError> {
        Err(HostMessageError(ERR_NO_IMPL.to_string()))
    }
}

impl PermissionHandler for NoImpl {
    fn request_device_permission(&self, _request: PermissionRequest, responder: Responder) {
        responder.fail(ERR_NO_IMPL);
    }

    fn request_custom_permissions(
        &self,
        _requests: Vec<CustomPermissionRequest>,
        responder: Responder,
    ) {
        responder.fail(ERR_NO_IMPL);
    }
}

impl FileHandler for NoImpl {
    fn download_file(&self, _request: FileDownloadRequest, responder: Responder) {
        responder.fail(ERR_NO_IMPL);
    }
}

impl ChatHandler for NoImpl {
    fn send_message_to_contact(&self, _message: ContactMessage, responder: Responder) {
        responder.fail(ERR_NO_IMPL);
    }

    fn send_message_to_contact_id(
        &self,
        _contact_id: String,
        _message: ContactMessage,
        responder: Responder,
    ) {
        responder.fail(ERR_NO_IMPL);
    }
}

impl AnalyticsHandler for NoImpl {
    fn send_analytics(&self, _event: AnalyticsEvent, responder: Responder) {
        responder.fail(ERR_NO_IMPL);
    }
}

// ── Routing shims ──────────────────────────────────────────────────────

/// Universal bridge: the single required-field check is `param` being
/// present and non-blank; the payload is otherwise opaque here. On host
/// success the param is round-tripped back as the response value.
pub(crate) fn route_universal_bridge(
    envelope: &Envelope,
    handler: &dyn HostMessageHandler,
    responder: Responder,
) {
    let json = match envelope.param_str() {
        Some(json) if !json.trim().is_empty() => json,
        _ => {
            responder.fail(&format!("{ERR_UNIVERSAL_BRIDGE} null or blank"));
            return;
        }
    };
    match handler.on_send_to_host(&json) {
        Ok(()) => responder.succeed(&json),
        Err(err) => responder.fail(&err.to_string()),
    }
}

pub(crate) fn route_device_permission(
    envelope: &Envelope,
    handler: &dyn PermissionHandler,
    responder: Responder,
) {
    match envelope.parse_param::<PermissionRequest>() {
        Ok(request) => handler.request_device_permission(request, responder),
        Err(_) => responder.fail(ERR_PERMISSION_FORMAT),
    }
}

pub(crate) fn route_custom_permissions(
    envelope: &Envelope,
    handler: &dyn PermissionHandler,
    responder: Responder,
) {
    match envelope.parse_param::<CustomPermissionsParam>() {
        Ok(param) => handler.request_custom_permissions(param.permissions, responder),
        Err(_) => responder.fail(ERR_PERMISSION_FORMAT),
    }
}

pub(crate) fn route_download_file(
    envelope: &Envelope,
    handler: &dyn FileHandler,
    responder: Responder,
) {
    match envelope.parse_param::<FileDownloadRequest>() {
        Ok(request) => handler.download_file(request, responder),
        Err(_) => responder.fail(ERR_FILE_DOWNLOAD_FORMAT),
    }
}

pub(crate) fn route_contact_message(
    envelope: &Envelope,
    handler: &dyn ChatHandler,
    targeted: bool,
    responder: Responder,
) {
    let param = match envelope.parse_param::<ContactMessageParam>() {
        Ok(param) => param,
        Err(_) => {
            responder.fail(ERR_CHAT_FORMAT);
            return;
        }
    };
    if targeted {
        match param.contact_id {
            Some(contact_id) => {
                handler.send_message_to_contact_id(contact_id, param.message_to_contact, responder);
            }
            None => responder.fail(ERR_CHAT_FORMAT),
        }
    } else {
        handler.send_message_to_contact(param.message_to_contact, responder);
    }
}

pub(crate) fn route_analytics(
    envelope: &Envelope,
    handler: &dyn AnalyticsHandler,
    responder: Responder,
) {
    match envelope.parse_param::<AnalyticsEvent>() {
        Ok(event) => handler.send_analytics(event, responder),
        Err(_) => responder.fail(ERR_ANALYTICS_FORMAT),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::thread;

    use super::*;
    use crate::bridge::executor::{BridgeExecutor, SurfaceError, WebSurface};
    use crate::bridge::protocol::DEFAULT_JS_NAMESPACE;

    #[derive(Clone, Default)]
    struct RecordingSurface {
        scripts: Arc<Mutex<Vec<String>>>,
    }

    impl WebSurface for RecordingSurface {
        fn run_script(&mut self, script: &str) -> Result<(), SurfaceError> {
            self.scripts
                .lock()
                .expect("recording surface mutex poisoned")
                .push(script.to_string());
            Ok(())
        }
    }

    fn executor_with_scripts() -> (
        BridgeExecutor,
        thread::JoinHandle<()>,
        Arc<Mutex<Vec<String>>>,
    ) {
        let surface = RecordingSurface::default();
        let scripts = surface.scripts.clone();
        let (executor, pump) =
            BridgeExecutor::spawn(DEFAULT_JS_NAMESPACE.to_string(), Box::new(surface));
        (executor, pump, scripts)
    }

    fn drain(
        executor: BridgeExecutor,
        pump: thread::JoinHandle<()>,
        scripts: &Arc<Mutex<Vec<String>>>,
    ) -> Vec<String> {
        drop(executor);
        pump.join().expect("pump must exit cleanly");
        scripts
            .lock()
            .expect("recording surface mutex poisoned")
            .clone()
    }

    struct EchoHost {
        received: Arc<Mutex<Vec<String>>>,
    }

    impl HostMessageHandler for EchoHost {
        fn on_send_to_host(&self, json: &str) -> Result<(), HostMessageError> {
            self.received
                .lock()
                .expect("echo host mutex poisoned")
                .push(json.to_string());
            Ok(())
        }
    }

    struct FailingHost;

    impl HostMessageHandler for FailingHost {
        fn on_send_to_host(&self, _json: &str) -> Result<(), HostMessageError> {
            Err(HostMessageError("host exploded".to_string()))
        }
    }

    fn envelope(raw: &str) -> Envelope {
        Envelope::parse(raw).expect("test envelope must parse")
    }

    #[test]
    fn test_universal_bridge_roundtrips_param_on_success() {
        let (executor, pump, scripts) = executor_with_scripts();
        let received = Arc::new(Mutex::new(Vec::new()));
        let host = EchoHost {
            received: received.clone(),
        };

        let env = envelope(
            r#"{"action":"universalBridge","param":"{\"content\":\"test\"}","id":"cb-1"}"#,
        );
        route_universal_bridge(&env, &host, Responder::new(executor.clone(), "cb-1"));

        let scripts = drain(executor, pump, &scripts);
        assert_eq!(
            received.lock().expect("echo host mutex poisoned").as_slice(),
            [r#"{"content":"test"}"#.to_string()],
            "the host must see the param unchanged"
        );
        assert_eq!(scripts.len(), 1, "exactly one terminal response");
        assert_eq!(
            scripts[0],
            r#"MiniBridge.execSuccessCallback("cb-1", "{\"content\":\"test\"}")"#,
            "the response must round-trip the param"
        );
    }

    #[test]
    fn test_universal_bridge_rejects_null_and_blank_params() {
        for raw in [
            r#"{"action":"universalBridge","param":null,"id":"cb-2"}"#,
            r#"{"action":"universalBridge","param":"","id":"cb-2"}"#,
            r#"{"action":"universalBridge","param":"   ","id":"cb-2"}"#,
            r#"{"action":"universalBridge","id":"cb-2"}"#,
        ] {
            let (executor, pump, scripts) = executor_with_scripts();
            let env = envelope(raw);
            route_universal_bridge(&env, &NoImpl, Responder::new(executor.clone(), "cb-2"));

            let scripts = drain(executor, pump, &scripts);
            assert_eq!(scripts.len(), 1, "exactly one terminal response for {raw}");
            assert!(
                scripts[0].contains("execErrorCallback") && scripts[0].contains("null or blank"),
                "blank param must reject, never resolve: {raw} -> {scripts:?}"
            );
        }
    }

    #[test]
    fn test_universal_bridge_surfaces_host_failure_message() {
        let (executor, pump, scripts) = executor_with_scripts();
        let env = envelope(r#"{"action":"universalBridge","param":"{}","id":"cb-3"}"#);
        route_universal_bridge(&env, &FailingHost, Responder::new(executor.clone(), "cb-3"));

        let scripts = drain(executor, pump, &scripts);
        assert_eq!(scripts.len(), 1);
        assert!(
            scripts[0].contains("execErrorCallback") && scripts[0].contains("host exploded"),
            "got {scripts:?}"
        );
    }

    #[test]
    fn test_permission_route_rejects_malformed_param() {
        let (executor, pump, scripts) = executor_with_scripts();
        let env = envelope(r#"{"action":"requestPermission","param":{"perm":1},"id":"cb-4"}"#);
        route_device_permission(&env, &NoImpl, Responder::new(executor.clone(), "cb-4"));

        let scripts = drain(executor, pump, &scripts);
        assert!(
            scripts[0].contains(ERR_PERMISSION_FORMAT),
            "got {scripts:?}"
        );
    }

    #[test]
    fn test_contact_id_route_requires_contact_id() {
        let (executor, pump, scripts) = executor_with_scripts();
        let env = envelope(
            r#"{"action":"sendMessageToContactId","param":{"messageToContact":{"text":"hi"}},"id":"cb-5"}"#,
        );
        route_contact_message(&env, &NoImpl, true, Responder::new(executor.clone(), "cb-5"));

        let scripts = drain(executor, pump, &scripts);
        assert!(scripts[0].contains(ERR_CHAT_FORMAT), "got {scripts:?}");
    }

    #[test]
    fn test_analytics_route_parses_event_type() {
        struct Capture(Arc<Mutex<Option<AnalyticsEvent>>>);
        impl AnalyticsHandler for Capture {
            fn send_analytics(&self, event: AnalyticsEvent, responder: Responder) {
                *self.0.lock().expect("capture mutex poisoned") = Some(event);
                responder.succeed("true");
            }
        }

        let (executor, pump, scripts) = executor_with_scripts();
        let captured = Arc::new(Mutex::new(None));
        let handler = Capture(captured.clone());
        let env = envelope(
            r#"{"action":"sendAnalytics","param":{"eventType":"pageview","data":{"path":"/"}},"id":"cb-6"}"#,
        );
        route_analytics(&env, &handler, Responder::new(executor.clone(), "cb-6"));

        let scripts = drain(executor, pump, &scripts);
        let captured = captured.lock().expect("capture mutex poisoned");
        let event = captured.as_ref().expect("handler must receive the event");
        assert_eq!(event.event_type, "pageview");
        assert!(scripts[0].contains("execSuccessCallback"));
    }
}
