//! Message bridge between embedded mini-app web content and the native
//! host.
//!
//! The web content can only emit one-way text messages and receive injected
//! script. [`MessageBridge`] turns that single channel into a multiplexed
//! request/response system: inbound text is parsed into an [`Envelope`],
//! routed by action tag to a builtin or a capability sub-dispatcher, and
//! answered with exactly one terminal `postValue`/`postError` correlated by
//! the envelope id. Native-to-web broadcasts travel the parallel
//! fire-and-forget event channel and never touch the request/response
//! protocol.

use std::sync::Mutex;
use std::thread;

use serde::Deserialize;
use uuid::Uuid;

pub mod config;
pub mod executor;
pub mod handlers;
pub mod protocol;
pub mod secure_storage;
pub mod store;

pub use config::{BridgeConfig, ConfigError};
pub use executor::{BridgeExecutor, Responder, SurfaceError, WebSurface};
pub use handlers::{
    AnalyticsEvent, AnalyticsHandler, BridgeHandlers, ChatHandler, ContactMessage,
    CustomPermissionRequest, FileDownloadRequest, FileHandler, HostMessageError,
    HostMessageHandler, PermissionHandler, PermissionRequest, UniqueIdProvider,
};
pub use protocol::{Action, Envelope, ParseError};
pub use secure_storage::SecureStorageDispatcher;
pub use store::{SecureStore, StoreError};

/// Native-to-web broadcast events. Fire-and-forget: no correlation id, no
/// acknowledgement path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeEventType {
    OnPause,
    OnResume,
    ReceiveJsonInfo,
    SecureStorageReady,
}

impl NativeEventType {
    #[must_use]
    pub fn as_tag(self) -> &'static str {
        match self {
            Self::OnPause => "nativeOnPause",
            Self::OnResume => "nativeOnResume",
            Self::ReceiveJsonInfo => "nativeReceiveJsonInfo",
            Self::SecureStorageReady => "nativeSecureStorageReady",
        }
    }
}

/// Close-confirmation settings pushed by the web content via the
/// `setCloseAlert` builtin; the host reads them back when tearing the view
/// down.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CloseAlertInfo {
    #[serde(rename = "shouldDisplay", default)]
    pub should_display: bool,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CloseAlertParam {
    #[serde(rename = "closeAlertInfo")]
    close_alert_info: CloseAlertInfo,
}

#[derive(Debug)]
struct BridgeRuntime {
    executor: BridgeExecutor,
    pump: thread::JoinHandle<()>,
}

/// One bridge session: one app identity, one rendering surface, one
/// handler set.
///
/// Construction wires config and handlers; [`MessageBridge::init`] attaches
/// the rendering surface and makes the session live. Inbound messages
/// arrive through [`MessageBridge::post_message`] on the surface's
/// serialized callback thread; that call never blocks on handler I/O.
pub struct MessageBridge {
    config: BridgeConfig,
    session_id: String,
    handlers: BridgeHandlers,
    secure_storage: SecureStorageDispatcher,
    close_alert: Mutex<Option<CloseAlertInfo>>,
    runtime: Option<BridgeRuntime>,
}

impl MessageBridge {
    /// Wire a new, not-yet-attached bridge session.
    pub fn new(config: BridgeConfig, handlers: BridgeHandlers) -> Result<Self, ConfigError> {
        config.validate()?;
        let secure_storage = SecureStorageDispatcher::new(
            config.app_id.clone(),
            config.storage_dir.clone(),
            config.max_storage_bytes,
        );
        Ok(Self {
            config,
            session_id: Uuid::new_v4().to_string(),
            handlers,
            secure_storage,
            close_alert: Mutex::new(None),
            runtime: None,
        })
    }

    /// Attach the rendering surface and start the injection pump.
    ///
    /// # Panics
    ///
    /// Panics if the bridge is already attached; re-wiring a live session
    /// is a programmer error, not a runtime condition.
    pub fn init(&mut self, surface: Box<dyn WebSurface>) {
        assert!(
            self.runtime.is_none(),
            "MessageBridge::init called twice for one session"
        );
        let (executor, pump) =
            BridgeExecutor::spawn(self.config.js_namespace.clone(), surface);
        tracing::info!(
            event = "bridge.session.attached",
            session_id = %self.session_id,
            app_id = %self.config.app_id,
        );
        self.runtime = Some(BridgeRuntime { executor, pump });
    }

    /// The web side finished evaluating the bridge bootstrap script;
    /// capability groups that need a loaded backing store can start now.
    pub fn on_js_injection_done(&self) {
        self.secure_storage.on_load(self.executor().clone());
    }

    /// Entry point for every inbound message from the web content.
    ///
    /// Never blocks on handler I/O and never lets a recoverable error
    /// escape: malformed input becomes a `postError` when a callback id can
    /// be recovered, and is logged and dropped otherwise.
    ///
    /// # Panics
    ///
    /// Panics if called before [`MessageBridge::init`] — an uninitialized
    /// bridge has no surface to answer into.
    pub fn post_message(&self, raw: &str) {
        let executor = self.executor();
        let envelope = match Envelope::parse(raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                match Envelope::salvage_id(raw) {
                    Some(id) => executor.post_error(&id, &err.to_string()),
                    None => tracing::warn!(
                        event = "bridge.dispatch.unparseable",
                        session_id = %self.session_id,
                        error = %err,
                        "dropping message with no recoverable callback id"
                    ),
                }
                return;
            }
        };

        tracing::debug!(
            event = "bridge.dispatch.received",
            session_id = %self.session_id,
            action = %envelope.action,
            callback_id = %envelope.id,
        );
        self.route(&envelope);
    }

    /// Broadcast a native event with an empty payload.
    pub fn dispatch_native_event(&self, event: NativeEventType) {
        self.dispatch_native_event_with_payload(event, "");
    }

    /// Broadcast a native event carrying `payload`.
    pub fn dispatch_native_event_with_payload(&self, event: NativeEventType, payload: &str) {
        self.executor().dispatch_event(event.as_tag(), payload);
    }

    /// Push arbitrary JSON from the host into the web content
    /// (the native-to-web half of the universal bridge).
    pub fn send_json_to_web(&self, json: &str) {
        self.dispatch_native_event_with_payload(NativeEventType::ReceiveJsonInfo, json);
    }

    /// The close-alert settings last pushed by the web content, if any.
    pub fn close_alert(&self) -> Option<CloseAlertInfo> {
        self.close_alert
            .lock()
            .expect("close alert mutex poisoned")
            .clone()
    }

    /// End the session: tear down the storage worker, then drain and join
    /// the injection pump. After this, the backing store is released.
    pub fn shutdown(mut self) {
        self.secure_storage.shutdown();
        if let Some(BridgeRuntime { executor, pump }) = self.runtime.take() {
            drop(executor);
            if pump.join().is_err() {
                tracing::error!(
                    event = "bridge.session.pump_fault",
                    session_id = %self.session_id,
                    "injection pump terminated by an injection fault"
                );
            }
        }
        tracing::info!(
            event = "bridge.session.closed",
            session_id = %self.session_id,
        );
    }

    fn executor(&self) -> &BridgeExecutor {
        match &self.runtime {
            Some(runtime) => &runtime.executor,
            None => panic!("bridge executor is not initialized; call MessageBridge::init first"),
        }
    }

    fn route(&self, envelope: &Envelope) {
        let responder = Responder::new(self.executor().clone(), envelope.id.as_str());
        let Some(action) = Action::from_tag(&envelope.action) else {
            responder.fail(&format!(
                "{} {}",
                protocol::ERR_UNRECOGNIZED_ACTION,
                envelope.action
            ));
            return;
        };

        match action {
            Action::GetUniqueId => {
                let unique_id = match &self.handlers.unique_id {
                    Some(provider) => provider.unique_id(),
                    None => self.session_id.clone(),
                };
                responder.succeed(&unique_id);
            }
            Action::SetCloseAlert => match envelope.parse_param::<CloseAlertParam>() {
                Ok(param) => {
                    *self
                        .close_alert
                        .lock()
                        .expect("close alert mutex poisoned") = Some(param.close_alert_info);
                    responder.succeed("true");
                }
                Err(_) => responder.fail(protocol::ERR_CLOSE_ALERT),
            },
            Action::UniversalBridge => handlers::route_universal_bridge(
                envelope,
                self.handlers.host_message.as_ref(),
                responder,
            ),
            Action::RequestPermission => handlers::route_device_permission(
                envelope,
                self.handlers.permissions.as_ref(),
                responder,
            ),
            Action::RequestCustomPermissions => handlers::route_custom_permissions(
                envelope,
                self.handlers.permissions.as_ref(),
                responder,
            ),
            Action::DownloadFile => {
                handlers::route_download_file(envelope, self.handlers.file.as_ref(), responder);
            }
            Action::SendMessageToContact => handlers::route_contact_message(
                envelope,
                self.handlers.chat.as_ref(),
                false,
                responder,
            ),
            Action::SendMessageToContactId => handlers::route_contact_message(
                envelope,
                self.handlers.chat.as_ref(),
                true,
                responder,
            ),
            Action::SendAnalytics => {
                handlers::route_analytics(envelope, self.handlers.analytics.as_ref(), responder);
            }
            Action::SecureStorageGetItem => self.secure_storage.on_get_item(envelope, responder),
            Action::SecureStorageSetItems => self.secure_storage.on_set_items(envelope, responder),
            Action::SecureStorageRemoveItems => {
                self.secure_storage.on_remove_items(envelope, responder);
            }
            Action::SecureStorageClear => self.secure_storage.on_clear_all(responder),
            Action::SecureStorageSize => self.secure_storage.on_size(responder),
        }
    }
}
