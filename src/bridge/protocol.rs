//! Wire protocol for the mini-app message bridge.
//!
//! Inbound traffic is one JSON envelope per message: `{"action", "param",
//! "id"}`. Outbound traffic is a script call injected into the web surface,
//! resolving (`execSuccessCallback`) or rejecting (`execErrorCallback`) the
//! callback registered under the correlation id, or firing a non-correlated
//! event (`execEventCallback`).

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Hard cap applied to inbound text before JSON parsing.
pub const MAX_MESSAGE_BYTES: usize = 1024 * 1024;

/// Default web-side namespace object the executor calls into.
pub const DEFAULT_JS_NAMESPACE: &str = "MiniBridge";

// ── Error message constants ────────────────────────────────────────────

/// Prefix for routing errors on unknown action tags.
pub const ERR_UNRECOGNIZED_ACTION: &str = "unrecognized action:";
/// Prefix for universal-bridge delivery failures.
pub const ERR_UNIVERSAL_BRIDGE: &str = "cannot relay message to host:";
/// Malformed secure-storage payload.
pub const ERR_WRONG_JSON_FORMAT: &str = "cannot parse secure storage payload";
/// Batch insert would exceed the configured quota.
pub const ERR_STORAGE_FULL: &str = "secure storage size exceeded";
/// Operation attempted before the store finished (or started) loading.
pub const ERR_STORAGE_NOT_READY: &str = "secure storage is not loaded";
/// Malformed close-alert payload.
pub const ERR_CLOSE_ALERT: &str = "cannot parse close-alert payload";
/// Malformed permission payload.
pub const ERR_PERMISSION_FORMAT: &str = "cannot parse permission payload";
/// Malformed file-download payload.
pub const ERR_FILE_DOWNLOAD_FORMAT: &str = "cannot parse file download payload";
/// Malformed contact-message payload.
pub const ERR_CHAT_FORMAT: &str = "cannot parse contact message payload";
/// Malformed analytics payload.
pub const ERR_ANALYTICS_FORMAT: &str = "cannot parse analytics payload";
/// The host wired no handler for an optional capability group.
pub const ERR_NO_IMPL: &str = "no implementation registered for this action";

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("message exceeds {max_bytes} bytes before JSON parse (got {message_bytes})")]
    MessageTooLarge {
        message_bytes: usize,
        max_bytes: usize,
    },
    #[error("invalid JSON envelope: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("envelope is missing the action tag")]
    MissingAction,
    #[error("envelope is missing a callback id")]
    MissingCallbackId,
    #[error("handler requires a param and none was supplied")]
    MissingParam,
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    action: Option<String>,
    #[serde(default)]
    param: Option<Value>,
    id: Option<String>,
}

/// A parsed inbound message. Immutable once constructed.
///
/// `param` stays opaque at this layer; only the handler selected by
/// `action` may interpret it, via [`Envelope::param_str`] or
/// [`Envelope::parse_param`].
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub action: String,
    pub param: Option<Value>,
    pub id: String,
}

impl Envelope {
    /// Parse and validate one inbound message.
    ///
    /// Fails when the text is not well-formed JSON, when `action` is
    /// missing, or when `id` is missing or blank. An absent, null, or blank
    /// `param` is not a parse error; each handler decides whether it needs
    /// one.
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        if raw.len() > MAX_MESSAGE_BYTES {
            return Err(ParseError::MessageTooLarge {
                message_bytes: raw.len(),
                max_bytes: MAX_MESSAGE_BYTES,
            });
        }
        let raw_envelope: RawEnvelope = serde_json::from_str(raw)?;
        let action = match raw_envelope.action {
            Some(action) if !action.trim().is_empty() => action,
            _ => return Err(ParseError::MissingAction),
        };
        let id = match raw_envelope.id {
            Some(id) if !id.trim().is_empty() => id,
            _ => return Err(ParseError::MissingCallbackId),
        };
        let param = match raw_envelope.param {
            Some(Value::Null) | None => None,
            other => other,
        };
        Ok(Self { action, param, id })
    }

    /// Best-effort recovery of the callback id from text that failed
    /// [`Envelope::parse`], so a parse diagnostic can still be correlated
    /// back to the requester.
    #[must_use]
    pub fn salvage_id(raw: &str) -> Option<String> {
        let value: Value = serde_json::from_str(raw).ok()?;
        match value.get("id") {
            Some(Value::String(id)) if !id.trim().is_empty() => Some(id.clone()),
            _ => None,
        }
    }

    /// The param as a plain string.
    ///
    /// A JSON string param is returned verbatim; any other JSON value is
    /// returned re-serialized. `None` when the param is absent.
    #[must_use]
    pub fn param_str(&self) -> Option<String> {
        match &self.param {
            None => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        }
    }

    /// Deserialize the param into a handler-specific shape.
    ///
    /// Accepts both a JSON value and a string containing JSON; the web side
    /// produces either depending on how the call was made.
    pub fn parse_param<T: DeserializeOwned>(&self) -> Result<T, ParseError> {
        match &self.param {
            None => Err(ParseError::MissingParam),
            Some(Value::String(s)) => Ok(serde_json::from_str(s)?),
            Some(other) => Ok(serde_json::from_value(other.clone())?),
        }
    }
}

// ── Action routing table ───────────────────────────────────────────────

/// Closed enumeration of every action tag the router understands.
///
/// Unknown tags are not a parse error; they surface at routing time as a
/// `postError` with [`ERR_UNRECOGNIZED_ACTION`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    GetUniqueId,
    SetCloseAlert,
    UniversalBridge,
    RequestPermission,
    RequestCustomPermissions,
    DownloadFile,
    SendMessageToContact,
    SendMessageToContactId,
    SendAnalytics,
    SecureStorageGetItem,
    SecureStorageSetItems,
    SecureStorageRemoveItems,
    SecureStorageClear,
    SecureStorageSize,
}

impl Action {
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "getUniqueId" => Some(Self::GetUniqueId),
            "setCloseAlert" => Some(Self::SetCloseAlert),
            "universalBridge" => Some(Self::UniversalBridge),
            "requestPermission" => Some(Self::RequestPermission),
            "requestCustomPermissions" => Some(Self::RequestCustomPermissions),
            "downloadFile" => Some(Self::DownloadFile),
            "sendMessageToContact" => Some(Self::SendMessageToContact),
            "sendMessageToContactId" => Some(Self::SendMessageToContactId),
            "sendAnalytics" => Some(Self::SendAnalytics),
            "getSecureStorageItem" => Some(Self::SecureStorageGetItem),
            "setSecureStorageItems" => Some(Self::SecureStorageSetItems),
            "removeSecureStorageItems" => Some(Self::SecureStorageRemoveItems),
            "clearSecureStorage" => Some(Self::SecureStorageClear),
            "getSecureStorageSize" => Some(Self::SecureStorageSize),
            _ => None,
        }
    }
}

// ── Outbound script serialization ──────────────────────────────────────

/// Encode `s` as a JS string literal.
///
/// `serde_json` string encoding is a subset of valid JS and escapes
/// everything needed for safe injection; application content is otherwise
/// passed through unaltered.
#[must_use]
fn js_string_literal(s: &str) -> String {
    serde_json::to_string(s).expect("string serialization is infallible")
}

/// Script that resolves the web-side callback registered under `id`.
#[must_use]
pub fn success_script(namespace: &str, id: &str, payload: &str) -> String {
    format!(
        "{namespace}.execSuccessCallback({}, {})",
        js_string_literal(id),
        js_string_literal(payload)
    )
}

/// Script that rejects the web-side callback registered under `id`.
#[must_use]
pub fn error_script(namespace: &str, id: &str, message: &str) -> String {
    format!(
        "{namespace}.execErrorCallback({}, {})",
        js_string_literal(id),
        js_string_literal(message)
    )
}

/// Script that fires a named, non-correlated event listener.
#[must_use]
pub fn event_script(namespace: &str, event: &str, payload: &str) -> String {
    format!(
        "{namespace}.execEventCallback({}, {})",
        js_string_literal(event),
        js_string_literal(payload)
    )
}
