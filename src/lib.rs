//! Message bridge between embedded mini-app web content and native host
//! capabilities.
//!
//! Web content running inside a host view cannot call native code; it can
//! only emit one-way text messages and receive injected script. This crate
//! turns that single channel into a reliable, multiplexed request/response
//! system with per-request callback correlation, typed action routing, a
//! quota-bounded secure storage dispatcher, and push-style native event
//! delivery.
//!
//! ```no_run
//! use minibridge::bridge::{
//!     BridgeConfig, BridgeHandlers, MessageBridge, NativeEventType, SurfaceError, WebSurface,
//! };
//!
//! struct Surface;
//!
//! impl WebSurface for Surface {
//!     fn run_script(&mut self, script: &str) -> Result<(), SurfaceError> {
//!         // Hand the script to the real rendering surface here.
//!         println!("inject: {script}");
//!         Ok(())
//!     }
//! }
//!
//! let mut bridge = MessageBridge::new(
//!     BridgeConfig::new("demo-app"),
//!     BridgeHandlers::default(),
//! )
//! .expect("valid config");
//! bridge.init(Box::new(Surface));
//! bridge.on_js_injection_done();
//!
//! // One inbound message from the web content:
//! bridge.post_message(r#"{"action":"getUniqueId","param":null,"id":"cb-1"}"#);
//!
//! // Native-to-web broadcast, independent of any request:
//! bridge.dispatch_native_event(NativeEventType::OnPause);
//!
//! bridge.shutdown();
//! ```

pub mod bridge;
pub mod logging;
