//! Secure-storage sub-dispatcher.
//!
//! The most stateful handler group: a per-session state machine that opens
//! a quota-bounded [`SecureStore`] for one app identity and executes
//! operations on a dedicated worker thread. The worker's job channel is the
//! serialization point — mutations and quota accounting never interleave.
//!
//! Parsing happens on the dispatch thread so a malformed payload is
//! rejected immediately (`ERR_WRONG_JSON_FORMAT`) without touching the
//! store. Jobs submitted while the store is still loading are queued in
//! channel order and run once the load completes. Jobs submitted before
//! `on_load` are rejected with `ERR_STORAGE_NOT_READY`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{mpsc, Mutex};
use std::thread;

use serde::Deserialize;

use super::executor::{BridgeExecutor, Responder};
use super::protocol::{
    Envelope, ERR_STORAGE_FULL, ERR_STORAGE_NOT_READY, ERR_WRONG_JSON_FORMAT,
};
use super::store::{SecureStore, StoreError};
use super::NativeEventType;

/// Acknowledgement payload for set/remove/clear.
const ACK: &str = "true";
/// Not-found result for get; a valid outcome, not an error.
const NOT_FOUND: &str = "null";

#[derive(Debug, Deserialize)]
struct GetItemParam {
    #[serde(rename = "secureStorageKey")]
    secure_storage_key: String,
}

#[derive(Debug, Deserialize)]
struct SetItemsParam {
    #[serde(rename = "secureStorageItems")]
    secure_storage_items: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct RemoveItemsParam {
    #[serde(rename = "secureStorageKeyList")]
    secure_storage_key_list: Vec<String>,
}

#[derive(Debug)]
enum StoreJob {
    Get { key: String, responder: Responder },
    Set {
        items: HashMap<String, String>,
        responder: Responder,
    },
    Remove {
        keys: Vec<String>,
        responder: Responder,
    },
    Clear { responder: Responder },
    Size { responder: Responder },
}

impl StoreJob {
    fn into_responder(self) -> Responder {
        match self {
            Self::Get { responder, .. }
            | Self::Set { responder, .. }
            | Self::Remove { responder, .. }
            | Self::Clear { responder }
            | Self::Size { responder } => responder,
        }
    }
}

#[derive(Debug)]
enum DispatcherState {
    Unloaded,
    Running {
        jobs: mpsc::Sender<StoreJob>,
        worker: Option<thread::JoinHandle<()>>,
    },
}

#[derive(Debug)]
pub struct SecureStorageDispatcher {
    app_id: String,
    storage_dir: PathBuf,
    max_bytes: u64,
    state: Mutex<DispatcherState>,
}

impl SecureStorageDispatcher {
    #[must_use]
    pub fn new(app_id: String, storage_dir: PathBuf, max_bytes: u64) -> Self {
        Self {
            app_id,
            storage_dir,
            max_bytes,
            state: Mutex::new(DispatcherState::Unloaded),
        }
    }

    /// Open the backing store for this app identity and start accepting
    /// operations. Emits the `SecureStorageReady` native event once the
    /// store is loaded. Idempotent: a second call is ignored.
    pub fn on_load(&self, executor: BridgeExecutor) {
        let mut state = self.state.lock().expect("secure storage state mutex poisoned");
        if let DispatcherState::Running { .. } = *state {
            tracing::warn!(
                event = "bridge.secure_storage.duplicate_load",
                app_id = %self.app_id,
                "on_load called twice; keeping the existing worker"
            );
            return;
        }

        let (tx, rx) = mpsc::channel::<StoreJob>();
        let app_id = self.app_id.clone();
        let storage_dir = self.storage_dir.clone();
        let max_bytes = self.max_bytes;
        let worker = thread::spawn(move || {
            run_worker(&app_id, &storage_dir, max_bytes, &executor, &rx);
        });
        *state = DispatcherState::Running {
            jobs: tx,
            worker: Some(worker),
        };
    }

    pub fn on_get_item(&self, envelope: &Envelope, responder: Responder) {
        match envelope.parse_param::<GetItemParam>() {
            Ok(param) => self.submit(StoreJob::Get {
                key: param.secure_storage_key,
                responder,
            }),
            Err(_) => responder.fail(ERR_WRONG_JSON_FORMAT),
        }
    }

    pub fn on_set_items(&self, envelope: &Envelope, responder: Responder) {
        match envelope.parse_param::<SetItemsParam>() {
            Ok(param) => self.submit(StoreJob::Set {
                items: param.secure_storage_items,
                responder,
            }),
            Err(_) => responder.fail(ERR_WRONG_JSON_FORMAT),
        }
    }

    pub fn on_remove_items(&self, envelope: &Envelope, responder: Responder) {
        match envelope.parse_param::<RemoveItemsParam>() {
            Ok(param) => self.submit(StoreJob::Remove {
                keys: param.secure_storage_key_list,
                responder,
            }),
            Err(_) => responder.fail(ERR_WRONG_JSON_FORMAT),
        }
    }

    pub fn on_clear_all(&self, responder: Responder) {
        self.submit(StoreJob::Clear { responder });
    }

    pub fn on_size(&self, responder: Responder) {
        self.submit(StoreJob::Size { responder });
    }

    /// Close the job channel and wait for the worker to drain. Called when
    /// the owning bridge session ends.
    pub fn shutdown(&self) {
        let mut state = self.state.lock().expect("secure storage state mutex poisoned");
        if let DispatcherState::Running { worker, .. } = &mut *state {
            let worker = worker.take();
            *state = DispatcherState::Unloaded;
            drop(state);
            if let Some(worker) = worker {
                if worker.join().is_err() {
                    tracing::error!(
                        event = "bridge.secure_storage.worker_panicked",
                        app_id = %self.app_id,
                    );
                }
            }
        }
    }

    fn submit(&self, job: StoreJob) {
        let state = self.state.lock().expect("secure storage state mutex poisoned");
        match &*state {
            DispatcherState::Unloaded => {
                drop(state);
                tracing::debug!(
                    event = "bridge.secure_storage.rejected_not_ready",
                    app_id = %self.app_id,
                );
                job.into_responder().fail(ERR_STORAGE_NOT_READY);
            }
            DispatcherState::Running { jobs, .. } => {
                if let Err(mpsc::SendError(job)) = jobs.send(job) {
                    // Worker already exited (load failed and drained out).
                    drop(state);
                    job.into_responder().fail(ERR_STORAGE_NOT_READY);
                }
            }
        }
    }
}

fn run_worker(
    app_id: &str,
    storage_dir: &std::path::Path,
    max_bytes: u64,
    executor: &BridgeExecutor,
    jobs: &mpsc::Receiver<StoreJob>,
) {
    let mut store = match SecureStore::open(storage_dir, app_id, max_bytes) {
        Ok(store) => {
            tracing::info!(
                event = "bridge.secure_storage.loaded",
                app_id,
                used_bytes = store.used_bytes(),
                max_bytes,
                items = store.len(),
            );
            executor.dispatch_event(NativeEventType::SecureStorageReady.as_tag(), "");
            store
        }
        Err(err) => {
            tracing::error!(
                event = "bridge.secure_storage.load_failed",
                app_id,
                error = %err,
            );
            // Every queued and future job fails with the underlying cause.
            let cause = err.to_string();
            while let Ok(job) = jobs.recv() {
                job.into_responder()
                    .fail(&format!("{ERR_STORAGE_NOT_READY} ({cause})"));
            }
            return;
        }
    };

    while let Ok(job) = jobs.recv() {
        run_job(&mut store, job);
    }
}

fn run_job(store: &mut SecureStore, job: StoreJob) {
    match job {
        StoreJob::Get { key, responder } => match store.get(&key) {
            Some(value) => responder.succeed(value),
            None => responder.succeed(NOT_FOUND),
        },
        StoreJob::Set { items, responder } => {
            let batch_items = items.len();
            match store.insert_items(items) {
                Ok(()) => {
                    tracing::debug!(
                        event = "bridge.secure_storage.inserted",
                        items = batch_items,
                        used_bytes = store.used_bytes(),
                    );
                    responder.succeed(ACK);
                }
                Err(StoreError::QuotaExceeded {
                    would_use_bytes,
                    max_bytes,
                }) => {
                    tracing::warn!(
                        event = "bridge.secure_storage.quota_exceeded",
                        would_use_bytes,
                        max_bytes,
                    );
                    responder.fail(ERR_STORAGE_FULL);
                }
                Err(err) => responder.fail(&err.to_string()),
            }
        }
        StoreJob::Remove { keys, responder } => match store.remove_items(&keys) {
            Ok(()) => responder.succeed(ACK),
            Err(err) => responder.fail(&err.to_string()),
        },
        StoreJob::Clear { responder } => {
            store.clear();
            responder.succeed(ACK);
        }
        StoreJob::Size { responder } => {
            let size = serde_json::json!({
                "size": store.used_bytes(),
                "maxSize": store.max_bytes(),
            });
            responder.succeed(&size.to_string());
        }
    }
}
