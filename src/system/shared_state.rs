//! State shared between the processing worker and its callers.
//!
//! The worker is the only writer. Readers get the latest snapshot as an
//! `Arc`, so holding one never blocks the worker.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::context::SessionStatus;
use super::messages::CloudSnapshot;

pub struct SharedState {
    /// Latest published cloud snapshot.
    snapshot: RwLock<Arc<CloudSnapshot>>,

    status: RwLock<SessionStatus>,

    frames_submitted: AtomicU64,

    /// Request the worker to stop without finalizing.
    shutdown_requested: AtomicBool,
}

impl SharedState {
    pub fn new(initial: CloudSnapshot) -> Arc<Self> {
        Arc::new(Self {
            status: RwLock::new(initial.session),
            snapshot: RwLock::new(Arc::new(initial)),
            frames_submitted: AtomicU64::new(0),
            shutdown_requested: AtomicBool::new(false),
        })
    }

    /// Replace the snapshot; versions only move forward.
    pub fn publish(&self, snapshot: CloudSnapshot) {
        let status = snapshot.session;
        {
            let mut current = self.snapshot.write();
            if snapshot.version >= current.version {
                *current = Arc::new(snapshot);
            }
        }
        *self.status.write() = status;
    }

    pub fn snapshot(&self) -> Arc<CloudSnapshot> {
        self.snapshot.read().clone()
    }

    pub fn set_status(&self, status: SessionStatus) {
        *self.status.write() = status;
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.read()
    }

    pub fn record_submitted(&self) {
        self.frames_submitted.fetch_add(1, Ordering::SeqCst);
    }

    pub fn frames_submitted(&self) -> u64 {
        self.frames_submitted.load(Ordering::SeqCst)
    }

    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }
}
