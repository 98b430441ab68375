//! Carrier-facing surface: webhook event dispatch (C10) and the media
//! WebSocket transport (C9). Both operate on the same session registry.

pub mod media_ws;
pub mod webhook;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::session::Session;

/// Process-wide map of active calls, keyed by carrier call-control-id.
/// Single-writer per session (its own orchestrator task); the webhook
/// handler and media transport both need to look sessions up by id, so
/// the registry itself is the only thing behind a shared lock.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<Mutex<Session>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, call_control_id: String, session: Session) -> Arc<Mutex<Session>> {
        let handle = Arc::new(Mutex::new(session));
        self.sessions.lock().await.insert(call_control_id, handle.clone());
        handle
    }

    pub async fn get(&self, call_control_id: &str) -> Option<Arc<Mutex<Session>>> {
        self.sessions.lock().await.get(call_control_id).cloned()
    }

    pub async fn remove(&self, call_control_id: &str) -> Option<Arc<Mutex<Session>>> {
        self.sessions.lock().await.remove(call_control_id)
    }

    pub async fn active_count(&self) -> usize {
        self.sessions.lock().await.len()
    }
}
