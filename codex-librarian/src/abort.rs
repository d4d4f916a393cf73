//! Cooperative abort signals
//!
//! One cancellation token per task category. Long-running loops check their
//! token between batches, so an abort takes effect within one batch. A
//! cancelled token is replaced by a fresh one when the next task of that
//! category begins.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AbortKind {
    Import,
    SearchIndex,
    Cleanup,
}

#[derive(Debug, Clone, Default)]
pub struct AbortSignals {
    tokens: Arc<Mutex<HashMap<AbortKind, CancellationToken>>>,
}

impl AbortSignals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token for a task that is starting now. Replaces a token that was
    /// already cancelled so an old abort does not stop new work.
    pub fn begin(&self, kind: AbortKind) -> CancellationToken {
        let mut tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        let token = tokens.entry(kind).or_default();
        if token.is_cancelled() {
            *token = CancellationToken::new();
        }
        token.clone()
    }

    /// Signal every running task of this kind to stop at its next check
    pub fn abort(&self, kind: AbortKind) {
        let tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(token) = tokens.get(&kind) {
            token.cancel();
        }
    }

    pub fn is_aborted(&self, kind: AbortKind) -> bool {
        let tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        tokens.get(&kind).map(|t| t.is_cancelled()).unwrap_or(false)
    }
}
