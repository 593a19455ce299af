//! Authentication service: adapter identity tokens.
//!
//! Every adapter is issued a token at registration time; services that
//! accept adapter-originated calls can verify it. Tokens are opaque
//! random values held in memory and revoked together at shutdown.

use crate::clock::Clock;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::RngCore;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Metadata held per issued token
#[derive(Debug, Clone)]
pub struct AdapterTokenInfo {
    pub adapter_kind: String,
    pub issued_at: DateTime<Utc>,
    pub revoked: bool,
}

/// In-memory adapter authentication
#[derive(Clone)]
pub struct AuthenticationService {
    clock: Arc<dyn Clock>,
    tokens: Arc<Mutex<HashMap<String, AdapterTokenInfo>>>,
}

impl AuthenticationService {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            tokens: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Issue a fresh token for an adapter
    pub fn issue_adapter_token(&self, adapter_kind: &str) -> String {
        let mut raw = [0u8; 24];
        rand::thread_rng().fill_bytes(&mut raw);
        let token = hex::encode(raw);

        self.tokens.lock().insert(
            token.clone(),
            AdapterTokenInfo {
                adapter_kind: adapter_kind.to_string(),
                issued_at: self.clock.now(),
                revoked: false,
            },
        );

        debug!(adapter = adapter_kind, "Issued adapter authentication token");
        token
    }

    /// Whether a token is known and unrevoked
    pub fn verify_token(&self, token: &str) -> bool {
        self.tokens
            .lock()
            .get(token)
            .map(|info| !info.revoked)
            .unwrap_or(false)
    }

    /// Revoke one token; returns whether it existed and was live
    pub fn revoke_token(&self, token: &str) -> bool {
        match self.tokens.lock().get_mut(token) {
            Some(info) if !info.revoked => {
                info.revoked = true;
                true
            }
            _ => false,
        }
    }

    /// Live (unrevoked) token count
    pub fn token_count(&self) -> usize {
        self.tokens.lock().values().filter(|info| !info.revoked).count()
    }

    /// Revoke everything outstanding
    pub async fn stop(&self) {
        let mut tokens = self.tokens.lock();
        let live = tokens.values().filter(|info| !info.revoked).count();
        for info in tokens.values_mut() {
            info.revoked = true;
        }
        info!(revoked = live, "Authentication service stopped; tokens revoked");
    }
}
