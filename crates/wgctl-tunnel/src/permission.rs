//! Permission Gate
//!
//! Requests and caches the platform's consent to run a VPN.
//!
//! Every request gets a sequence number. Only an answer for the most
//! recent request is honored; answers to superseded prompts are dropped,
//! and callers still waiting on an older request receive the newer
//! request's outcome.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Cached authorization fact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AuthorizationStatus {
    pub authorized: bool,
    /// Request this fact answers (0 before any request)
    pub sequence: u64,
}

/// Outcome of the platform's consent pre-check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preflight {
    /// Consent already held; no prompt needed
    NotRequired,
    /// The user must be asked
    Required,
}

/// Failure inside the platform authorization facility
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("authorization facility failed: {0}")]
pub struct AuthorityError(pub String);

/// Platform VPN authorization facility
#[async_trait]
pub trait Authority: Send + Sync {
    /// Check whether consent must still be requested
    async fn prepare(&self) -> Result<Preflight, AuthorityError>;

    /// Show the consent prompt
    ///
    /// Returns once the prompt is on screen. The user's answer is delivered
    /// later through [`PermissionPrompt::respond`].
    async fn present(&self, prompt: PermissionPrompt) -> Result<(), AuthorityError>;
}

struct GateInner {
    authority: Arc<dyn Authority>,
    status: watch::Sender<AuthorizationStatus>,
    latest: AtomicU64,
}

impl GateInner {
    /// Allocate the next request number
    ///
    /// Runs under the status lock so it orders with [`resolve`](Self::resolve).
    fn next_sequence(&self) -> u64 {
        let mut sequence = 0;
        self.status.send_if_modified(|_| {
            sequence = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
            false
        });
        sequence
    }

    fn resolve(&self, sequence: u64, granted: bool) -> bool {
        let mut latest = 0;
        let accepted = self.status.send_if_modified(|status| {
            latest = self.latest.load(Ordering::SeqCst);
            if sequence != latest {
                return false;
            }
            *status = AuthorizationStatus {
                authorized: granted,
                sequence,
            };
            true
        });

        if !accepted {
            debug!(
                "Discarding stale authorization answer #{} (latest #{})",
                sequence, latest
            );
        } else if granted {
            info!("VPN authorization granted (request #{})", sequence);
        } else {
            warn!("VPN authorization denied (request #{})", sequence);
        }
        accepted
    }
}

/// Answer slot for one outstanding consent prompt
pub struct PermissionPrompt {
    sequence: u64,
    gate: Weak<GateInner>,
}

impl PermissionPrompt {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Deliver the user's answer
    ///
    /// Returns `false` when a newer prompt has superseded this one (the
    /// answer is discarded) or the gate no longer exists.
    pub fn respond(self, granted: bool) -> bool {
        match self.gate.upgrade() {
            Some(gate) => gate.resolve(self.sequence, granted),
            None => false,
        }
    }

    pub fn grant(self) -> bool {
        self.respond(true)
    }

    pub fn deny(self) -> bool {
        self.respond(false)
    }
}

impl std::fmt::Debug for PermissionPrompt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionPrompt")
            .field("sequence", &self.sequence)
            .finish()
    }
}

/// Requests and caches VPN authorization
#[derive(Clone)]
pub struct PermissionGate {
    inner: Arc<GateInner>,
}

impl PermissionGate {
    pub fn new(authority: Arc<dyn Authority>) -> Self {
        let (status, _rx) = watch::channel(AuthorizationStatus::default());
        Self {
            inner: Arc::new(GateInner {
                authority,
                status,
                latest: AtomicU64::new(0),
            }),
        }
    }

    /// Cached status
    pub fn status(&self) -> AuthorizationStatus {
        *self.inner.status.borrow()
    }

    pub fn is_authorized(&self) -> bool {
        self.status().authorized
    }

    /// Issue an authorization request without waiting for the answer
    ///
    /// Returns the sequence number the answer will carry. When consent is
    /// already cached nothing is issued and the cached sequence is returned.
    pub async fn request(&self) -> u64 {
        let cached = self.status();
        if cached.authorized {
            return cached.sequence;
        }

        let sequence = self.inner.next_sequence();
        debug!("Issuing VPN authorization request #{}", sequence);

        match self.inner.authority.prepare().await {
            Ok(Preflight::NotRequired) => {
                self.inner.resolve(sequence, true);
            }
            Ok(Preflight::Required) => {
                let prompt = PermissionPrompt {
                    sequence,
                    gate: Arc::downgrade(&self.inner),
                };
                if let Err(e) = self.inner.authority.present(prompt).await {
                    warn!("Could not present authorization prompt: {}", e);
                    self.inner.resolve(sequence, false);
                }
            }
            Err(e) => {
                warn!("Authorization pre-check failed: {}", e);
                self.inner.resolve(sequence, false);
            }
        }

        sequence
    }

    /// Obtain authorization, waiting for the user when a prompt is needed
    pub async fn ensure_authorized(&self) -> AuthorizationStatus {
        let cached = self.status();
        if cached.authorized {
            return cached;
        }

        let mut rx = self.inner.status.subscribe();
        let sequence = self.request().await;

        match rx.wait_for(|status| status.sequence >= sequence).await {
            Ok(status) => *status,
            // sender lives in `inner`, which we hold
            Err(_) => AuthorizationStatus { authorized: false, sequence },
        }
    }

    /// Deliver an answer for `sequence` from platform glue that tracks
    /// request numbers itself
    pub fn resolve(&self, sequence: u64, granted: bool) -> bool {
        self.inner.resolve(sequence, granted)
    }

    /// Forget cached consent (the platform revoked it)
    ///
    /// The answered sequence is kept, so an open prompt still decides the
    /// outcome for callers waiting on it.
    pub fn revoke(&self) {
        info!("VPN authorization revoked");
        self.inner.status.send_modify(|status| status.authorized = false);
    }
}
