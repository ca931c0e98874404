//! Native backend seam
//!
//! The native VPN subsystem is reached only through [`TunnelBackend`].
//! [`BackendHandle`] creates the entry point lazily, at most once per
//! process, and hands the same reference to every later operation so no
//! second native tunnel registration can appear.
//!
//! Two message flows connect the backend to the controller:
//! - each operation is an `async fn` whose completion is the native
//!   completion callback;
//! - spontaneous status changes travel on an always-open channel handed to
//!   the backend at creation ([`NativeEventSender`]).

use crate::config::TunnelConfig;
use crate::identity::TunnelIdentity;
use crate::native::NativeStatus;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, OnceCell};
use tracing::{debug, info, warn};

/// Byte counters of a running tunnel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferStats {
    /// Bytes received through the tunnel
    pub rx_bytes: u64,
    /// Bytes sent through the tunnel
    pub tx_bytes: u64,
}

impl TransferStats {
    /// Format as human-readable string
    pub fn format(&self) -> String {
        format!(
            "RX: {:.2}MB, TX: {:.2}MB",
            self.rx_bytes as f64 / (1024.0 * 1024.0),
            self.tx_bytes as f64 / (1024.0 * 1024.0),
        )
    }
}

/// Profile persisted in the platform's preference store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelProfile {
    pub identity: TunnelIdentity,
    /// Address shown by the platform as the VPN server
    pub server_address: Option<String>,
    pub config: TunnelConfig,
}

impl TunnelProfile {
    pub fn new(identity: TunnelIdentity, config: TunnelConfig) -> Self {
        Self {
            server_address: config.server_address(),
            identity,
            config,
        }
    }
}

/// Native subsystem rejected or failed an operation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("tunnel is already running")]
    AlreadyRunning,

    #[error("native subsystem rejected the configuration: {0}")]
    InvalidConfig(String),

    #[error("could not save tunnel profile: {0}")]
    SaveFailed(String),

    #[error("could not load tunnel profile: {0}")]
    LoadFailed(String),

    #[error("{0}")]
    Native(String),
}

impl BackendError {
    /// Native-supplied detail, without the operation prefix
    pub fn detail(&self) -> &str {
        match self {
            BackendError::AlreadyRunning => "tunnel is already running",
            BackendError::InvalidConfig(detail)
            | BackendError::SaveFailed(detail)
            | BackendError::LoadFailed(detail)
            | BackendError::Native(detail) => detail,
        }
    }
}

/// Native entry point could not be created
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("native VPN backend unavailable: {0}")]
pub struct BackendUnavailable(pub String);

/// Native tunnel facility: profile persistence and session control
#[async_trait]
pub trait TunnelBackend: Send + Sync {
    /// Persist the profile to the platform preference store
    async fn save_profile(&self, profile: &TunnelProfile) -> Result<(), BackendError>;

    /// Reload the persisted profile
    async fn load_profile(&self, identity: &TunnelIdentity) -> Result<TunnelProfile, BackendError>;

    /// Bring the tunnel up; resolves when the platform accepted the request
    async fn bring_up(&self, profile: &TunnelProfile) -> Result<(), BackendError>;

    /// Tear the tunnel down; resolves when the platform accepted the request
    async fn tear_down(&self, identity: &TunnelIdentity) -> Result<(), BackendError>;

    /// Whether the platform currently runs this tunnel
    async fn is_running(&self, identity: &TunnelIdentity) -> Result<bool, BackendError>;

    /// Byte counters of the running tunnel
    async fn transfer_stats(&self, identity: &TunnelIdentity) -> Result<TransferStats, BackendError>;
}

/// Creates the native entry point
#[async_trait]
pub trait BackendFactory: Send + Sync {
    async fn create(&self, events: NativeEventSender) -> Result<Arc<dyn TunnelBackend>, BackendUnavailable>;
}

/// Always-open channel for spontaneous native status notifications
#[derive(Clone)]
pub struct NativeEventSender {
    tx: mpsc::UnboundedSender<NativeStatus>,
}

impl NativeEventSender {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<NativeStatus>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Report a native status change
    ///
    /// Returns `false` once the controller is gone.
    pub fn notify(&self, status: NativeStatus) -> bool {
        debug!("Native status notification: {}", status);
        self.tx.send(status).is_ok()
    }
}

/// Lazily created, memoized reference to the native backend
pub struct BackendHandle {
    factory: Arc<dyn BackendFactory>,
    events: NativeEventSender,
    backend: OnceCell<Arc<dyn TunnelBackend>>,
}

impl BackendHandle {
    pub fn new(factory: Arc<dyn BackendFactory>, events: NativeEventSender) -> Self {
        Self {
            factory,
            events,
            backend: OnceCell::new(),
        }
    }

    /// Return the backend, creating it on first use
    ///
    /// Concurrent first calls share one creation. A failed creation is not
    /// remembered; the next call tries again.
    pub async fn get_or_create(&self) -> Result<Arc<dyn TunnelBackend>, BackendUnavailable> {
        self.backend
            .get_or_try_init(|| async {
                info!("Creating native VPN backend");
                self.factory.create(self.events.clone()).await.inspect_err(|e| {
                    warn!("Backend creation failed: {}", e);
                })
            })
            .await
            .cloned()
    }

    pub fn is_created(&self) -> bool {
        self.backend.initialized()
    }
}
