//! Tunnel Controller
//!
//! Owns the lifecycle of the single managed tunnel:
//! - Identity and permission bootstrap (`initialize`)
//! - Bring-up and tear-down (`start` / `stop`)
//! - Authoritative state and its observers (`query_status` / `subscribe`)
//!
//! # Lifecycle
//!
//! At most one `start` or `stop` runs at a time; a second one is rejected
//! with [`ControllerError::OperationInProgress`] rather than queued. While
//! an operation runs the controller asserts an optimistic state
//! (`preparing`, `connecting`, `disconnecting`). Native status callbacks
//! take precedence over it: they are applied as they arrive, and a failed
//! operation only rolls back a state it asserted itself.

use crate::backend::{BackendError, BackendFactory, BackendHandle, BackendUnavailable, NativeEventSender, TransferStats, TunnelProfile};
use crate::broadcast::{StatusBroadcaster, StatusSubscription};
use crate::config::{ParseError, TunnelConfig};
use crate::identity::{InvalidName, TunnelIdentity};
use crate::keys::KeyPair;
use crate::native::{translate, NativeStatus};
use crate::permission::{Authority, AuthorizationStatus, PermissionGate};
use crate::state::CanonicalState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{mpsc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Lifecycle errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControllerError {
    #[error("Invalid tunnel name: {0}")]
    InvalidName(#[from] InvalidName),

    #[error("Tunnel not initialized")]
    NotInitialized,

    #[error("Tunnel `{0}` is active")]
    TunnelActive(String),

    #[error("VPN permission not granted")]
    NotAuthorized,

    #[error("Invalid configuration: {0}")]
    Parse(#[from] ParseError),

    #[error("Tunnel is not running")]
    NotRunning,

    #[error("Another start or stop is in progress")]
    OperationInProgress,

    #[error(transparent)]
    BackendUnavailable(#[from] BackendUnavailable),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

impl ControllerError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            ControllerError::InvalidName(_) => "INVALID_NAME",
            ControllerError::NotInitialized => "NOT_INITIALIZED",
            ControllerError::TunnelActive(_) => "TUNNEL_ACTIVE",
            ControllerError::NotAuthorized => "NOT_AUTHORIZED",
            ControllerError::Parse(_) => "PARSE_ERROR",
            ControllerError::NotRunning => "NOT_RUNNING",
            ControllerError::OperationInProgress => "OPERATION_IN_PROGRESS",
            ControllerError::BackendUnavailable(_) => "BACKEND_UNAVAILABLE",
            ControllerError::Backend(_) => "BACKEND_ERROR",
        }
    }
}

/// Single-tunnel lifecycle controller
///
/// Must be created inside a Tokio runtime; it spawns the task that applies
/// native status callbacks.
pub struct TunnelController {
    provider: String,
    identity: RwLock<Option<TunnelIdentity>>,
    permission: PermissionGate,
    backend: BackendHandle,
    status: StatusBroadcaster,
    /// Held for the whole of a start or stop
    lifecycle: Mutex<()>,
    /// Set while the lifecycle lock is held
    in_flight: AtomicBool,
    monitor: JoinHandle<()>,
}

/// A running start or stop
struct Operation<'a> {
    _lock: MutexGuard<'a, ()>,
    in_flight: &'a AtomicBool,
}

impl Drop for Operation<'_> {
    fn drop(&mut self) {
        self.in_flight.store(false, Ordering::SeqCst);
    }
}

impl TunnelController {
    pub fn new(
        provider: impl Into<String>,
        authority: Arc<dyn Authority>,
        factory: Arc<dyn BackendFactory>,
    ) -> Self {
        let (events, rx) = NativeEventSender::channel();
        let status = StatusBroadcaster::default();
        let monitor = tokio::spawn(apply_native_events(rx, status.clone()));

        Self {
            provider: provider.into(),
            identity: RwLock::new(None),
            permission: PermissionGate::new(authority),
            backend: BackendHandle::new(factory, events),
            status,
            lifecycle: Mutex::new(()),
            in_flight: AtomicBool::new(false),
            monitor,
        }
    }

    /// Establish the tunnel identity and trigger a permission check
    ///
    /// Re-initializing with the current name is a no-op. A different name
    /// is refused while the tunnel is active.
    pub async fn initialize(&self, name: &str) -> Result<(), ControllerError> {
        let identity = TunnelIdentity::new(name, &self.provider)?;
        {
            let mut current = self.identity.write().unwrap_or_else(PoisonError::into_inner);
            match current.as_ref() {
                Some(existing) if existing.name() == identity.name() => {
                    debug!("Tunnel `{}` already initialized", name);
                }
                Some(existing) if self.is_busy() => {
                    return Err(ControllerError::TunnelActive(existing.name().to_string()));
                }
                _ => {
                    info!("Tunnel initialized: {}", identity);
                    *current = Some(identity);
                }
            }
        }

        if let Err(e) = self.backend.get_or_create().await {
            warn!("{} (retrying on first use)", e);
        }
        self.permission.request().await;
        Ok(())
    }

    /// Bring the tunnel up from wg-quick text
    ///
    /// Resolves once the native subsystem accepted the request; the state is
    /// then `connecting` until the first native callback.
    pub async fn start(&self, config_text: &str) -> Result<(), ControllerError> {
        let _operation = self.begin("Start")?;

        let identity = self.identity().ok_or(ControllerError::NotInitialized)?;
        if !self.permission.is_authorized() {
            warn!("Start rejected: VPN permission not granted");
            self.permission.request().await;
            return Err(ControllerError::NotAuthorized);
        }

        let entry = self.status.current();
        let mut asserted = None;
        let result = self.bring_up(identity, config_text, &mut asserted).await;
        self.finish("start", result, entry, asserted)
    }

    /// Take the lifecycle lock without waiting
    ///
    /// The in-flight flag is raised before the identity is read, so an
    /// `initialize` or `dispose` holding the identity lock either sees it or
    /// finishes before the operation reads the identity.
    fn begin(&self, operation: &str) -> Result<Operation<'_>, ControllerError> {
        let lock = self.lifecycle.try_lock().map_err(|_| {
            warn!("{} rejected: another operation is in progress", operation);
            ControllerError::OperationInProgress
        })?;
        self.in_flight.store(true, Ordering::SeqCst);
        Ok(Operation {
            _lock: lock,
            in_flight: &self.in_flight,
        })
    }

    async fn bring_up(
        &self,
        identity: TunnelIdentity,
        config_text: &str,
        asserted: &mut Option<CanonicalState>,
    ) -> Result<(), ControllerError> {
        self.assert_state(CanonicalState::Preparing, asserted);
        let config = TunnelConfig::parse(config_text)?;
        let profile = TunnelProfile::new(identity, config);

        let backend = self.backend.get_or_create().await?;
        backend.save_profile(&profile).await?;
        let profile = backend.load_profile(&profile.identity).await?;

        info!(
            "Starting tunnel `{}` ({} peer(s), server {})",
            profile.identity.name(),
            profile.config.peers.len(),
            profile.server_address.as_deref().unwrap_or("-")
        );
        self.assert_state(CanonicalState::Connecting, asserted);
        backend.bring_up(&profile).await?;
        Ok(())
    }

    /// Tear the running tunnel down
    pub async fn stop(&self) -> Result<(), ControllerError> {
        let _operation = self.begin("Stop")?;

        let Some(identity) = self.identity() else {
            self.status.publish(CanonicalState::Disconnected);
            return Err(ControllerError::NotRunning);
        };

        let entry = self.status.current();
        let mut asserted = None;
        let result = self.tear_down(identity, &mut asserted).await;
        self.finish("stop", result, entry, asserted)
    }

    async fn tear_down(
        &self,
        identity: TunnelIdentity,
        asserted: &mut Option<CanonicalState>,
    ) -> Result<(), ControllerError> {
        let backend = self.backend.get_or_create().await?;
        if !backend.is_running(&identity).await? {
            info!("Tunnel `{}` is not running", identity.name());
            self.status.publish(CanonicalState::Disconnected);
            return Err(ControllerError::NotRunning);
        }

        info!("Stopping tunnel `{}`", identity.name());
        self.assert_state(CanonicalState::Disconnecting, asserted);
        backend.tear_down(&identity).await?;
        Ok(())
    }

    fn assert_state(&self, state: CanonicalState, asserted: &mut Option<CanonicalState>) {
        debug_assert!(state.is_optimistic());
        if self.status.publish(state) {
            debug!("Tunnel state: {}", state);
        }
        *asserted = Some(state);
    }

    /// Roll back a failed operation's optimistic state, unless a native
    /// callback already replaced it
    fn finish(
        &self,
        operation: &str,
        result: Result<(), ControllerError>,
        entry: CanonicalState,
        asserted: Option<CanonicalState>,
    ) -> Result<(), ControllerError> {
        if let Err(e) = &result {
            match e {
                ControllerError::NotRunning => warn!("Tunnel {} failed: {}", operation, e),
                ControllerError::Backend(native) => {
                    error!("Tunnel {} rejected by native subsystem: {}", operation, native.detail())
                }
                _ => error!("Tunnel {} failed: {}", operation, e),
            }
            if let Some(optimistic) = asserted {
                if self.status.replace(optimistic, entry) {
                    debug!("Tunnel state restored to {}", entry);
                }
            }
        }
        result
    }

    /// Current canonical state
    pub fn query_status(&self) -> CanonicalState {
        self.status.current()
    }

    /// Observe state changes, starting with the current state
    pub fn subscribe(&self) -> StatusSubscription {
        self.status.subscribe()
    }

    /// Issue a permission request without waiting for the answer
    pub async fn check_permission(&self) {
        self.permission.request().await;
    }

    /// Obtain permission, waiting for the user if a prompt is needed
    pub async fn ensure_authorized(&self) -> AuthorizationStatus {
        self.permission.ensure_authorized().await
    }

    /// Cached authorization fact
    pub fn authorization(&self) -> AuthorizationStatus {
        self.permission.status()
    }

    /// Permission gate, for platform glue delivering answers or revocations
    pub fn permission(&self) -> &PermissionGate {
        &self.permission
    }

    /// Byte counters of the running tunnel
    pub async fn transfer_stats(&self) -> Result<TransferStats, ControllerError> {
        let identity = self.identity().ok_or(ControllerError::NotInitialized)?;
        let backend = self.backend.get_or_create().await?;
        if !backend.is_running(&identity).await? {
            return Err(ControllerError::NotRunning);
        }
        Ok(backend.transfer_stats(&identity).await?)
    }

    /// Fresh X25519 key pair for a new interface
    pub fn generate_key_pair(&self) -> KeyPair {
        KeyPair::generate()
    }

    /// Release the tunnel identity
    pub fn dispose(&self) -> Result<(), ControllerError> {
        let mut current = self.identity.write().unwrap_or_else(PoisonError::into_inner);
        match current.as_ref() {
            Some(identity) if self.is_busy() => Err(ControllerError::TunnelActive(identity.name().to_string())),
            Some(_) => {
                if let Some(identity) = current.take() {
                    info!("Tunnel `{}` released", identity.name());
                }
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Current tunnel identity
    pub fn identity(&self) -> Option<TunnelIdentity> {
        self.identity.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// A tunnel is up, or an operation is in flight
    fn is_busy(&self) -> bool {
        self.status.current().is_active() || self.in_flight.load(Ordering::SeqCst)
    }
}

impl Drop for TunnelController {
    fn drop(&mut self) {
        self.monitor.abort();
    }
}

async fn apply_native_events(mut events: mpsc::UnboundedReceiver<NativeStatus>, status: StatusBroadcaster) {
    while let Some(native) = events.recv().await {
        let state = translate(native);
        if status.publish(state) {
            info!("Tunnel state: {} (native {})", state, native);
        } else {
            debug!("Native {} repeats state {}", native, state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample_config;
    use crate::native::NeVpnStatus;
    use crate::settings::{Consent, SimulationSettings};
    use crate::simulated::{FailPoint, SimulatedAuthority, SimulatedBackend};
    use std::time::Duration;

    struct Harness {
        controller: Arc<TunnelController>,
        backend: SimulatedBackend,
        authority: Arc<SimulatedAuthority>,
    }

    fn harness(consent: Consent, settings: SimulationSettings) -> Harness {
        let backend = SimulatedBackend::new(settings);
        let authority = Arc::new(SimulatedAuthority::new(consent));
        let controller = TunnelController::new(
            "com.example.tunnel",
            authority.clone(),
            Arc::new(backend.clone()),
        );
        Harness {
            controller: Arc::new(controller),
            backend,
            authority,
        }
    }

    /// Initialized as `home` with consent held
    async fn ready() -> Harness {
        let h = harness(Consent::Granted, SimulationSettings::default());
        h.controller.initialize("home").await.unwrap();
        h
    }

    async fn wait_for_state(sub: &mut StatusSubscription, target: CanonicalState) {
        let reached = tokio::time::timeout(Duration::from_secs(1), async {
            while let Some(state) = sub.next().await {
                if state == target {
                    return;
                }
            }
        })
        .await;
        assert!(reached.is_ok(), "state never became {}", target);
    }

    async fn connected() -> Harness {
        let h = ready().await;
        let mut sub = h.controller.subscribe();
        h.controller.start(&sample_config()).await.unwrap();
        h.backend.report_up();
        wait_for_state(&mut sub, CanonicalState::Connected).await;
        h
    }

    #[tokio::test]
    async fn test_fresh_controller() {
        let h = harness(Consent::Granted, SimulationSettings::default());
        assert_eq!(h.controller.query_status(), CanonicalState::NoConnection);
        assert_eq!(h.controller.query_status(), CanonicalState::NoConnection);
        assert!(h.controller.identity().is_none());
    }

    #[tokio::test]
    async fn test_end_to_end() {
        let h = ready().await;
        let mut sub = h.controller.subscribe();
        assert_eq!(sub.next().await, Some(CanonicalState::NoConnection));

        h.controller.start(&sample_config()).await.unwrap();
        assert_eq!(h.controller.query_status(), CanonicalState::Connecting);

        h.backend.report_up();
        wait_for_state(&mut sub, CanonicalState::Connected).await;

        h.controller.stop().await.unwrap();
        assert_eq!(h.controller.query_status(), CanonicalState::Disconnecting);

        h.backend.report_down();
        wait_for_state(&mut sub, CanonicalState::Disconnected).await;
        assert!(h.backend.running().is_none());
    }

    #[tokio::test]
    async fn test_auto_reported_lifecycle() {
        let h = harness(
            Consent::Granted,
            SimulationSettings {
                auto_report: true,
                report_delay_ms: 10,
                ..Default::default()
            },
        );
        h.controller.initialize("home").await.unwrap();
        let mut sub = h.controller.subscribe();

        h.controller.start(&sample_config()).await.unwrap();
        wait_for_state(&mut sub, CanonicalState::Connected).await;
        assert!(h.controller.transfer_stats().await.unwrap().rx_bytes > 0);

        h.controller.stop().await.unwrap();
        wait_for_state(&mut sub, CanonicalState::Disconnected).await;
        assert_eq!(h.controller.transfer_stats().await, Err(ControllerError::NotRunning));
    }

    #[tokio::test]
    async fn test_start_observes_optimistic_states() {
        let h = ready().await;
        h.backend.pause();
        let mut sub = h.controller.subscribe();

        let start = {
            let controller = h.controller.clone();
            tokio::spawn(async move { controller.start(&sample_config()).await })
        };

        wait_for_state(&mut sub, CanonicalState::Connecting).await;
        h.backend.resume();
        start.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_start_rejected() {
        let h = ready().await;
        h.backend.pause();
        let mut sub = h.controller.subscribe();

        let first = {
            let controller = h.controller.clone();
            tokio::spawn(async move { controller.start(&sample_config()).await })
        };
        wait_for_state(&mut sub, CanonicalState::Connecting).await;

        assert_eq!(
            h.controller.start(&sample_config()).await,
            Err(ControllerError::OperationInProgress)
        );
        assert_eq!(h.controller.stop().await, Err(ControllerError::OperationInProgress));

        h.backend.resume();
        first.await.unwrap().unwrap();
        assert_eq!(h.controller.query_status(), CanonicalState::Connecting);
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        let h = ready().await;
        assert_eq!(h.controller.stop().await, Err(ControllerError::NotRunning));
        assert_eq!(h.controller.query_status(), CanonicalState::Disconnected);
    }

    #[tokio::test]
    async fn test_stop_before_initialize() {
        let h = harness(Consent::Granted, SimulationSettings::default());
        assert_eq!(h.controller.stop().await, Err(ControllerError::NotRunning));
        assert_eq!(h.controller.query_status(), CanonicalState::Disconnected);
    }

    #[tokio::test]
    async fn test_start_before_initialize() {
        let h = harness(Consent::Granted, SimulationSettings::default());
        assert_eq!(
            h.controller.start(&sample_config()).await,
            Err(ControllerError::NotInitialized)
        );
        assert_eq!(h.controller.query_status(), CanonicalState::NoConnection);
    }

    #[tokio::test]
    async fn test_parse_failure_leaves_state() {
        let h = ready().await;
        let text = sample_config().replace("PrivateKey", "# PrivateKey");

        let result = h.controller.start(&text).await;
        assert!(matches!(result, Err(ControllerError::Parse(ParseError::MissingField { .. }))));
        assert_eq!(h.controller.query_status(), CanonicalState::NoConnection);
        assert!(h.backend.saved_profile("home").is_none());
    }

    #[tokio::test]
    async fn test_unauthorized_start_retriggers_request() {
        let h = harness(Consent::Prompt, SimulationSettings::default());
        h.controller.initialize("home").await.unwrap();
        assert_eq!(h.authority.pending(), Some(1));

        assert_eq!(
            h.controller.start(&sample_config()).await,
            Err(ControllerError::NotAuthorized)
        );
        assert_eq!(h.authority.pending(), Some(2));
        assert_eq!(h.authority.prepares(), 2);
        assert_eq!(h.controller.query_status(), CanonicalState::NoConnection);

        assert!(h.authority.answer(true));
        assert!(h.controller.authorization().authorized);
        h.controller.start(&sample_config()).await.unwrap();
    }

    #[tokio::test]
    async fn test_ensure_authorized() {
        let h = harness(Consent::AutoGrant, SimulationSettings::default());
        let status = h.controller.ensure_authorized().await;
        assert!(status.authorized);

        let h = harness(Consent::AutoDeny, SimulationSettings::default());
        h.controller.check_permission().await;
        assert!(!h.controller.ensure_authorized().await.authorized);
    }

    #[tokio::test]
    async fn test_initialize_rules() {
        let h = connected().await;

        assert!(matches!(
            h.controller.initialize("bad name").await,
            Err(ControllerError::InvalidName(_))
        ));
        assert_eq!(
            h.controller.initialize("office").await,
            Err(ControllerError::TunnelActive("home".into()))
        );
        h.controller.initialize("home").await.unwrap();
        assert_eq!(h.controller.identity().unwrap().name(), "home");
    }

    #[tokio::test]
    async fn test_reinitialize_while_idle() {
        let h = ready().await;
        h.controller.initialize("office").await.unwrap();

        let identity = h.controller.identity().unwrap();
        assert_eq!(identity.name(), "office");
        assert_eq!(identity.provider(), "com.example.tunnel");
    }

    #[tokio::test]
    async fn test_save_failure_restores_state() {
        let h = ready().await;
        h.backend.fail_next(FailPoint::Save, BackendError::SaveFailed("store locked".into()));

        assert_eq!(
            h.controller.start(&sample_config()).await,
            Err(ControllerError::Backend(BackendError::SaveFailed("store locked".into())))
        );
        assert_eq!(h.controller.query_status(), CanonicalState::NoConnection);
    }

    #[tokio::test]
    async fn test_load_failure_restores_state() {
        let h = ready().await;
        let mut sub = h.controller.subscribe();
        assert_eq!(sub.next().await, Some(CanonicalState::NoConnection));
        h.backend.fail_next(FailPoint::Load, BackendError::LoadFailed("profile vanished".into()));

        assert_eq!(
            h.controller.start(&sample_config()).await,
            Err(ControllerError::Backend(BackendError::LoadFailed("profile vanished".into())))
        );
        assert_eq!(h.controller.query_status(), CanonicalState::NoConnection);

        let last = tokio::time::timeout(Duration::from_secs(1), sub.next()).await.unwrap();
        assert_eq!(last, Some(CanonicalState::NoConnection));
        assert!(h.backend.running().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_initialize_does_not_block_start() {
        let h = ready().await;
        let text = sample_config().replace("PrivateKey", "# PrivateKey");

        let initializer = {
            let controller = h.controller.clone();
            tokio::spawn(async move {
                for _ in 0..2_000 {
                    controller.initialize("home").await.unwrap();
                }
            })
        };

        for _ in 0..2_000 {
            let result = h.controller.start(&text).await;
            assert!(matches!(result, Err(ControllerError::Parse(_))), "unexpected {:?}", result);
        }
        initializer.await.unwrap();
    }

    #[tokio::test]
    async fn test_rename_refused_while_operation_runs() {
        let h = ready().await;

        let operation = h.controller.begin("Start").unwrap();
        assert_eq!(
            h.controller.initialize("office").await,
            Err(ControllerError::TunnelActive("home".into()))
        );
        assert_eq!(h.controller.dispose(), Err(ControllerError::TunnelActive("home".into())));
        assert_eq!(h.controller.identity().unwrap().name(), "home");

        drop(operation);
        h.controller.initialize("office").await.unwrap();
        assert_eq!(h.controller.identity().unwrap().name(), "office");
    }

    #[tokio::test]
    async fn test_rename_refused_during_bring_up() {
        let h = ready().await;
        h.backend.pause();
        let mut sub = h.controller.subscribe();

        let start = {
            let controller = h.controller.clone();
            tokio::spawn(async move { controller.start(&sample_config()).await })
        };
        wait_for_state(&mut sub, CanonicalState::Connecting).await;

        assert_eq!(
            h.controller.initialize("office").await,
            Err(ControllerError::TunnelActive("home".into()))
        );
        h.backend.resume();
        start.await.unwrap().unwrap();

        h.backend.report_up();
        wait_for_state(&mut sub, CanonicalState::Connected).await;
        h.controller.stop().await.unwrap();
        assert!(h.backend.running().is_none());
    }

    #[tokio::test]
    async fn test_start_while_connected() {
        let h = connected().await;

        assert_eq!(
            h.controller.start(&sample_config()).await,
            Err(ControllerError::Backend(BackendError::AlreadyRunning))
        );
        assert_eq!(h.controller.query_status(), CanonicalState::Connected);
    }

    #[tokio::test]
    async fn test_failure_keeps_native_state() {
        let h = ready().await;
        h.backend.pause();
        let mut sub = h.controller.subscribe();

        let start = {
            let controller = h.controller.clone();
            tokio::spawn(async move { controller.start(&sample_config()).await })
        };
        wait_for_state(&mut sub, CanonicalState::Connecting).await;

        h.backend.report_up();
        wait_for_state(&mut sub, CanonicalState::Connected).await;

        h.backend.fail_next(FailPoint::BringUp, BackendError::Native("late failure".into()));
        h.backend.resume();

        assert!(start.await.unwrap().is_err());
        assert_eq!(h.controller.query_status(), CanonicalState::Connected);
    }

    #[tokio::test]
    async fn test_stop_failure_restores_state() {
        let h = connected().await;
        h.backend.fail_next(FailPoint::TearDown, BackendError::Native("busy".into()));

        assert!(matches!(h.controller.stop().await, Err(ControllerError::Backend(_))));
        assert_eq!(h.controller.query_status(), CanonicalState::Connected);
    }

    #[tokio::test]
    async fn test_spontaneous_native_events() {
        let h = connected().await;
        let mut sub = h.controller.subscribe();

        h.backend.report(NeVpnStatus::Reasserting);
        wait_for_state(&mut sub, CanonicalState::Reasserting).await;

        h.backend.report(NeVpnStatus::from_raw(99));
        wait_for_state(&mut sub, CanonicalState::Disconnected).await;
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_present() {
        let h = connected().await;

        let mut sub = h.controller.subscribe();
        assert_eq!(sub.next().await, Some(CanonicalState::Connected));
    }

    #[tokio::test]
    async fn test_backend_created_once() {
        let h = connected().await;
        h.controller.transfer_stats().await.unwrap();
        h.controller.stop().await.unwrap();
        h.controller.initialize("home").await.unwrap();

        assert_eq!(h.backend.creations(), 1);
    }

    #[tokio::test]
    async fn test_backend_unavailable_retried() {
        let h = harness(
            Consent::Granted,
            SimulationSettings {
                unavailable: true,
                ..Default::default()
            },
        );
        h.controller.initialize("home").await.unwrap();

        let result = h.controller.start(&sample_config()).await;
        assert!(matches!(result, Err(ControllerError::BackendUnavailable(_))));
        assert_eq!(h.controller.query_status(), CanonicalState::NoConnection);

        h.backend.set_unavailable(false);
        h.controller.start(&sample_config()).await.unwrap();
        assert_eq!(h.backend.creations(), 1);
    }

    #[tokio::test]
    async fn test_saved_profile() {
        let h = connected().await;

        let profile = h.backend.saved_profile("home").unwrap();
        assert_eq!(profile.server_address.as_deref(), Some("185.186.78.1"));
        assert_eq!(profile.identity.provider(), "com.example.tunnel");
    }

    #[tokio::test]
    async fn test_dispose() {
        let h = connected().await;
        assert_eq!(h.controller.dispose(), Err(ControllerError::TunnelActive("home".into())));

        let mut sub = h.controller.subscribe();
        h.controller.stop().await.unwrap();
        h.backend.report_down();
        wait_for_state(&mut sub, CanonicalState::Disconnected).await;

        h.controller.dispose().unwrap();
        assert!(h.controller.identity().is_none());
        assert_eq!(
            h.controller.start(&sample_config()).await,
            Err(ControllerError::NotInitialized)
        );
    }

    #[tokio::test]
    async fn test_generate_key_pair() {
        let h = harness(Consent::Granted, SimulationSettings::default());
        let pair = h.controller.generate_key_pair();
        assert_eq!(pair.private.public_key(), pair.public);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(ControllerError::NotRunning.code(), "NOT_RUNNING");
        assert_eq!(ControllerError::OperationInProgress.code(), "OPERATION_IN_PROGRESS");
        assert_eq!(
            ControllerError::Backend(BackendError::AlreadyRunning).to_string(),
            "Backend error: tunnel is already running"
        );
    }
}
