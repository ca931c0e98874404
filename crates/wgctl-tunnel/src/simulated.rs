//! Simulated platform
//!
//! In-process stand-ins for the native VPN facility and the consent
//! authority. They drive the CLI and the test-suite, and can be told to
//! fail, stall or report status on demand.

use crate::backend::{
    BackendError, BackendFactory, BackendUnavailable, NativeEventSender, TransferStats,
    TunnelBackend, TunnelProfile,
};
use crate::identity::TunnelIdentity;
use crate::native::{GoTunnelState, NativeStatus, NeVpnStatus, ServiceState};
use crate::permission::{Authority, AuthorityError, PermissionPrompt, Preflight};
use crate::settings::{Consent, SimulationSettings, Vocabulary};
use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Backend operation that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    Save,
    Load,
    BringUp,
    TearDown,
}

impl Vocabulary {
    /// Native status meaning "tunnel up"
    pub fn up(self) -> NativeStatus {
        match self {
            Vocabulary::NetworkExtension => NeVpnStatus::Connected.into(),
            Vocabulary::GoBackend => GoTunnelState::Up.into(),
            Vocabulary::ServiceManager => ServiceState::Running.into(),
        }
    }

    /// Native status meaning "tunnel down"
    pub fn down(self) -> NativeStatus {
        match self {
            Vocabulary::NetworkExtension => NeVpnStatus::Disconnected.into(),
            Vocabulary::GoBackend => GoTunnelState::Down.into(),
            Vocabulary::ServiceManager => ServiceState::Stopped.into(),
        }
    }
}

#[derive(Default)]
struct SimState {
    events: Option<NativeEventSender>,
    profiles: HashMap<String, TunnelProfile>,
    running: Option<String>,
    traffic: TransferStats,
    failures: HashMap<FailPoint, BackendError>,
    unavailable: bool,
}

struct Shared {
    settings: SimulationSettings,
    state: Mutex<SimState>,
    creations: AtomicUsize,
    paused: watch::Sender<bool>,
}

/// Simulated native tunnel facility
///
/// Clones share state. The value is its own [`BackendFactory`]; creation
/// hands out another clone wired to the controller's event channel.
#[derive(Clone)]
pub struct SimulatedBackend {
    shared: Arc<Shared>,
}

impl SimulatedBackend {
    pub fn new(settings: SimulationSettings) -> Self {
        let state = SimState {
            unavailable: settings.unavailable,
            ..Default::default()
        };
        let (paused, _rx) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                settings,
                state: Mutex::new(state),
                creations: AtomicUsize::new(0),
                paused,
            }),
        }
    }

    /// Successful creations so far
    pub fn creations(&self) -> usize {
        self.shared.creations.load(Ordering::SeqCst)
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        lock(&self.shared.state).unavailable = unavailable;
    }

    /// Make the next call at `point` fail with `error`
    pub fn fail_next(&self, point: FailPoint, error: BackendError) {
        lock(&self.shared.state).failures.insert(point, error);
    }

    /// Hold bring-up and tear-down before completion until [`resume`](Self::resume)
    pub fn pause(&self) {
        self.shared.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.shared.paused.send_replace(false);
    }

    /// Deliver a native status notification now
    ///
    /// Returns `false` when no controller is attached.
    pub fn report(&self, status: impl Into<NativeStatus>) -> bool {
        let events = lock(&self.shared.state).events.clone();
        match events {
            Some(events) => events.notify(status.into()),
            None => false,
        }
    }

    pub fn report_up(&self) -> bool {
        self.report(self.shared.settings.vocabulary.up())
    }

    pub fn report_down(&self) -> bool {
        self.report(self.shared.settings.vocabulary.down())
    }

    /// Name of the tunnel the platform runs
    pub fn running(&self) -> Option<String> {
        lock(&self.shared.state).running.clone()
    }

    /// Profile stored under `name`
    pub fn saved_profile(&self, name: &str) -> Option<TunnelProfile> {
        lock(&self.shared.state).profiles.get(name).cloned()
    }

    fn take_failure(&self, point: FailPoint) -> Result<(), BackendError> {
        match lock(&self.shared.state).failures.remove(&point) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn settle(&self) {
        let delay = self.shared.settings.operation_delay_ms;
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        let mut paused = self.shared.paused.subscribe();
        // sender lives in `shared`, which we hold
        let _ = paused.wait_for(|paused| !*paused).await;
    }

    fn schedule_report(&self, status: NativeStatus) {
        let settings = &self.shared.settings;
        if !settings.auto_report {
            return;
        }
        let Some(events) = lock(&self.shared.state).events.clone() else {
            return;
        };
        let delay = Duration::from_millis(settings.report_delay_ms);
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            events.notify(status);
        });
    }
}

#[async_trait]
impl BackendFactory for SimulatedBackend {
    async fn create(&self, events: NativeEventSender) -> Result<Arc<dyn TunnelBackend>, BackendUnavailable> {
        let mut state = lock(&self.shared.state);
        if state.unavailable {
            return Err(BackendUnavailable("simulated platform has no VPN facility".into()));
        }
        state.events = Some(events);
        self.shared.creations.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(self.clone()))
    }
}

#[async_trait]
impl TunnelBackend for SimulatedBackend {
    async fn save_profile(&self, profile: &TunnelProfile) -> Result<(), BackendError> {
        self.take_failure(FailPoint::Save)?;
        let name = profile.identity.name().to_string();
        debug!("Saving profile `{}` ({} peer(s))", name, profile.config.peers.len());
        lock(&self.shared.state).profiles.insert(name, profile.clone());
        Ok(())
    }

    async fn load_profile(&self, identity: &TunnelIdentity) -> Result<TunnelProfile, BackendError> {
        self.take_failure(FailPoint::Load)?;
        lock(&self.shared.state)
            .profiles
            .get(identity.name())
            .cloned()
            .ok_or_else(|| BackendError::LoadFailed(format!("no saved profile `{}`", identity.name())))
    }

    async fn bring_up(&self, profile: &TunnelProfile) -> Result<(), BackendError> {
        self.settle().await;
        self.take_failure(FailPoint::BringUp)?;
        {
            let mut state = lock(&self.shared.state);
            if state.running.is_some() {
                return Err(BackendError::AlreadyRunning);
            }
            state.running = Some(profile.identity.name().to_string());
            state.traffic = TransferStats::default();
        }
        info!(
            "Simulated tunnel `{}` up (server {})",
            profile.identity.name(),
            profile.server_address.as_deref().unwrap_or("-")
        );
        self.schedule_report(self.shared.settings.vocabulary.up());
        Ok(())
    }

    async fn tear_down(&self, identity: &TunnelIdentity) -> Result<(), BackendError> {
        self.settle().await;
        self.take_failure(FailPoint::TearDown)?;
        {
            let mut state = lock(&self.shared.state);
            if state.running.as_deref() != Some(identity.name()) {
                return Err(BackendError::Native("tunnel is not running".into()));
            }
            state.running = None;
        }
        info!("Simulated tunnel `{}` down", identity.name());
        self.schedule_report(self.shared.settings.vocabulary.down());
        Ok(())
    }

    async fn is_running(&self, identity: &TunnelIdentity) -> Result<bool, BackendError> {
        Ok(lock(&self.shared.state).running.as_deref() == Some(identity.name()))
    }

    async fn transfer_stats(&self, identity: &TunnelIdentity) -> Result<TransferStats, BackendError> {
        let mut state = lock(&self.shared.state);
        if state.running.as_deref() != Some(identity.name()) {
            return Err(BackendError::Native("tunnel is not running".into()));
        }
        let mut rng = rand::thread_rng();
        state.traffic.rx_bytes += rng.gen_range(16_384..65_536);
        state.traffic.tx_bytes += rng.gen_range(4_096..16_384);
        Ok(state.traffic)
    }
}

/// Simulated consent authority
pub struct SimulatedAuthority {
    consent: Consent,
    pending: Mutex<Option<PermissionPrompt>>,
    prepares: AtomicUsize,
}

impl SimulatedAuthority {
    pub fn new(consent: Consent) -> Self {
        Self {
            consent,
            pending: Mutex::new(None),
            prepares: AtomicUsize::new(0),
        }
    }

    /// Sequence of the prompt waiting for an answer
    pub fn pending(&self) -> Option<u64> {
        lock(&self.pending).as_ref().map(PermissionPrompt::sequence)
    }

    /// Answer the open prompt as the user
    ///
    /// Returns `false` when no prompt is open or the answer was discarded.
    pub fn answer(&self, granted: bool) -> bool {
        let prompt = lock(&self.pending).take();
        prompt.is_some_and(|prompt| prompt.respond(granted))
    }

    /// Platform pre-checks performed so far
    pub fn prepares(&self) -> usize {
        self.prepares.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Authority for SimulatedAuthority {
    async fn prepare(&self) -> Result<Preflight, AuthorityError> {
        self.prepares.fetch_add(1, Ordering::SeqCst);
        Ok(match self.consent {
            Consent::Granted => Preflight::NotRequired,
            _ => Preflight::Required,
        })
    }

    async fn present(&self, prompt: PermissionPrompt) -> Result<(), AuthorityError> {
        match self.consent {
            Consent::AutoGrant => {
                prompt.grant();
            }
            Consent::AutoDeny => {
                prompt.deny();
            }
            Consent::Prompt | Consent::Granted => {
                info!("VPN permission prompt #{} is open", prompt.sequence());
                *lock(&self.pending) = Some(prompt);
            }
        }
        Ok(())
    }
}
