//! wgctl tunnel - Single-tunnel WireGuard lifecycle controller
//!
//! Drives one named WireGuard tunnel through a platform VPN facility and
//! reports its state in a single canonical vocabulary, whatever the
//! facility speaks natively.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      TunnelController                        │
//! │                                                              │
//! │  initialize ──▶ PermissionGate ──▶ Authority (consent UI)    │
//! │                                                              │
//! │  start ──▶ TunnelConfig::parse ──▶ BackendHandle ──┐         │
//! │  stop  ─────────────────────────▶ (created once)   │         │
//! │                                                    ▼         │
//! │                                         ┌─────────────────┐  │
//! │  StatusBroadcaster ◀── translate ◀──────│  TunnelBackend  │  │
//! │        │                 (native status) │ (NE / Go / SCM) │  │
//! │        ▼                                 └─────────────────┘  │
//! │  subscribers: connecting, connected, disconnected ...        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Features
//!
//! - **wg-quick parsing**: strict validation with line-numbered errors
//! - **Serialized lifecycle**: one start or stop at a time, never queued
//! - **Native-first state**: platform callbacks override optimistic states
//! - **Replaying observers**: new subscribers see the present state at once
//!
//! # Platforms
//!
//! | Facility | Status vocabulary |
//! |----------|-------------------|
//! | Network extension | `NeVpnStatus` (0-5) |
//! | Userspace Go backend | `GoTunnelState` (DOWN / TOGGLE / UP) |
//! | OS service manager | `ServiceState` (1-7) |

mod backend;
mod broadcast;
mod config;
mod controller;
mod identity;
mod keys;
mod native;
mod permission;
mod settings;
mod simulated;
mod state;

pub use backend::{
    BackendError, BackendFactory, BackendHandle, BackendUnavailable, NativeEventSender,
    TransferStats, TunnelBackend, TunnelProfile,
};
pub use broadcast::{StatusBroadcaster, StatusSubscription};
pub use config::{
    parse, Endpoint, Host, InterfaceConfig, ParseError, PeerConfig, TunnelConfig, MIN_MTU,
};
pub use controller::{ControllerError, TunnelController};
pub use identity::{validate_name, InvalidName, TunnelIdentity, MAX_NAME_LEN};
pub use keys::{KeyError, KeyPair, PresharedKey, PrivateKey, PublicKey};
pub use native::{translate, GoTunnelState, NativeStatus, NeVpnStatus, ServiceState};
pub use permission::{
    Authority, AuthorityError, AuthorizationStatus, PermissionGate, PermissionPrompt, Preflight,
};
pub use settings::{
    Consent, ControllerSettings, LogSettings, SettingsError, SimulationSettings, TunnelSettings,
    Vocabulary,
};
pub use simulated::{FailPoint, SimulatedAuthority, SimulatedBackend};
pub use state::{CanonicalState, UnknownState};
