//! Canonical tunnel state
//!
//! The one status vocabulary the controller exposes, whatever native VPN
//! facility carries the traffic.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Canonical tunnel state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalState {
    /// No lifecycle operation has run yet
    #[default]
    NoConnection,
    /// Start accepted, configuration being prepared
    Preparing,
    /// Bring-up requested, waiting for the native subsystem
    Connecting,
    /// Tunnel is up
    Connected,
    /// Tear-down requested, waiting for the native subsystem
    Disconnecting,
    /// Tunnel is down
    Disconnected,
    /// Native subsystem is between states
    WaitConnection,
    /// Native subsystem is re-establishing the session
    Reasserting,
    /// Native profile is unusable
    Invalid,
}

impl CanonicalState {
    /// Every state, in declaration order
    pub fn all() -> &'static [CanonicalState] {
        &[
            CanonicalState::NoConnection,
            CanonicalState::Preparing,
            CanonicalState::Connecting,
            CanonicalState::Connected,
            CanonicalState::Disconnecting,
            CanonicalState::Disconnected,
            CanonicalState::WaitConnection,
            CanonicalState::Reasserting,
            CanonicalState::Invalid,
        ]
    }

    /// Lower-case label sent on the event stream
    pub fn label(&self) -> &'static str {
        match self {
            CanonicalState::NoConnection => "no_connection",
            CanonicalState::Preparing => "preparing",
            CanonicalState::Connecting => "connecting",
            CanonicalState::Connected => "connected",
            CanonicalState::Disconnecting => "disconnecting",
            CanonicalState::Disconnected => "disconnected",
            CanonicalState::WaitConnection => "wait_connection",
            CanonicalState::Reasserting => "reasserting",
            CanonicalState::Invalid => "invalid",
        }
    }

    /// Asserted by the controller while an operation is in flight
    pub fn is_optimistic(&self) -> bool {
        matches!(
            self,
            CanonicalState::Preparing | CanonicalState::Connecting | CanonicalState::Disconnecting
        )
    }

    /// A tunnel exists, or is being brought up or down
    pub fn is_active(&self) -> bool {
        !matches!(
            self,
            CanonicalState::NoConnection | CanonicalState::Disconnected | CanonicalState::Invalid
        )
    }
}

impl fmt::Display for CanonicalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for CanonicalState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CanonicalState::all()
            .iter()
            .copied()
            .find(|state| state.label().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownState(s.to_string()))
    }
}

/// Label that names no canonical state
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown tunnel state `{0}`")]
pub struct UnknownState(pub String);
