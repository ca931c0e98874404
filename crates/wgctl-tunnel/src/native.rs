//! Native status vocabularies and their translation
//!
//! Each native VPN facility reports tunnel status in its own terms. Every
//! vocabulary gets one total mapping onto [`CanonicalState`]; codes the
//! mapping does not know degrade to `Disconnected` so an update is never
//! dropped. Native types never travel past [`translate`].

use crate::state::CanonicalState;
use std::fmt;

/// Session status of a network-extension style VPN connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NeVpnStatus {
    Invalid,
    Disconnected,
    Connecting,
    Connected,
    Reasserting,
    Disconnecting,
    /// Code added by a newer platform release
    Unknown(i64),
}

impl NeVpnStatus {
    /// Convert the platform's raw enumeration value
    pub fn from_raw(code: i64) -> Self {
        match code {
            0 => NeVpnStatus::Invalid,
            1 => NeVpnStatus::Disconnected,
            2 => NeVpnStatus::Connecting,
            3 => NeVpnStatus::Connected,
            4 => NeVpnStatus::Reasserting,
            5 => NeVpnStatus::Disconnecting,
            other => NeVpnStatus::Unknown(other),
        }
    }

    pub fn to_canonical(self) -> CanonicalState {
        match self {
            NeVpnStatus::Invalid => CanonicalState::Invalid,
            NeVpnStatus::Disconnected => CanonicalState::Disconnected,
            NeVpnStatus::Connecting => CanonicalState::Connecting,
            NeVpnStatus::Connected => CanonicalState::Connected,
            NeVpnStatus::Reasserting => CanonicalState::Reasserting,
            NeVpnStatus::Disconnecting => CanonicalState::Disconnecting,
            NeVpnStatus::Unknown(_) => CanonicalState::Disconnected,
        }
    }
}

/// Tunnel state reported by a userspace WireGuard backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GoTunnelState {
    Down,
    Toggle,
    Up,
    /// Ordinal added by a newer backend release
    Unknown(u32),
}

impl GoTunnelState {
    /// Convert the backend's enum ordinal
    pub fn from_raw(ordinal: u32) -> Self {
        match ordinal {
            0 => GoTunnelState::Down,
            1 => GoTunnelState::Toggle,
            2 => GoTunnelState::Up,
            other => GoTunnelState::Unknown(other),
        }
    }

    /// Convert the backend's enum name (`UP`, `DOWN`, `TOGGLE`)
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "DOWN" => GoTunnelState::Down,
            "TOGGLE" => GoTunnelState::Toggle,
            "UP" => GoTunnelState::Up,
            _ => GoTunnelState::Unknown(u32::MAX),
        }
    }

    pub fn to_canonical(self) -> CanonicalState {
        match self {
            GoTunnelState::Up => CanonicalState::Connected,
            GoTunnelState::Down => CanonicalState::Disconnected,
            GoTunnelState::Toggle => CanonicalState::WaitConnection,
            GoTunnelState::Unknown(_) => CanonicalState::Disconnected,
        }
    }
}

/// Current state of a tunnel hosted as an OS service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceState {
    Stopped,
    StartPending,
    StopPending,
    Running,
    ContinuePending,
    PausePending,
    Paused,
    Unknown(u32),
}

impl ServiceState {
    /// Convert a service manager `dwCurrentState` value
    pub fn from_raw(code: u32) -> Self {
        match code {
            1 => ServiceState::Stopped,
            2 => ServiceState::StartPending,
            3 => ServiceState::StopPending,
            4 => ServiceState::Running,
            5 => ServiceState::ContinuePending,
            6 => ServiceState::PausePending,
            7 => ServiceState::Paused,
            other => ServiceState::Unknown(other),
        }
    }

    pub fn to_canonical(self) -> CanonicalState {
        match self {
            ServiceState::Stopped | ServiceState::Paused => CanonicalState::Disconnected,
            ServiceState::StopPending | ServiceState::PausePending => CanonicalState::Disconnecting,
            ServiceState::StartPending => CanonicalState::Connecting,
            ServiceState::Running => CanonicalState::Connected,
            ServiceState::ContinuePending => CanonicalState::Reasserting,
            ServiceState::Unknown(_) => CanonicalState::Disconnected,
        }
    }
}

/// A status notification from any native facility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeStatus {
    NetworkExtension(NeVpnStatus),
    GoBackend(GoTunnelState),
    ServiceManager(ServiceState),
}

impl fmt::Display for NativeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeStatus::NetworkExtension(s) => write!(f, "network-extension:{:?}", s),
            NativeStatus::GoBackend(s) => write!(f, "go-backend:{:?}", s),
            NativeStatus::ServiceManager(s) => write!(f, "service:{:?}", s),
        }
    }
}

impl From<NeVpnStatus> for NativeStatus {
    fn from(s: NeVpnStatus) -> Self {
        NativeStatus::NetworkExtension(s)
    }
}

impl From<GoTunnelState> for NativeStatus {
    fn from(s: GoTunnelState) -> Self {
        NativeStatus::GoBackend(s)
    }
}

impl From<ServiceState> for NativeStatus {
    fn from(s: ServiceState) -> Self {
        NativeStatus::ServiceManager(s)
    }
}

/// Map a native status onto the canonical vocabulary
pub fn translate(status: NativeStatus) -> CanonicalState {
    match status {
        NativeStatus::NetworkExtension(s) => s.to_canonical(),
        NativeStatus::GoBackend(s) => s.to_canonical(),
        NativeStatus::ServiceManager(s) => s.to_canonical(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_extension_table() {
        let expected = [
            CanonicalState::Invalid,
            CanonicalState::Disconnected,
            CanonicalState::Connecting,
            CanonicalState::Connected,
            CanonicalState::Reasserting,
            CanonicalState::Disconnecting,
        ];
        for (code, state) in expected.iter().enumerate() {
            assert_eq!(translate(NeVpnStatus::from_raw(code as i64).into()), *state);
        }
    }

    #[test]
    fn test_go_backend_table() {
        assert_eq!(translate(GoTunnelState::Up.into()), CanonicalState::Connected);
        assert_eq!(translate(GoTunnelState::Down.into()), CanonicalState::Disconnected);
        assert_eq!(translate(GoTunnelState::Toggle.into()), CanonicalState::WaitConnection);
        assert_eq!(GoTunnelState::from_name("up"), GoTunnelState::Up);
    }

    #[test]
    fn test_service_table() {
        assert_eq!(translate(ServiceState::from_raw(1).into()), CanonicalState::Disconnected);
        assert_eq!(translate(ServiceState::from_raw(2).into()), CanonicalState::Connecting);
        assert_eq!(translate(ServiceState::from_raw(3).into()), CanonicalState::Disconnecting);
        assert_eq!(translate(ServiceState::from_raw(4).into()), CanonicalState::Connected);
        assert_eq!(translate(ServiceState::from_raw(5).into()), CanonicalState::Reasserting);
        assert_eq!(translate(ServiceState::from_raw(6).into()), CanonicalState::Disconnecting);
        assert_eq!(translate(ServiceState::from_raw(7).into()), CanonicalState::Disconnected);
    }

    #[test]
    fn test_unknown_values_fail_safe() {
        assert_eq!(translate(NeVpnStatus::from_raw(42).into()), CanonicalState::Disconnected);
        assert_eq!(translate(NeVpnStatus::from_raw(-1).into()), CanonicalState::Disconnected);
        assert_eq!(translate(GoTunnelState::from_raw(9).into()), CanonicalState::Disconnected);
        assert_eq!(translate(GoTunnelState::from_name("SIDEWAYS").into()), CanonicalState::Disconnected);
        assert_eq!(translate(ServiceState::from_raw(0).into()), CanonicalState::Disconnected);
        assert_eq!(translate(ServiceState::from_raw(u32::MAX).into()), CanonicalState::Disconnected);
    }
}
