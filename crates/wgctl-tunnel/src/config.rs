//! Tunnel Configuration
//!
//! Parses wg-quick style text into a validated [`TunnelConfig`] and renders
//! it back. Parsing is all-or-nothing: any malformed line or missing
//! required field rejects the whole text.
//!
//! ```text
//! [Interface]
//! PrivateKey = yAnz5TF+lXXJte14tji3zlMNq+hd2rYUIgJBgB3fBmk=
//! Address = 10.0.0.2/32
//! DNS = 1.1.1.1
//!
//! [Peer]
//! PublicKey = xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=
//! AllowedIPs = 0.0.0.0/0, ::/0
//! Endpoint = vpn.example.com:51820
//! PersistentKeepalive = 25
//! ```

use crate::keys::{KeyError, PresharedKey, PrivateKey, PublicKey};
use ipnet::IpNet;
use std::fmt;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

/// Smallest MTU accepted for the tunnel interface
pub const MIN_MTU: u16 = 576;

/// Interface keys that only drive wg-quick's host scripts. They carry no
/// meaning for a native VPN subsystem and are skipped.
const IGNORED_INTERFACE_KEYS: &[&str] = &[
    "table", "fwmark", "saveconfig", "preup", "postup", "predown", "postdown",
];

/// Endpoint host: literal address or DNS name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Host {
    Ip(IpAddr),
    Domain(String),
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Host::Ip(IpAddr::V6(addr)) => write!(f, "[{}]", addr),
            Host::Ip(addr) => write!(f, "{}", addr),
            Host::Domain(name) => write!(f, "{}", name),
        }
    }
}

/// Peer endpoint (host + UDP port)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: Host,
    pub port: u16,
}

impl Endpoint {
    /// Create a new endpoint
    pub fn new(host: Host, port: u16) -> Self {
        Self { host, port }
    }

    /// Socket address, when the host is a literal IP
    pub fn to_socket_addr(&self) -> Option<SocketAddr> {
        match self.host {
            Host::Ip(addr) => Some(SocketAddr::new(addr, self.port)),
            Host::Domain(_) => None,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = String;

    /// Accepts `host:port`, `a.b.c.d:port` and `[v6]:port`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (addr, tail) = rest.split_once(']')
                .ok_or_else(|| "unterminated IPv6 bracket".to_string())?;
            let addr: Ipv6Addr = addr.parse()
                .map_err(|_| format!("`{}` is not an IPv6 address", addr))?;
            let port = tail.strip_prefix(':')
                .ok_or_else(|| "missing port".to_string())?;
            (Host::Ip(IpAddr::V6(addr)), port)
        } else {
            let (host, port) = s.rsplit_once(':')
                .ok_or_else(|| "missing port".to_string())?;
            if host.contains(':') {
                return Err("IPv6 hosts must be enclosed in brackets".to_string());
            }
            let host = match host.parse::<IpAddr>() {
                Ok(addr) => Host::Ip(addr),
                Err(_) if is_domain_name(host) => Host::Domain(host.to_ascii_lowercase()),
                Err(_) => return Err(format!("`{}` is not a valid host", host)),
            };
            (host, port)
        };

        let port: u16 = port.parse()
            .map_err(|_| format!("`{}` is not a valid port", port))?;
        if port == 0 {
            return Err("port must be non-zero".to_string());
        }

        Ok(Self { host, port })
    }
}

/// `[Interface]` section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceConfig {
    /// Our private key
    pub private_key: PrivateKey,
    /// Addresses assigned to the tunnel interface
    pub addresses: Vec<IpNet>,
    /// UDP listen port (random when absent)
    pub listen_port: Option<u16>,
    /// DNS servers used inside the tunnel
    pub dns_servers: Vec<IpAddr>,
    /// DNS search domains
    pub dns_search: Vec<String>,
    /// Interface MTU
    pub mtu: Option<u16>,
}

/// `[Peer]` section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConfig {
    /// Peer's public key
    pub public_key: PublicKey,
    /// Preshared key (optional, for post-quantum resistance)
    pub preshared_key: Option<PresharedKey>,
    /// Ranges routed through this peer
    pub allowed_ips: Vec<IpNet>,
    /// Peer's endpoint
    pub endpoint: Option<Endpoint>,
    /// Persistent keepalive interval (seconds)
    pub persistent_keepalive: Option<u16>,
}

/// Complete, validated tunnel configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelConfig {
    pub interface: InterfaceConfig,
    /// Peers in the order they appeared
    pub peers: Vec<PeerConfig>,
}

impl TunnelConfig {
    /// Parse wg-quick text
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        Parser::default().run(text)
    }

    /// Address recorded on native profiles as the "server"
    ///
    /// Taken from the first peer that has an endpoint.
    pub fn server_address(&self) -> Option<String> {
        self.peers
            .iter()
            .find_map(|p| p.endpoint.as_ref())
            .map(|e| e.to_string())
    }

    /// Render back to wg-quick text
    pub fn to_wg_quick(&self) -> String {
        self.to_string()
    }
}

impl FromStr for TunnelConfig {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn join<T: fmt::Display>(items: &[T]) -> String {
    items.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(", ")
}

impl fmt::Display for TunnelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let iface = &self.interface;
        writeln!(f, "[Interface]")?;
        writeln!(f, "PrivateKey = {}", iface.private_key.to_base64())?;
        if !iface.addresses.is_empty() {
            writeln!(f, "Address = {}", join(&iface.addresses))?;
        }
        if let Some(port) = iface.listen_port {
            writeln!(f, "ListenPort = {}", port)?;
        }
        if !iface.dns_servers.is_empty() || !iface.dns_search.is_empty() {
            let mut dns: Vec<String> = iface.dns_servers.iter().map(|d| d.to_string()).collect();
            dns.extend(iface.dns_search.iter().cloned());
            writeln!(f, "DNS = {}", dns.join(", "))?;
        }
        if let Some(mtu) = iface.mtu {
            writeln!(f, "MTU = {}", mtu)?;
        }

        for peer in &self.peers {
            writeln!(f)?;
            writeln!(f, "[Peer]")?;
            writeln!(f, "PublicKey = {}", peer.public_key)?;
            if let Some(psk) = &peer.preshared_key {
                writeln!(f, "PresharedKey = {}", psk.to_base64())?;
            }
            if !peer.allowed_ips.is_empty() {
                writeln!(f, "AllowedIPs = {}", join(&peer.allowed_ips))?;
            }
            if let Some(endpoint) = &peer.endpoint {
                writeln!(f, "Endpoint = {}", endpoint)?;
            }
            if let Some(keepalive) = peer.persistent_keepalive {
                writeln!(f, "PersistentKeepalive = {}", keepalive)?;
            }
        }
        Ok(())
    }
}

/// Parse wg-quick text into a [`TunnelConfig`]
pub fn parse(text: &str) -> Result<TunnelConfig, ParseError> {
    TunnelConfig::parse(text)
}

/// Configuration parse errors
///
/// Every variant names the offending line or field.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("line {line}: expected `Key = Value`")]
    MalformedLine { line: usize },

    #[error("line {line}: unknown section [{name}]")]
    UnknownSection { line: usize, name: String },

    #[error("line {line}: `{key}` appears outside of any section")]
    OrphanKey { line: usize, key: String },

    #[error("line {line}: unknown key `{key}` in [{section}]")]
    UnknownKey { line: usize, section: &'static str, key: String },

    #[error("line {line}: `{key}` given more than once")]
    DuplicateKey { line: usize, key: String },

    #[error("line {line}: `{key}` has an empty value")]
    EmptyValue { line: usize, key: String },

    #[error("line {line}: invalid {field}: {reason}")]
    InvalidValue { line: usize, field: &'static str, reason: String },

    #[error("line {line}: more than one [Interface] section")]
    DuplicateInterface { line: usize },

    #[error("missing [Interface] section")]
    MissingInterface,

    #[error("missing {field} in [{section}]")]
    MissingField { section: &'static str, field: &'static str },

    #[error("configuration has no [Peer] section")]
    NoPeers,
}

impl ParseError {
    fn invalid(line: usize, field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue { line, field, reason: reason.into() }
    }

    fn bad_key(line: usize, field: &'static str, err: KeyError) -> Self {
        Self::invalid(line, field, err.to_string())
    }
}

#[derive(Default)]
struct InterfaceDraft {
    private_key: Option<PrivateKey>,
    addresses: Vec<IpNet>,
    listen_port: Option<u16>,
    dns_servers: Vec<IpAddr>,
    dns_search: Vec<String>,
    mtu: Option<u16>,
}

#[derive(Default)]
struct PeerDraft {
    public_key: Option<PublicKey>,
    preshared_key: Option<PresharedKey>,
    allowed_ips: Vec<IpNet>,
    endpoint: Option<Endpoint>,
    persistent_keepalive: Option<Option<u16>>,
}

#[derive(Clone, Copy)]
enum Section {
    Interface,
    Peer,
}

#[derive(Default)]
struct Parser {
    interface: Option<InterfaceDraft>,
    peers: Vec<PeerDraft>,
    section: Option<Section>,
}

impl Parser {
    fn run(mut self, text: &str) -> Result<TunnelConfig, ParseError> {
        for (idx, raw) in text.lines().enumerate() {
            let line = idx + 1;
            let content = raw.split('#').next().unwrap_or("").trim();
            if content.is_empty() {
                continue;
            }

            if let Some(name) = content.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
                self.open_section(line, name.trim())?;
                continue;
            }

            let (key, value) = content.split_once('=')
                .ok_or(ParseError::MalformedLine { line })?;
            let (key, value) = (key.trim(), value.trim());
            if key.is_empty() {
                return Err(ParseError::MalformedLine { line });
            }
            if value.is_empty() {
                return Err(ParseError::EmptyValue { line, key: key.to_string() });
            }

            match self.section {
                None => return Err(ParseError::OrphanKey { line, key: key.to_string() }),
                Some(Section::Interface) => self.interface_key(line, key, value)?,
                Some(Section::Peer) => self.peer_key(line, key, value)?,
            }
        }

        self.finish()
    }

    fn open_section(&mut self, line: usize, name: &str) -> Result<(), ParseError> {
        if name.eq_ignore_ascii_case("interface") {
            if self.interface.is_some() {
                return Err(ParseError::DuplicateInterface { line });
            }
            self.interface = Some(InterfaceDraft::default());
            self.section = Some(Section::Interface);
        } else if name.eq_ignore_ascii_case("peer") {
            self.peers.push(PeerDraft::default());
            self.section = Some(Section::Peer);
        } else {
            return Err(ParseError::UnknownSection { line, name: name.to_string() });
        }
        Ok(())
    }

    fn interface_key(&mut self, line: usize, key: &str, value: &str) -> Result<(), ParseError> {
        let Some(iface) = self.interface.as_mut() else {
            return Err(ParseError::OrphanKey { line, key: key.to_string() });
        };
        let duplicate = || ParseError::DuplicateKey { line, key: key.to_string() };

        match key.to_ascii_lowercase().as_str() {
            "privatekey" => {
                if iface.private_key.is_some() {
                    return Err(duplicate());
                }
                let private_key = PrivateKey::from_base64(value)
                    .map_err(|e| ParseError::bad_key(line, "PrivateKey", e))?;
                iface.private_key = Some(private_key);
            }
            "address" => {
                for item in split_list(line, "Address", value)? {
                    iface.addresses.push(parse_net(line, "Address", item)?);
                }
            }
            "listenport" => {
                if iface.listen_port.is_some() {
                    return Err(duplicate());
                }
                let port = value.parse::<u16>()
                    .map_err(|_| ParseError::invalid(line, "ListenPort", format!("`{}` is not a port number", value)))?;
                iface.listen_port = Some(port);
            }
            "dns" => {
                for item in split_list(line, "DNS", value)? {
                    match item.parse::<IpAddr>() {
                        Ok(addr) => iface.dns_servers.push(addr),
                        Err(_) if is_domain_name(item) => iface.dns_search.push(item.to_string()),
                        Err(_) => {
                            return Err(ParseError::invalid(line, "DNS", format!("`{}` is neither an address nor a domain", item)));
                        }
                    }
                }
            }
            "mtu" => {
                if iface.mtu.is_some() {
                    return Err(duplicate());
                }
                let mtu = value.parse::<u16>()
                    .ok()
                    .filter(|m| *m >= MIN_MTU)
                    .ok_or_else(|| ParseError::invalid(line, "MTU", format!("`{}` is not in {}..=65535", value, MIN_MTU)))?;
                iface.mtu = Some(mtu);
            }
            other if IGNORED_INTERFACE_KEYS.contains(&other) => {}
            _ => {
                return Err(ParseError::UnknownKey { line, section: "Interface", key: key.to_string() });
            }
        }
        Ok(())
    }

    fn peer_key(&mut self, line: usize, key: &str, value: &str) -> Result<(), ParseError> {
        let Some(peer) = self.peers.last_mut() else {
            return Err(ParseError::OrphanKey { line, key: key.to_string() });
        };
        let duplicate = || ParseError::DuplicateKey { line, key: key.to_string() };

        match key.to_ascii_lowercase().as_str() {
            "publickey" => {
                if peer.public_key.is_some() {
                    return Err(duplicate());
                }
                let public_key = PublicKey::from_base64(value)
                    .map_err(|e| ParseError::bad_key(line, "PublicKey", e))?;
                peer.public_key = Some(public_key);
            }
            "presharedkey" => {
                if peer.preshared_key.is_some() {
                    return Err(duplicate());
                }
                let psk = PresharedKey::from_base64(value)
                    .map_err(|e| ParseError::bad_key(line, "PresharedKey", e))?;
                peer.preshared_key = Some(psk);
            }
            "allowedips" => {
                for item in split_list(line, "AllowedIPs", value)? {
                    peer.allowed_ips.push(parse_net(line, "AllowedIPs", item)?);
                }
            }
            "endpoint" => {
                if peer.endpoint.is_some() {
                    return Err(duplicate());
                }
                let endpoint = value.parse::<Endpoint>()
                    .map_err(|reason| ParseError::invalid(line, "Endpoint", reason))?;
                peer.endpoint = Some(endpoint);
            }
            "persistentkeepalive" => {
                if peer.persistent_keepalive.is_some() {
                    return Err(duplicate());
                }
                let keepalive = if value.eq_ignore_ascii_case("off") {
                    None
                } else {
                    let secs = value.parse::<u16>()
                        .map_err(|_| ParseError::invalid(line, "PersistentKeepalive", format!("`{}` is not a number of seconds", value)))?;
                    (secs != 0).then_some(secs)
                };
                peer.persistent_keepalive = Some(keepalive);
            }
            _ => {
                return Err(ParseError::UnknownKey { line, section: "Peer", key: key.to_string() });
            }
        }
        Ok(())
    }

    fn finish(self) -> Result<TunnelConfig, ParseError> {
        let iface = self.interface.ok_or(ParseError::MissingInterface)?;
        let private_key = iface.private_key.ok_or(ParseError::MissingField {
            section: "Interface",
            field: "PrivateKey",
        })?;

        if self.peers.is_empty() {
            return Err(ParseError::NoPeers);
        }

        let peers = self.peers
            .into_iter()
            .map(|draft| {
                let public_key = draft.public_key.ok_or(ParseError::MissingField {
                    section: "Peer",
                    field: "PublicKey",
                })?;
                Ok(PeerConfig {
                    public_key,
                    preshared_key: draft.preshared_key,
                    allowed_ips: draft.allowed_ips,
                    endpoint: draft.endpoint,
                    persistent_keepalive: draft.persistent_keepalive.flatten(),
                })
            })
            .collect::<Result<Vec<_>, ParseError>>()?;

        Ok(TunnelConfig {
            interface: InterfaceConfig {
                private_key,
                addresses: iface.addresses,
                listen_port: iface.listen_port,
                dns_servers: iface.dns_servers,
                dns_search: iface.dns_search,
                mtu: iface.mtu,
            },
            peers,
        })
    }
}

/// Split a comma separated list, rejecting empty items
fn split_list<'a>(line: usize, field: &'static str, value: &'a str) -> Result<Vec<&'a str>, ParseError> {
    value
        .split(',')
        .map(str::trim)
        .map(|item| {
            if item.is_empty() {
                Err(ParseError::invalid(line, field, "empty list item"))
            } else {
                Ok(item)
            }
        })
        .collect()
}

/// Parse CIDR notation; a bare address becomes a host route
fn parse_net(line: usize, field: &'static str, s: &str) -> Result<IpNet, ParseError> {
    if let Ok(net) = s.parse::<IpNet>() {
        return Ok(net);
    }
    let addr: IpAddr = s.parse()
        .map_err(|_| ParseError::invalid(line, field, format!("`{}` is not an IP range", s)))?;
    let prefix = if addr.is_ipv4() { 32 } else { 128 };
    IpNet::new(addr, prefix)
        .map_err(|e| ParseError::invalid(line, field, e.to_string()))
}

/// RFC 1123 host name check
fn is_domain_name(s: &str) -> bool {
    if s.is_empty() || s.len() > 253 {
        return false;
    }
    s.trim_end_matches('.').split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    }) && !s.chars().all(|c| c.is_ascii_digit() || c == '.')
}
