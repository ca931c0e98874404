//! Tunnel identity
//!
//! The one named tunnel a process manages.

use std::fmt;

/// Longest accepted tunnel name (interface name limit)
pub const MAX_NAME_LEN: usize = 15;

/// Tunnel name validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidName {
    #[error("tunnel name is empty")]
    Empty,

    #[error("tunnel name is {0} characters long (max 15)")]
    TooLong(usize),

    #[error("tunnel name contains reserved character {0:?}")]
    ReservedCharacter(char),
}

/// Check a tunnel name against interface naming rules
///
/// Names are 1 to 15 characters from `[A-Za-z0-9_=+.-]`.
pub fn validate_name(name: &str) -> Result<(), InvalidName> {
    if name.is_empty() {
        return Err(InvalidName::Empty);
    }
    if let Some(ch) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '=' | '+' | '.' | '-')))
    {
        return Err(InvalidName::ReservedCharacter(ch));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(InvalidName::TooLong(name.len()));
    }
    Ok(())
}

/// Name and provider reference of the managed tunnel
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TunnelIdentity {
    name: String,
    provider: String,
}

impl TunnelIdentity {
    pub fn new(name: &str, provider: &str) -> Result<Self, InvalidName> {
        validate_name(name)?;
        Ok(Self {
            name: name.to_string(),
            provider: provider.to_string(),
        })
    }

    /// Tunnel name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Platform provider reference (bundle or package identifier)
    pub fn provider(&self) -> &str {
        &self.provider
    }
}

impl fmt::Display for TunnelIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.provider)
    }
}
