//! VM power and tools state.

use serde::Serialize;
use std::fmt;
use vix_core::native::{power_state, tools_state};

/// A VM power state bit set (`VIX_PROPERTY_VM_POWER_STATE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct PowerState(pub i32);

const NAMES: [(i32, &str); 11] = [
    (power_state::POWERING_OFF, "powering-off"),
    (power_state::POWERED_OFF, "powered-off"),
    (power_state::POWERING_ON, "powering-on"),
    (power_state::POWERED_ON, "powered-on"),
    (power_state::SUSPENDING, "suspending"),
    (power_state::SUSPENDED, "suspended"),
    (power_state::TOOLS_RUNNING, "tools-running"),
    (power_state::RESETTING, "resetting"),
    (power_state::BLOCKED_ON_MSG, "blocked-on-msg"),
    (power_state::PAUSED, "paused"),
    (power_state::RESUMING, "resuming"),
];

impl PowerState {
    pub const POWERED_OFF: PowerState = PowerState(power_state::POWERED_OFF);
    pub const POWERED_ON: PowerState = PowerState(power_state::POWERED_ON);
    pub const SUSPENDED: PowerState = PowerState(power_state::SUSPENDED);
    pub const PAUSED: PowerState = PowerState(power_state::PAUSED);
    pub const TOOLS_RUNNING: PowerState = PowerState(power_state::TOOLS_RUNNING);

    /// Whether every bit of `other` is set.
    pub fn contains(self, other: PowerState) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_on(self) -> bool {
        self.contains(Self::POWERED_ON)
    }

    /// Names of the set bits, lowest first.
    pub fn names(self) -> Vec<&'static str> {
        NAMES
            .iter()
            .filter(|(bit, _)| self.0 & bit != 0)
            .map(|(_, name)| *name)
            .collect()
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = self.names();
        if names.is_empty() {
            write!(f, "unknown({:#x})", self.0)
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

/// State of VMware Tools in the guest (`VIX_PROPERTY_VM_TOOLS_STATE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolsState {
    Unknown,
    Running,
    NotInstalled,
    Other(i32),
}

impl ToolsState {
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            tools_state::UNKNOWN => ToolsState::Unknown,
            tools_state::RUNNING => ToolsState::Running,
            tools_state::NOT_INSTALLED => ToolsState::NotInstalled,
            other => ToolsState::Other(other),
        }
    }
}

impl fmt::Display for ToolsState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolsState::Unknown => write!(f, "unknown"),
            ToolsState::Running => write!(f, "running"),
            ToolsState::NotInstalled => write!(f, "not-installed"),
            ToolsState::Other(raw) => write!(f, "other({raw})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_state_bits() {
        let state = PowerState(power_state::POWERED_ON | power_state::TOOLS_RUNNING);
        assert!(state.is_on());
        assert!(state.contains(PowerState::TOOLS_RUNNING));
        assert!(!state.contains(PowerState::PAUSED));
        assert_eq!(state.to_string(), "powered-on|tools-running");
    }

    #[test]
    fn test_power_state_unknown_display() {
        assert_eq!(PowerState(0).to_string(), "unknown(0x0)");
    }

    #[test]
    fn test_tools_state_from_raw() {
        assert_eq!(ToolsState::from_raw(2), ToolsState::Running);
        assert_eq!(ToolsState::from_raw(99), ToolsState::Other(99));
        assert_eq!(ToolsState::NotInstalled.to_string(), "not-installed");
    }
}
