//! User-visible proxy indicator.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::model::ProxyMode;

const ICON_SIZES: [u32; 3] = [16, 48, 128];

/// What the indicator shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorStatus {
    On,
    #[default]
    Off,
}

impl IndicatorStatus {
    pub fn from_mode(mode: ProxyMode) -> Self {
        match mode {
            ProxyMode::Proxied => Self::On,
            ProxyMode::Direct => Self::Off,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::On => "ON",
            Self::Off => "OFF",
        }
    }

    /// Returns the tooltip text for this status.
    pub fn tooltip(&self) -> &'static str {
        match self {
            Self::On => "SocksGate - Proxy On",
            Self::Off => "SocksGate - Proxy Off",
        }
    }

    pub fn is_on(&self) -> bool {
        matches!(self, Self::On)
    }

    /// Icon paths, smallest first.
    pub fn icon_paths(&self) -> Vec<String> {
        let suffix = match self {
            Self::On => "",
            Self::Off => "_off",
        };
        ICON_SIZES
            .iter()
            .map(|size| format!("icons/icon{}{}.png", size, suffix))
            .collect()
    }
}

impl From<ProxyMode> for IndicatorStatus {
    fn from(mode: ProxyMode) -> Self {
        Self::from_mode(mode)
    }
}

impl std::fmt::Display for IndicatorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Something that displays the proxy status to the user.
pub trait Indicator: Send + Sync {
    /// Shows `status`. Failures are reported, never fatal.
    fn set(&self, status: IndicatorStatus) -> Result<(), String>;

    /// What is currently shown.
    fn current(&self) -> IndicatorStatus;
}

/// Indicator that keeps the status in memory for the API and logs changes.
#[derive(Debug, Clone, Default)]
pub struct SharedIndicator {
    status: Arc<RwLock<IndicatorStatus>>,
}

impl SharedIndicator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Indicator for SharedIndicator {
    fn set(&self, status: IndicatorStatus) -> Result<(), String> {
        let previous = std::mem::replace(&mut *self.status.write(), status);
        if previous != status {
            tracing::info!(badge = status.as_str(), tooltip = status.tooltip(), "Indicator updated");
        }
        Ok(())
    }

    fn current(&self) -> IndicatorStatus {
        *self.status.read()
    }
}
