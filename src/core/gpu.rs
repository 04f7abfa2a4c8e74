//! GPU tier selection and the resource limits each tier implies.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GpuType {
    #[default]
    NvidiaTeslaT4,
    NvidiaTeslaA100,
}

/// Container resource limits applied to a stage running on a given GPU tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageLimits {
    pub memory_limit: &'static str,
    pub cpu_limit: &'static str,
    pub gpu_limit: &'static str,
    pub gpu_type: &'static str,
}

const A100_LIMITS: StageLimits = StageLimits {
    memory_limit: "85",
    cpu_limit: "12",
    gpu_limit: "1",
    gpu_type: "nvidia-tesla-a100",
};

impl GpuType {
    pub const ALL: [GpuType; 2] = [GpuType::NvidiaTeslaT4, GpuType::NvidiaTeslaA100];

    pub fn as_str(&self) -> &'static str {
        match self {
            GpuType::NvidiaTeslaT4 => "nvidia-tesla-t4",
            GpuType::NvidiaTeslaA100 => "nvidia-tesla-a100",
        }
    }

    /// Limits for the higher tier only. The lower tier sets nothing.
    pub fn stage_limits(&self) -> Option<StageLimits> {
        match self {
            GpuType::NvidiaTeslaA100 => Some(A100_LIMITS),
            GpuType::NvidiaTeslaT4 => None,
        }
    }

    pub fn parse_field(value: &str, field: &str) -> Result<Self> {
        value.parse().map_err(|_| {
            Error::validation_invalid_argument(
                field,
                format!("Unsupported GPU type '{}'", value),
                Some(value.to_string()),
                Some(GpuType::ALL.iter().map(|g| g.as_str().to_string()).collect()),
            )
        })
    }
}

impl FromStr for GpuType {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        GpuType::ALL
            .iter()
            .copied()
            .find(|g| g.as_str() == s.trim())
            .ok_or(())
    }
}

impl fmt::Display for GpuType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
