// Normalized per-container resource reading

use serde::{Deserialize, Serialize};

/// One container's resources at the time of its latest successful stats fetch.
/// Field names are the wire names (`cpu_pct`, `mem_bytes`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSample {
    pub id: String,
    pub name: String,
    /// Always within `[0, 100]`.
    pub cpu_pct: f64,
    pub mem_bytes: u64,
    pub mem_limit_bytes: u64,
    /// Received + transmitted bytes summed over every interface.
    pub net_io_bytes: u64,
}

/// Clamp a percentage into `[0, 100]`; NaN reads as 0.
pub fn clamp_pct(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}
