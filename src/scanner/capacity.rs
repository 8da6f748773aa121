use crate::error::ScanError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use sysinfo::Disks;
use tracing::debug;

/// Capacity snapshot of the volume holding a path. `used` is `total - free`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskCapacity {
    pub total: u64,
    pub used: u64,
    pub free: u64,
}

impl DiskCapacity {
    pub fn from_total_and_free(total: u64, free: u64) -> Self {
        Self {
            total,
            used: total.saturating_sub(free),
            free,
        }
    }
}

pub trait CapacitySource: Send + Sync {
    fn snapshot(&self, path: &Path) -> Result<DiskCapacity, ScanError>;
}

/// Reads capacity from the mounted disk whose mount point is the longest prefix of the path.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCapacity;

impl SystemCapacity {
    pub fn new() -> Self {
        Self
    }
}

impl CapacitySource for SystemCapacity {
    fn snapshot(&self, path: &Path) -> Result<DiskCapacity, ScanError> {
        let disks = Disks::new_with_refreshed_list();
        let disk = disks
            .iter()
            .filter(|d| path.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().as_os_str().len())
            .ok_or_else(|| {
                ScanError::Capacity(format!("no mounted volume contains {}", path.display()))
            })?;

        if disk.total_space() == 0 {
            return Err(ScanError::Capacity(format!(
                "{} reports zero capacity",
                disk.mount_point().display()
            )));
        }

        debug!(
            "capacity of {}: total {} available {}",
            disk.mount_point().display(),
            disk.total_space(),
            disk.available_space()
        );
        Ok(DiskCapacity::from_total_and_free(
            disk.total_space(),
            disk.available_space(),
        ))
    }
}

/// Returns a preset answer; used when the real volume is irrelevant.
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct FixedCapacity(pub Option<DiskCapacity>);

#[cfg(test)]
impl CapacitySource for FixedCapacity {
    fn snapshot(&self, _path: &Path) -> Result<DiskCapacity, ScanError> {
        self.0
            .ok_or_else(|| ScanError::Capacity("capacity unavailable".to_string()))
    }
}
