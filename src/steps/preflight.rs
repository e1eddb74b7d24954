// file: src/steps/preflight.rs
// version: 1.0.0
// guid: pf000001-2345-6789-abcd-ef0123456789

//! Pre-flight disk validation.
//!
//! Selection is a pure function over a device list so it can be driven
//! by synthetic inventories; probing the live system is a thin wrapper
//! around `lsblk`. Nothing here mutates the machine.

use crate::config::{DiskSettings, PathSettings};
use crate::error::ProvisionError;
use crate::system::CommandExecutor;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const KIB: u64 = 1024;
const MIB: u64 = KIB * 1024;
const GIB: u64 = MIB * 1024;
const TIB: u64 = GIB * 1024;
const SECTOR: u64 = 512;

/// Command used to enumerate whole disks in bytes
pub const LSBLK_COMMAND: &str = "lsblk -J -b -d -o NAME,PATH,SIZE,TYPE,MODEL";

/// Fallback enumeration, one `/sys/block/<name>/size:<sectors>` line per device
pub const SYSFS_COMMAND: &str = "grep -H . /sys/block/*/size";

/// Kernel block devices that never back a physical disk
const VIRTUAL_DEVICE_PREFIXES: &[&str] = &["loop", "ram", "zram", "sr", "dm-", "md", "nbd"];

/// A size normalized to bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ByteSize(pub u64);

impl ByteSize {
    pub fn from_gib(gib: u64) -> Self {
        Self(gib.saturating_mul(GIB))
    }

    pub fn from_sectors(sectors: u64) -> Self {
        Self(sectors.saturating_mul(SECTOR))
    }

    pub fn bytes(&self) -> u64 {
        self.0
    }

    pub fn saturating_sub(self, other: ByteSize) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    /// Parse sizes as reported by the various enumeration tools.
    ///
    /// Bare integers are bytes; `K/M/G/T` suffixes (with optional `B` or
    /// `iB`) are binary multiples, matching lsblk's human output.
    pub fn parse(raw: &str) -> Result<Self> {
        let text = raw.trim();
        if text.is_empty() {
            return Err(ProvisionError::disk("Empty size value"));
        }

        let split = text
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(text.len());
        let (number, unit) = text.split_at(split);

        let multiplier = match unit.trim().to_ascii_uppercase().as_str() {
            "" | "B" => 1,
            "K" | "KB" | "KIB" => KIB,
            "M" | "MB" | "MIB" => MIB,
            "G" | "GB" | "GIB" => GIB,
            "T" | "TB" | "TIB" => TIB,
            "S" | "SECTORS" => SECTOR,
            other => {
                return Err(ProvisionError::disk(format!(
                    "Unknown size unit '{}' in '{}'",
                    other, raw
                )))
            }
        };

        if number.contains('.') {
            let value: f64 = number
                .parse()
                .map_err(|_| ProvisionError::disk(format!("Invalid size value: {}", raw)))?;
            Ok(Self((value * multiplier as f64).round() as u64))
        } else {
            let value: u64 = number
                .parse()
                .map_err(|_| ProvisionError::disk(format!("Invalid size value: {}", raw)))?;
            Ok(Self(value.saturating_mul(multiplier)))
        }
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0;
        if bytes >= TIB {
            write!(f, "{:.1} TiB", bytes as f64 / TIB as f64)
        } else if bytes >= GIB {
            if bytes % GIB == 0 {
                write!(f, "{} GiB", bytes / GIB)
            } else {
                write!(f, "{:.1} GiB", bytes as f64 / GIB as f64)
            }
        } else if bytes >= MIB {
            write!(f, "{:.1} MiB", bytes as f64 / MIB as f64)
        } else {
            write!(f, "{} B", bytes)
        }
    }
}

/// A block device as enumerated on the target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockDevice {
    pub path: PathBuf,
    pub size: ByteSize,
    pub device_type: String,
    pub model: Option<String>,
}

impl BlockDevice {
    pub fn disk(path: impl Into<PathBuf>, size: ByteSize) -> Self {
        Self {
            path: path.into(),
            size,
            device_type: "disk".to_string(),
            model: None,
        }
    }
}

/// One planned partition of the target disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionPlan {
    pub mount_point: PathBuf,
    pub size: ByteSize,
    pub min_size: ByteSize,
    pub fs_type: String,
}

/// The validated target disk and its planned layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetDisk {
    pub device: PathBuf,
    pub capacity: ByteSize,
    pub layout: Vec<PartitionPlan>,
}

impl TargetDisk {
    /// Size planned for the data partition
    pub fn data_partition_size(&self) -> ByteSize {
        self.layout
            .last()
            .map(|p| p.size)
            .unwrap_or(ByteSize(0))
    }
}

/// What the selected disk must satisfy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskRequirements {
    pub min_data: ByteSize,
    pub reserved_system: ByteSize,
    pub system_fs_type: String,
    pub data_fs_type: String,
    pub data_mount: PathBuf,
    pub device_types: Vec<String>,
}

impl DiskRequirements {
    pub fn from_settings(disk: &DiskSettings, paths: &PathSettings) -> Self {
        let data_mount = paths
            .data_dir
            .parent()
            .filter(|p| *p != Path::new("/") && !p.as_os_str().is_empty())
            .unwrap_or(&paths.data_dir)
            .to_path_buf();

        Self {
            min_data: ByteSize::from_gib(disk.min_data_gb),
            reserved_system: ByteSize::from_gib(disk.reserved_system_gb),
            system_fs_type: disk.system_fs_type.clone(),
            data_fs_type: disk.data_fs_type.clone(),
            data_mount,
            device_types: disk.device_types.clone(),
        }
    }

    /// Sum of every partition minimum
    pub fn required_capacity(&self) -> ByteSize {
        ByteSize(self.reserved_system.0.saturating_add(self.min_data.0))
    }
}

/// Pick the largest eligible device and check it against the requirements.
///
/// Ties on size go to the lexicographically smallest device path so the
/// choice does not depend on enumeration order.
pub fn select_target_disk(
    devices: &[BlockDevice],
    requirements: &DiskRequirements,
) -> Result<TargetDisk> {
    let mut candidates: Vec<&BlockDevice> = devices
        .iter()
        .filter(|d| {
            requirements.device_types.is_empty()
                || requirements.device_types.iter().any(|t| *t == d.device_type)
        })
        .collect();

    if candidates.is_empty() {
        return Err(ProvisionError::disk("No block device found"));
    }

    candidates.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.path.cmp(&b.path)));
    let chosen = candidates[0];
    debug!(
        "Largest block device: {} ({})",
        chosen.path.display(),
        chosen.size
    );

    let required = requirements.required_capacity();
    if chosen.size < required {
        return Err(ProvisionError::disk(format!(
            "Largest disk {} is too small: required {}, available {}",
            chosen.path.display(),
            required,
            chosen.size
        )));
    }

    let data_size = chosen.size.saturating_sub(requirements.reserved_system);
    if data_size < requirements.min_data {
        return Err(ProvisionError::disk(format!(
            "Data partition on {} would be too small: required {}, available {}",
            chosen.path.display(),
            requirements.min_data,
            data_size
        )));
    }

    Ok(TargetDisk {
        device: chosen.path.clone(),
        capacity: chosen.size,
        layout: vec![
            PartitionPlan {
                mount_point: PathBuf::from("/"),
                size: requirements.reserved_system,
                min_size: requirements.reserved_system,
                fs_type: requirements.system_fs_type.clone(),
            },
            PartitionPlan {
                mount_point: requirements.data_mount.clone(),
                size: data_size,
                min_size: requirements.min_data,
                fs_type: requirements.data_fs_type.clone(),
            },
        ],
    })
}

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    blockdevices: Vec<LsblkDevice>,
}

#[derive(Debug, Deserialize)]
struct LsblkDevice {
    name: String,
    #[serde(default)]
    path: Option<String>,
    size: Option<LsblkSize>,
    #[serde(rename = "type")]
    device_type: String,
    #[serde(default)]
    model: Option<String>,
}

/// lsblk reports numbers in newer releases and strings in older ones
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LsblkSize {
    Bytes(u64),
    Text(String),
}

/// Parse `lsblk -J` output into normalized devices
pub fn parse_lsblk_json(json: &str) -> Result<Vec<BlockDevice>> {
    let output: LsblkOutput = serde_json::from_str(json)
        .map_err(|e| ProvisionError::disk(format!("Failed to parse lsblk output: {}", e)))?;

    output
        .blockdevices
        .into_iter()
        .map(|dev| {
            let size = match dev.size {
                Some(LsblkSize::Bytes(bytes)) => ByteSize(bytes),
                Some(LsblkSize::Text(text)) => ByteSize::parse(&text)?,
                None => ByteSize(0),
            };
            Ok(BlockDevice {
                path: PathBuf::from(dev.path.unwrap_or_else(|| format!("/dev/{}", dev.name))),
                size,
                device_type: dev.device_type,
                model: dev.model.map(|m| m.trim().to_string()).filter(|m| !m.is_empty()),
            })
        })
        .collect()
}

/// Build devices from `/sys/block/<name>/size` values (512-byte sectors)
pub fn devices_from_sysfs<'a, I>(entries: I) -> Result<Vec<BlockDevice>>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    entries
        .into_iter()
        .filter(|(name, _)| {
            !VIRTUAL_DEVICE_PREFIXES
                .iter()
                .any(|prefix| name.starts_with(prefix))
        })
        .map(|(name, sectors)| {
            let sectors: u64 = sectors.trim().parse().map_err(|_| {
                ProvisionError::disk(format!("Invalid sector count for {}: {}", name, sectors))
            })?;
            Ok(BlockDevice::disk(
                format!("/dev/{}", name),
                ByteSize::from_sectors(sectors),
            ))
        })
        .collect()
}

/// Split `grep -H` output into (device name, sector count) pairs
pub fn parse_sysfs_listing(listing: &str) -> Vec<(&str, &str)> {
    listing
        .lines()
        .filter_map(|line| {
            let (path, sectors) = line.trim().split_once(':')?;
            let name = path.strip_prefix("/sys/block/")?.strip_suffix("/size")?;
            Some((name, sectors))
        })
        .collect()
}

/// Probes the live device list and validates it
pub struct DiskValidator<'a> {
    exec: &'a mut dyn CommandExecutor,
}

impl<'a> DiskValidator<'a> {
    pub fn new(exec: &'a mut dyn CommandExecutor) -> Self {
        Self { exec }
    }

    /// Enumerate block devices, falling back to sysfs sector counts
    pub async fn list_devices(&mut self) -> Result<Vec<BlockDevice>> {
        match self.exec.execute_with_output(LSBLK_COMMAND).await {
            Ok(json) => parse_lsblk_json(&json),
            Err(e) => {
                info!("lsblk unavailable ({}), falling back to /sys/block", e);
                let listing = self
                    .exec
                    .execute_with_output(SYSFS_COMMAND)
                    .await?;
                devices_from_sysfs(parse_sysfs_listing(&listing))
            }
        }
    }

    /// Probe and select the target disk
    pub async fn validate(&mut self, requirements: &DiskRequirements) -> Result<TargetDisk> {
        info!(
            "Validating target storage (required {})",
            requirements.required_capacity()
        );
        let devices = self.list_devices().await?;
        let target = select_target_disk(&devices, requirements)?;
        info!(
            "Selected {} ({}), data partition {}",
            target.device.display(),
            target.capacity,
            target.data_partition_size()
        );
        Ok(target)
    }
}
