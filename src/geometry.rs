//! Device geometry: sector size, addressable sector count and the first
//! sector of the area under test.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::{FatalError, Result};

pub const DEFAULT_SECTOR_SIZE: u32 = 512;
const BOOT_SIGNATURE: [u8; 2] = [0x55, 0xAA];
const DIR_ENTRY_SIZE: u32 = 32;

/// Record as reported by a provider, before validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeometryRecord {
    pub sector_size: u32,
    pub sectors_per_cluster: u32,
    pub bytes_per_cluster: u32,
    pub cluster_count: u64,
    pub data_start_sector: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceGeometry {
    pub sector_size: u32,
    pub total_sectors: u64,
    pub data_start_sector: u64,
}

impl DeviceGeometry {
    /// Validate a provider record. `device` only labels the error.
    pub fn from_record(device: &str, rec: GeometryRecord) -> Result<Self> {
        if u64::from(rec.sector_size) * u64::from(rec.sectors_per_cluster)
            != u64::from(rec.bytes_per_cluster)
        {
            return Err(FatalError::GeometryInconsistent {
                device: device.to_string(),
                sector_size: rec.sector_size,
                sectors_per_cluster: rec.sectors_per_cluster,
                bytes_per_cluster: rec.bytes_per_cluster,
            });
        }
        let total_sectors = rec.cluster_count * u64::from(rec.sectors_per_cluster);
        if rec.sector_size == 0 || total_sectors == 0 {
            return Err(FatalError::GeometryUnavailable {
                device: device.to_string(),
                reason: format!(
                    "empty geometry ({} B/sector, {} sectors)",
                    rec.sector_size, total_sectors
                ),
            });
        }
        Ok(Self {
            sector_size: rec.sector_size,
            total_sectors,
            data_start_sector: rec.data_start_sector,
        })
    }

    /// One past the last addressable sector.
    pub fn end_sector(&self) -> u64 {
        self.data_start_sector + self.total_sectors
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_sectors * u64::from(self.sector_size)
    }
}

pub trait GeometryProvider {
    fn geometry(&self) -> Result<DeviceGeometry>;
}

/// Whole device (or image file) treated as one data area.
#[derive(Debug, Clone)]
pub struct RawDeviceGeometry {
    pub path: PathBuf,
    pub sector_size: Option<u32>,
    pub start_sector: Option<u64>,
}

impl RawDeviceGeometry {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            sector_size: None,
            start_sector: None,
        }
    }

    fn record(&self) -> io::Result<GeometryRecord> {
        let sector_size = match self.sector_size {
            Some(s) => s,
            None => os_logical_sector_size(&self.path).unwrap_or(DEFAULT_SECTOR_SIZE),
        };
        if sector_size == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "sector size is zero"));
        }
        let len = device_len(&self.path)?;
        let start = self.start_sector.unwrap_or(0);
        let sectors = (len / u64::from(sector_size)).saturating_sub(start);
        Ok(GeometryRecord {
            sector_size,
            sectors_per_cluster: 1,
            bytes_per_cluster: sector_size,
            cluster_count: sectors,
            data_start_sector: start,
        })
    }
}

impl GeometryProvider for RawDeviceGeometry {
    fn geometry(&self) -> Result<DeviceGeometry> {
        let device = self.path.display().to_string();
        let rec = self.record().map_err(|e| FatalError::GeometryUnavailable {
            device: device.clone(),
            reason: e.to_string(),
        })?;
        DeviceGeometry::from_record(&device, rec)
    }
}

/// FAT boot-sector parameter block. Only the data area is exercised,
/// the reserved sectors, FATs and root directory are left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BiosParameterBlock {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub fat_count: u8,
    pub root_entries: u16,
    pub total_sectors: u32,
    pub sectors_per_fat: u32,
}

impl BiosParameterBlock {
    pub fn parse(sector: &[u8]) -> std::result::Result<Self, String> {
        if sector.len() < 512 {
            return Err(format!("boot sector too short ({} bytes)", sector.len()));
        }
        if sector[510..512] != BOOT_SIGNATURE {
            return Err("missing 0x55AA boot signature".into());
        }
        let u16_at = |o: usize| u16::from_le_bytes([sector[o], sector[o + 1]]);
        let u32_at =
            |o: usize| u32::from_le_bytes([sector[o], sector[o + 1], sector[o + 2], sector[o + 3]]);

        let total16 = u16_at(19);
        let fat16 = u16_at(22);
        let bpb = Self {
            bytes_per_sector: u16_at(11),
            sectors_per_cluster: sector[13],
            reserved_sectors: u16_at(14),
            fat_count: sector[16],
            root_entries: u16_at(17),
            total_sectors: if total16 != 0 { u32::from(total16) } else { u32_at(32) },
            sectors_per_fat: if fat16 != 0 { u32::from(fat16) } else { u32_at(36) },
        };
        if bpb.bytes_per_sector == 0 || bpb.sectors_per_cluster == 0 || bpb.total_sectors == 0 {
            return Err("zero field in parameter block".into());
        }
        Ok(bpb)
    }

    pub fn data_start_sector(&self) -> u64 {
        let bps = u32::from(self.bytes_per_sector);
        let root_dir_sectors = (u32::from(self.root_entries) * DIR_ENTRY_SIZE).div_ceil(bps);
        u64::from(self.reserved_sectors)
            + u64::from(self.fat_count) * u64::from(self.sectors_per_fat)
            + u64::from(root_dir_sectors)
    }

    pub fn to_record(&self) -> GeometryRecord {
        let start = self.data_start_sector();
        let data_sectors = u64::from(self.total_sectors).saturating_sub(start);
        GeometryRecord {
            sector_size: u32::from(self.bytes_per_sector),
            sectors_per_cluster: u32::from(self.sectors_per_cluster),
            bytes_per_cluster: u32::from(self.bytes_per_sector)
                * u32::from(self.sectors_per_cluster),
            cluster_count: data_sectors / u64::from(self.sectors_per_cluster),
            data_start_sector: start,
        }
    }
}

/// Geometry decoded from the medium's own boot sector.
#[derive(Debug, Clone)]
pub struct BootSectorGeometry {
    pub path: PathBuf,
}

impl BootSectorGeometry {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }
}

impl GeometryProvider for BootSectorGeometry {
    fn geometry(&self) -> Result<DeviceGeometry> {
        let device = self.path.display().to_string();
        let unavailable = |reason: String| FatalError::GeometryUnavailable {
            device: device.clone(),
            reason,
        };
        let mut sector = [0u8; 512];
        File::open(&self.path)
            .and_then(|mut f| f.read_exact(&mut sector))
            .map_err(|e| unavailable(e.to_string()))?;
        let bpb = BiosParameterBlock::parse(&sector).map_err(unavailable)?;
        DeviceGeometry::from_record(&device, bpb.to_record())
    }
}

/// Byte length of a device node or regular file. Block devices report a
/// zero metadata length on Linux, so seek to the end instead.
pub fn device_len(path: &Path) -> io::Result<u64> {
    let mut f = File::open(path)?;
    f.seek(SeekFrom::End(0))
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        /// Logical block size the kernel reports for the device node.
        pub fn os_logical_sector_size(path: &Path) -> Option<u32> {
            use std::fs;

            let dev = fs::canonicalize(path).ok()?;
            let name = dev.file_name()?.to_str()?;
            let sys_path = Path::new("/sys/class/block").join(name);
            // partitions have no queue/ of their own; their parent disk does
            ["queue/logical_block_size", "../queue/logical_block_size"]
                .iter()
                .find_map(|rel| fs::read_to_string(sys_path.join(rel)).ok())
                .and_then(|v| v.trim().parse::<u32>().ok())
        }
    } else {
        pub fn os_logical_sector_size(_path: &Path) -> Option<u32> {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn floppy_boot_sector() -> [u8; 512] {
        // 720K floppy: 512 B/sector, 2 sectors/cluster, 1 reserved,
        // 2 FATs of 3 sectors, 112 root entries, 1440 sectors.
        let mut s = [0u8; 512];
        s[11..13].copy_from_slice(&512u16.to_le_bytes());
        s[13] = 2;
        s[14..16].copy_from_slice(&1u16.to_le_bytes());
        s[16] = 2;
        s[17..19].copy_from_slice(&112u16.to_le_bytes());
        s[19..21].copy_from_slice(&1440u16.to_le_bytes());
        s[22..24].copy_from_slice(&3u16.to_le_bytes());
        s[510] = 0x55;
        s[511] = 0xAA;
        s
    }

    #[test]
    fn inconsistent_record_is_rejected() {
        let rec = GeometryRecord {
            sector_size: 512,
            sectors_per_cluster: 2,
            bytes_per_cluster: 512,
            cluster_count: 10,
            data_start_sector: 0,
        };
        assert!(matches!(
            DeviceGeometry::from_record("dev", rec),
            Err(FatalError::GeometryInconsistent { .. })
        ));
    }

    #[test]
    fn record_totals_clusters() {
        let rec = GeometryRecord {
            sector_size: 512,
            sectors_per_cluster: 2,
            bytes_per_cluster: 1024,
            cluster_count: 360,
            data_start_sector: 2,
        };
        let g = DeviceGeometry::from_record("dev", rec).unwrap();
        assert_eq!(g.total_sectors, 720);
        assert_eq!(g.end_sector(), 722);
    }

    #[test]
    fn empty_record_is_unavailable() {
        let rec = GeometryRecord {
            sector_size: 512,
            sectors_per_cluster: 1,
            bytes_per_cluster: 512,
            cluster_count: 0,
            data_start_sector: 0,
        };
        assert!(matches!(
            DeviceGeometry::from_record("dev", rec),
            Err(FatalError::GeometryUnavailable { .. })
        ));
    }

    #[test]
    fn parses_floppy_bpb() {
        let bpb = BiosParameterBlock::parse(&floppy_boot_sector()).unwrap();
        // 1 reserved + 2*3 FAT + 112*32/512 root = 14
        assert_eq!(bpb.data_start_sector(), 14);
        let rec = bpb.to_record();
        assert_eq!(rec.bytes_per_cluster, 1024);
        assert_eq!(rec.cluster_count, (1440 - 14) / 2);
    }

    #[test]
    fn bpb_without_signature_fails() {
        let mut s = floppy_boot_sector();
        s[511] = 0;
        assert!(BiosParameterBlock::parse(&s).is_err());
    }

    #[test]
    fn boot_sector_geometry_from_image() {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(&floppy_boot_sector()).unwrap();
        tmp.write_all(&vec![0u8; 1439 * 512]).unwrap();
        let g = BootSectorGeometry::new(tmp.path()).geometry().unwrap();
        assert_eq!(g.sector_size, 512);
        assert_eq!(g.data_start_sector, 14);
        assert_eq!(g.total_sectors, 1426);
    }

    #[test]
    fn raw_geometry_from_image() {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(&vec![0u8; 100 * 512]).unwrap();
        let mut provider = RawDeviceGeometry::new(tmp.path());
        provider.sector_size = Some(512);
        provider.start_sector = Some(4);
        let g = provider.geometry().unwrap();
        assert_eq!(g.data_start_sector, 4);
        assert_eq!(g.total_sectors, 96);
        assert_eq!(g.end_sector(), 100);
    }

    #[test]
    fn raw_geometry_missing_device_is_fatal() {
        let provider = RawDeviceGeometry::new("/nonexistent/dma_tester/device");
        assert!(matches!(
            provider.geometry(),
            Err(FatalError::GeometryUnavailable { .. })
        ));
    }
}
