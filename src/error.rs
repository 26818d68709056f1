use std::{io, path::PathBuf};

/// Conditions that stop a run before any destructive I/O happens.
#[derive(Debug, thiserror::Error)]
pub enum FatalError {
    #[error("failed to read geometry for {device}: {reason}")]
    GeometryUnavailable { device: String, reason: String },
    #[error(
        "inconsistent geometry detected for {device}: {sector_size} B/sector x {sectors_per_cluster} sectors/cluster != {bytes_per_cluster} B/cluster"
    )]
    GeometryInconsistent {
        device: String,
        sector_size: u32,
        sectors_per_cluster: u32,
        bytes_per_cluster: u32,
    },
    #[error("unable to allocate a minimum of {min_bytes} bytes")]
    Allocation { min_bytes: u64 },
    #[error("cannot open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, FatalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_message_reports_minimum() {
        let e = FatalError::Allocation { min_bytes: 1024 };
        assert_eq!(e.to_string(), "unable to allocate a minimum of 1024 bytes");
    }

    #[test]
    fn inconsistent_geometry_message() {
        let e = FatalError::GeometryInconsistent {
            device: "/dev/sdz".into(),
            sector_size: 512,
            sectors_per_cluster: 2,
            bytes_per_cluster: 512,
        };
        let msg = e.to_string();
        assert!(msg.starts_with("inconsistent geometry detected for /dev/sdz"));
        assert!(msg.contains("!= 512 B/cluster"));
    }
}
