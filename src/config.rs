use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::engine::{EngineConfig, PassLimit};
use crate::geometry::{BootSectorGeometry, GeometryProvider, RawDeviceGeometry};
use crate::logging::DEFAULT_LOG_FILE;
use crate::pattern::{PatternKind, DEFAULT_FILL, DEFAULT_SENTINEL};

pub fn parse_size_with_suffix(s: &str) -> Result<u64, String> {
    let s_trimmed = s.trim();
    if s_trimmed.is_empty() {
        return Err("Input string is empty".to_string());
    }
    let first_non_digit_idx = s_trimmed.find(|c: char| !c.is_ascii_digit());
    let (num_str_candidate, suffix_candidate_orig) = match first_non_digit_idx {
        Some(0) => {
            return Err(format!("Invalid format: missing numeric value in '{}'", s_trimmed))
        }
        Some(idx) => s_trimmed.split_at(idx),
        None => (s_trimmed, ""),
    };
    let num = num_str_candidate
        .parse::<u64>()
        .map_err(|_| format!("Invalid number: '{}' in '{}'", num_str_candidate, s_trimmed))?;
    let suffix = suffix_candidate_orig.trim_start().to_uppercase();
    match suffix.as_str() {
        "" | "B" => Ok(num),
        "K" | "KB" | "KIB" => Ok(num.saturating_mul(1024)),
        "M" | "MB" | "MIB" => Ok(num.saturating_mul(1024 * 1024)),
        "G" | "GB" | "GIB" => Ok(num.saturating_mul(1024 * 1024 * 1024)),
        "T" | "TB" | "TIB" => Ok(num.saturating_mul(1024 * 1024 * 1024 * 1024)),
        _ => Err(format!(
            "Unknown or misplaced size suffix: '{}' in '{}'",
            suffix_candidate_orig, s_trimmed
        )),
    }
}

/// Accepts `0xAE`, `$AE` or decimal.
pub fn parse_byte(s: &str) -> Result<u8, String> {
    let t = s.trim();
    let parsed = match t.strip_prefix("0x").or_else(|| t.strip_prefix('$')) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => t.parse::<u8>(),
    };
    parsed.map_err(|e| format!("Invalid byte value '{}': {}", t, e))
}

#[derive(Parser, Debug)]
#[clap(
    author,
    version,
    about = "Destructive write/read/compare test for removable media",
    long_about = None
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Overwrite the medium with test patterns and verify every transfer.
    Verify(VerifyArgs),
    /// Print the geometry and run plan without touching the medium.
    Plan(DeviceArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GeometrySource {
    /// Whole device from sector 0.
    Raw,
    /// Data area of a FAT-formatted medium, from its boot sector.
    BootSector,
}

#[derive(Args, Debug, Clone)]
pub struct DeviceArgs {
    /// Device node or image file under test.
    pub device: PathBuf,
    #[clap(long, value_enum, default_value = "raw")]
    pub geometry: GeometrySource,
    /// Sector size override (raw geometry only).
    #[clap(long, value_parser = parse_size_with_suffix)]
    pub sector_size: Option<u64>,
    /// First sector to test (raw geometry only).
    #[clap(long)]
    pub start_sector: Option<u64>,
    /// Upper bound for the two transfer buffers together.
    #[clap(long, value_parser = parse_size_with_suffix)]
    pub memory_limit: Option<u64>,
    /// Bypass the OS cache (always on when built with the `direct` feature).
    #[clap(long)]
    pub direct_io: bool,
    /// Also log debug detail, such as refused buffer sizes.
    #[clap(long, short = 'v')]
    pub verbose: bool,
}

impl DeviceArgs {
    pub fn use_direct_io(&self) -> bool {
        self.direct_io || cfg!(feature = "direct")
    }

    pub fn provider(&self) -> Result<Box<dyn GeometryProvider>, String> {
        match self.geometry {
            GeometrySource::Raw => {
                let mut raw = RawDeviceGeometry::new(&self.device);
                raw.sector_size = self
                    .sector_size
                    .map(|s| u32::try_from(s).map_err(|_| format!("sector size {} too large", s)))
                    .transpose()?;
                raw.start_sector = self.start_sector;
                Ok(Box::new(raw))
            }
            GeometrySource::BootSector => {
                if self.sector_size.is_some() || self.start_sector.is_some() {
                    return Err(
                        "--sector-size and --start-sector only apply to --geometry raw".into(),
                    );
                }
                Ok(Box::new(BootSectorGeometry::new(&self.device)))
            }
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct VerifyArgs {
    #[clap(flatten)]
    pub device: DeviceArgs,
    /// Repeat passes with fresh random patterns until interrupted.
    #[clap(long, conflicts_with = "passes")]
    pub continuous: bool,
    /// Number of passes to run.
    #[clap(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub passes: Option<u64>,
    /// Fixed fill byte (default 0xAE); ignored in continuous mode.
    #[clap(long, value_parser = parse_byte)]
    pub fill: Option<u8>,
    /// Seed for the random patterns.
    #[clap(long)]
    pub seed: Option<u64>,
    /// Skip the destructive-test confirmation.
    #[clap(long, short = 'y')]
    pub yes: bool,
    /// Print the final summary as JSON on stdout.
    #[clap(long)]
    pub json: bool,
    #[clap(long, default_value = DEFAULT_LOG_FILE)]
    pub log_file: PathBuf,
    /// Do not wait for a key press after a fatal error.
    #[clap(long)]
    pub no_wait: bool,
}

impl VerifyArgs {
    pub fn engine_config(&self) -> EngineConfig {
        if self.continuous {
            return EngineConfig::continuous(self.seed);
        }
        let pattern = match (self.seed, self.fill) {
            (Some(seed), None) => PatternKind::Random { seed: Some(seed) },
            (_, fill) => PatternKind::Fixed {
                fill: fill.unwrap_or(DEFAULT_FILL),
                sentinel: DEFAULT_SENTINEL,
            },
        };
        EngineConfig {
            pass_limit: PassLimit::Passes(self.passes.unwrap_or(1)),
            pattern,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verify(args: &[&str]) -> VerifyArgs {
        let mut full = vec!["dma_tester", "verify"];
        full.extend_from_slice(args);
        match Cli::try_parse_from(full).unwrap().command {
            Commands::Verify(v) => v,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn sizes_with_suffix() {
        assert_eq!(parse_size_with_suffix("512").unwrap(), 512);
        assert_eq!(parse_size_with_suffix("4K").unwrap(), 4096);
        assert_eq!(parse_size_with_suffix("2 MiB").unwrap(), 2 * 1024 * 1024);
        assert!(parse_size_with_suffix("K").is_err());
        assert!(parse_size_with_suffix("3Q").is_err());
    }

    #[test]
    fn bytes_in_hex_or_decimal() {
        assert_eq!(parse_byte("0xAE").unwrap(), 0xAE);
        assert_eq!(parse_byte("$56").unwrap(), 0x56);
        assert_eq!(parse_byte("200").unwrap(), 200);
        assert!(parse_byte("256").is_err());
    }

    #[test]
    fn default_is_single_fixed_pass() {
        let v = verify(&["/dev/sdz"]);
        assert_eq!(v.engine_config(), EngineConfig::single_pass());
        assert_eq!(v.log_file, PathBuf::from(DEFAULT_LOG_FILE));
    }

    #[test]
    fn continuous_uses_random_patterns() {
        let v = verify(&["/dev/sdz", "--continuous", "--seed", "5"]);
        let c = v.engine_config();
        assert_eq!(c.pass_limit, PassLimit::Unbounded);
        assert_eq!(c.pattern, PatternKind::Random { seed: Some(5) });
    }

    #[test]
    fn passes_and_fill() {
        let v = verify(&["/dev/sdz", "--passes", "3", "--fill", "0x00", "--memory-limit", "64K"]);
        let c = v.engine_config();
        assert_eq!(c.pass_limit, PassLimit::Passes(3));
        assert_eq!(c.pattern, PatternKind::Fixed { fill: 0, sentinel: DEFAULT_SENTINEL });
        assert_eq!(v.device.memory_limit, Some(64 * 1024));
    }

    #[test]
    fn continuous_conflicts_with_passes() {
        let both = ["dma_tester", "verify", "x", "--continuous", "--passes", "2"];
        assert!(Cli::try_parse_from(both).is_err());
        assert!(Cli::try_parse_from(["dma_tester", "verify", "x", "--passes", "0"]).is_err());
    }

    #[test]
    fn verbose_is_shared_by_both_commands() {
        let v = verify(&["/dev/sdz", "-v"]);
        assert!(v.device.verbose);
        let cli = Cli::try_parse_from(["dma_tester", "plan", "/dev/sdz", "--verbose"]).unwrap();
        match cli.command {
            Commands::Plan(args) => assert!(args.verbose),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn boot_sector_rejects_raw_overrides() {
        let v = verify(&["img", "--geometry", "boot-sector", "--start-sector", "3"]);
        assert!(v.device.provider().is_err());
    }
}
