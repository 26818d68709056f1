//! Destructive verification of removable media: write known patterns at
//! every power-of-two transfer size, read them back, compare.

pub mod allocator;
pub mod config;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod interrupt;
pub mod logging;
pub mod pattern;
pub mod report;
pub mod transport;

use std::path::Path;

pub use allocator::{
    allocate_plan, Allocate, CeilingAllocator, DualBuffer, RunPlan, SystemAllocator,
};
pub use engine::{EngineConfig, PassLimit, RunState, VerificationEngine};
pub use error::{FatalError, Result};
pub use geometry::{DeviceGeometry, GeometryProvider};
pub use interrupt::{InterruptPoll, StopFlag};
pub use report::{Reporter, RunStatus, RunSummary};
pub use transport::{BlockTransport, FileTransport};

/// Everything fixed before the first destructive write.
#[derive(Debug)]
pub struct Prepared {
    pub geometry: DeviceGeometry,
    pub plan: RunPlan,
    pub buffer: DualBuffer,
    /// Dual-buffer sizes the allocator turned down, largest first.
    pub refused: Vec<u64>,
}

/// Fetch geometry and secure the dual buffer. Fails before any I/O that
/// modifies the medium.
pub fn prepare<A: Allocate>(provider: &dyn GeometryProvider, alloc: &mut A) -> Result<Prepared> {
    let geometry = provider.geometry()?;
    let mut refused = Vec::new();
    let (plan, buffer) =
        allocator::allocate_plan_with(&geometry, alloc, |bytes| refused.push(bytes))?;
    Ok(Prepared {
        geometry,
        plan,
        buffer,
        refused,
    })
}

/// Open the medium for the run. A failure here is fatal.
pub fn open_device(path: &Path, prepared: &Prepared, direct_io: bool) -> Result<FileTransport> {
    FileTransport::open(path, prepared.geometry.sector_size, direct_io).map_err(|source| {
        FatalError::Open {
            path: path.to_path_buf(),
            source,
        }
    })
}

/// Run the engine over the prepared plan.
pub fn verify_device<T: BlockTransport, I: InterruptPoll>(
    transport: T,
    prepared: Prepared,
    interrupt: I,
    config: EngineConfig,
    reporter: &mut dyn Reporter,
) -> RunSummary {
    let mut engine =
        VerificationEngine::new(prepared.plan, prepared.buffer, transport, interrupt, config);
    engine.run(reporter)
}
