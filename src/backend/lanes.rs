//! Kernel launch on the emulation backends
//!
//! A kernel is a closure invoked once per lane of a `grid × block` launch.
//! Every invocation receives its coordinates in a [`LaneContext`] instead of
//! reading ambient per-thread state.

use rayon::prelude::*;

use crate::backend::{Backend, BackendKind};
use crate::error::{MemError, MemResult};

/// Three-dimensional launch extent or index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dim3 {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Dim3 {
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Dim3 { x, y, z }
    }

    /// Number of points covered by this extent, saturating at `usize::MAX`
    pub fn volume(&self) -> usize {
        self.checked_volume().unwrap_or(usize::MAX)
    }

    /// Number of points covered by this extent, `None` on overflow
    pub fn checked_volume(&self) -> Option<usize> {
        (self.x as usize)
            .checked_mul(self.y as usize)?
            .checked_mul(self.z as usize)
    }

    /// Row-major linear position of `idx` inside this extent
    pub fn linearize(&self, idx: Dim3) -> usize {
        idx.x as usize + self.x as usize * (idx.y as usize + self.y as usize * idx.z as usize)
    }

    /// Inverse of [`Dim3::linearize`]
    pub fn delinearize(&self, linear: usize) -> Dim3 {
        let x = self.x.max(1) as usize;
        let y = self.y.max(1) as usize;
        Dim3 {
            x: (linear % x) as u32,
            y: ((linear / x) % y) as u32,
            z: (linear / (x * y)) as u32,
        }
    }
}

impl Default for Dim3 {
    fn default() -> Self {
        Dim3::new(1, 1, 1)
    }
}

impl From<u32> for Dim3 {
    fn from(x: u32) -> Self {
        Dim3::new(x, 1, 1)
    }
}

impl From<(u32, u32)> for Dim3 {
    fn from((x, y): (u32, u32)) -> Self {
        Dim3::new(x, y, 1)
    }
}

impl From<(u32, u32, u32)> for Dim3 {
    fn from((x, y, z): (u32, u32, u32)) -> Self {
        Dim3::new(x, y, z)
    }
}

/// Coordinates of one kernel invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneContext {
    pub thread_idx: Dim3,
    pub block_idx: Dim3,
    pub block_dim: Dim3,
    pub grid_dim: Dim3,
    /// Index of the emulation worker running this lane
    pub worker: usize,
}

impl LaneContext {
    /// Unique lane id across the whole launch
    pub fn global_linear_id(&self) -> usize {
        self.grid_dim.linearize(self.block_idx) * self.block_dim.volume()
            + self.block_dim.linearize(self.thread_idx)
    }
}

fn run_block<F>(kernel: &F, grid: Dim3, block: Dim3, block_linear: usize, worker: usize)
where
    F: Fn(&LaneContext),
{
    let block_idx = grid.delinearize(block_linear);
    for lane in 0..block.volume() {
        kernel(&LaneContext {
            thread_idx: block.delinearize(lane),
            block_idx,
            block_dim: block,
            grid_dim: grid,
            worker,
        });
    }
}

/// Run `kernel` once per lane of a `grid × block` launch and wait for it.
///
/// `CpuThreads` spreads blocks over the backend's worker pool; `Fibers` runs
/// blocks in order on the calling thread. Lanes of one block always run in
/// sequence on the same worker.
pub fn launch<F>(
    backend: &Backend,
    grid: impl Into<Dim3>,
    block: impl Into<Dim3>,
    kernel: F,
) -> MemResult<()>
where
    F: Fn(&LaneContext) + Send + Sync,
{
    let grid = grid.into();
    let block = block.into();
    let (blocks, lanes) = match (grid.checked_volume(), block.checked_volume()) {
        (Some(blocks), Some(lanes)) if blocks.checked_mul(lanes).is_some() => (blocks, lanes),
        _ => {
            return Err(MemError::InvalidConfiguration(format!(
                "launch of grid {:?} x block {:?} exceeds the addressable lane count",
                grid, block
            )))
        }
    };

    if blocks == 0 || lanes == 0 {
        return Ok(());
    }

    tracing::trace!(
        "launch: {} backend, grid={:?}, block={:?}",
        backend.kind(),
        grid,
        block
    );

    match backend.kind() {
        BackendKind::Native => Err(MemError::NotSupported(
            "host closures cannot be launched on the native backend".to_string(),
        )),
        BackendKind::CpuThreads => {
            match backend.pool() {
                Some(pool) => pool.install(|| {
                    (0..blocks).into_par_iter().for_each(|b| {
                        let worker = rayon::current_thread_index().unwrap_or(0);
                        run_block(&kernel, grid, block, b, worker);
                    })
                }),
                None => (0..blocks).for_each(|b| run_block(&kernel, grid, block, b, 0)),
            }
            Ok(())
        }
        BackendKind::Fibers => {
            (0..blocks).for_each(|b| run_block(&kernel, grid, block, b, 0));
            Ok(())
        }
    }
}
