//! wgpu implementation of the device seam.

mod compile;
mod context;
mod render;

pub use compile::{check_program, CheckedProgram};
pub use context::WgpuBackend;
pub use render::{WgpuDevice, WgpuProgram};
