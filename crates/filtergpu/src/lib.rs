//! Off-screen GPU image filtering.
//!
//! A [`FilterPipeline`] takes a CPU image, renders it through a caller
//! supplied vertex/fragment program into an off-screen target, and copies the
//! result back into a CPU image. The flow of one pass is:
//!
//! ```text
//!   set_program / set_param  (any thread, staged under the pipeline lock)
//!          │
//!          ▼
//!   process(src, dst) ──▶ context (lazy) ──▶ source texture upload
//!                                               │
//!          ┌────────────────────────────────────┘
//!          ▼
//!   program (compiled when dirty) ──▶ uniforms (texelsize + params)
//!          │
//!          ▼
//!   quad draw ──▶ render target ──▶ read-back ──▶ dst (RGB565 | RGBA8)
//! ```
//!
//! Graphics state is created inside the first pass rather than in the
//! constructor, and only ever touched while the pipeline lock is held. Shader
//! text is GLSL ES 1.00 style; see [`program`] for the conventions it must
//! follow (`tex`, `tcoord`, `texelsize`).

pub mod device;
pub mod diagnostics;
mod error;
pub mod gpu;
mod params;
mod pipeline;
mod pixels;
pub mod program;
#[cfg(test)]
mod recording;
pub mod shaders;
mod types;

pub use diagnostics::GpuDiagnostic;
pub use error::{FilterError, ShaderStageKind};
pub use gpu::{check_program, CheckedProgram, WgpuBackend};
pub use params::{ApplyReport, ParamValue, ParameterStore, UniformBlock};
pub use pipeline::FilterPipeline;
pub use pixels::{pack_rgb565, rgb565_to_rgba, unpack_rgb565, ImageMut, ImageRef, PixelFormat};
pub use program::{UniformKind, UniformLayout, UniformSlot};
pub use types::{
    GpuPowerPreference, OutputEncoding, PipelineOptions, PipelineStats, TargetSpec, ThreadPolicy,
};
