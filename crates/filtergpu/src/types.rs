use std::fmt;
use std::str::FromStr;

use crate::error::FilterError;
use crate::pixels::PixelFormat;

/// Encodings the off-screen render target can be allocated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputEncoding {
    /// Packed 16-bit RGB; read back without any conversion.
    Rgb565,
    /// Four 8-bit channels; read back through an explicit pixel transfer.
    Rgba8,
}

impl OutputEncoding {
    pub fn pixel_format(self) -> PixelFormat {
        match self {
            OutputEncoding::Rgb565 => PixelFormat::Rgb565,
            OutputEncoding::Rgba8 => PixelFormat::Rgba8,
        }
    }

    pub fn bytes_per_pixel(self) -> usize {
        self.pixel_format().bytes_per_pixel()
    }
}

impl TryFrom<PixelFormat> for OutputEncoding {
    type Error = FilterError;

    fn try_from(format: PixelFormat) -> Result<Self, Self::Error> {
        match format {
            PixelFormat::Rgb565 => Ok(OutputEncoding::Rgb565),
            PixelFormat::Rgba8 => Ok(OutputEncoding::Rgba8),
            PixelFormat::Gray8 => Err(FilterError::UnsupportedFormat(
                "destination must be rgb565 or rgba8, not gray8".into(),
            )),
        }
    }
}

impl fmt::Display for OutputEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.pixel_format().fmt(f)
    }
}

impl FromStr for OutputEncoding {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "rgb565" | "565" => Ok(OutputEncoding::Rgb565),
            "rgba8" | "rgba" => Ok(OutputEncoding::Rgba8),
            other => Err(format!(
                "unknown output encoding '{other}'; expected rgb565 or rgba8"
            )),
        }
    }
}

/// Size and encoding of the off-screen render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetSpec {
    pub width: u32,
    pub height: u32,
    pub encoding: OutputEncoding,
}

impl TargetSpec {
    pub fn new(width: u32, height: u32, encoding: OutputEncoding) -> Self {
        Self {
            width,
            height,
            encoding,
        }
    }
}

impl fmt::Display for TargetSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} {}", self.width, self.height, self.encoding)
    }
}

/// How the pipeline treats passes issued from a thread other than the one
/// that initialized the graphics context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThreadPolicy {
    /// Rebind the context to the calling thread at the start of every pass.
    #[default]
    Rebind,
    /// Refuse passes from any other thread with [`FilterError::ThreadAffinity`].
    Pinned,
}

impl FromStr for ThreadPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "rebind" => Ok(ThreadPolicy::Rebind),
            "pinned" | "pin" => Ok(ThreadPolicy::Pinned),
            other => Err(format!(
                "unknown thread policy '{other}'; expected rebind or pinned"
            )),
        }
    }
}

/// Power profile requested from the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GpuPowerPreference {
    /// Favour integrated/embedded GPUs.
    #[default]
    Low,
    High,
}

impl FromStr for GpuPowerPreference {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" | "low-power" => Ok(GpuPowerPreference::Low),
            "high" | "high-performance" => Ok(GpuPowerPreference::High),
            other => Err(format!(
                "unknown GPU power preference '{other}'; expected low or high"
            )),
        }
    }
}

/// Knobs applied when a [`crate::FilterPipeline`] is constructed.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Adapter power profile used when the context is first created.
    pub power: GpuPowerPreference,
    pub thread_policy: ThreadPolicy,
    /// Run a scoped device error check every N passes (0 disables it).
    pub error_check_interval: u32,
    /// Render target to use instead of inferring it from the first `dst`.
    pub target: Option<TargetSpec>,
    /// Capacity of the diagnostic channel; overflowing records are dropped.
    pub diagnostics_capacity: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            power: GpuPowerPreference::default(),
            thread_policy: ThreadPolicy::default(),
            error_check_interval: 0,
            target: None,
            diagnostics_capacity: 64,
        }
    }
}

/// Counters describing the work a pipeline has done so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Completed passes.
    pub passes: u64,
    /// Program builds attempted (translation, compile, and link).
    pub compiles: u64,
    pub texture_allocations: u64,
    pub target_allocations: u64,
}
