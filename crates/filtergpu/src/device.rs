//! The seam between pass orchestration and the graphics API.
//!
//! [`crate::FilterPipeline`] only talks to a [`Backend`] (which opens a
//! context) and the [`Device`] it returns. The wgpu implementation lives in
//! [`crate::gpu`]; tests substitute an in-memory recorder.

use crate::diagnostics::DiagnosticSender;
use crate::error::FilterError;
use crate::pixels::{ImageRef, PixelFormat};
use crate::program::TranslatedProgram;
use crate::types::{PipelineOptions, TargetSpec};

/// Channel layout of the source texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureFormat {
    /// Single channel, replicated into RGB when sampled.
    Luminance,
    Rgba,
}

impl TextureFormat {
    pub fn for_source(format: PixelFormat) -> Result<Self, FilterError> {
        match format {
            PixelFormat::Gray8 => Ok(TextureFormat::Luminance),
            PixelFormat::Rgba8 => Ok(TextureFormat::Rgba),
            PixelFormat::Rgb565 => Err(FilterError::UnsupportedFormat(
                "source must be gray8 or rgba8, not rgb565".into(),
            )),
        }
    }

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            TextureFormat::Luminance => 1,
            TextureFormat::Rgba => 4,
        }
    }
}

/// Size and layout of an allocated source texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureLayout {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
}

impl TextureLayout {
    pub fn of(image: &ImageRef<'_>) -> Result<Self, FilterError> {
        Ok(Self {
            width: image.width(),
            height: image.height(),
            format: TextureFormat::for_source(image.format())?,
        })
    }
}

/// Opens graphics contexts.
pub trait Backend: Send {
    type Device: Device;

    /// Acquires an adapter, device, and queue. Called at most once per
    /// pipeline, from inside the first pass.
    fn open(
        &mut self,
        options: &PipelineOptions,
        diagnostics: DiagnosticSender,
    ) -> Result<Self::Device, FilterError>;
}

/// A live graphics context. Every method runs on the thread currently
/// driving the pipeline, under the pipeline lock.
pub trait Device: Send {
    type Program: Send;

    /// Binds the context to the calling thread.
    fn make_current(&mut self) -> Result<(), FilterError>;

    /// (Re)creates the off-screen render target.
    fn allocate_target(&mut self, target: TargetSpec) -> Result<(), FilterError>;

    /// (Re)creates the source texture.
    fn allocate_texture(&mut self, layout: TextureLayout) -> Result<(), FilterError>;

    /// Overwrites the source texture, whose layout already matches `image`.
    fn write_texture(&mut self, image: &ImageRef<'_>) -> Result<(), FilterError>;

    /// Compiles and links a translated program for the current target.
    fn build_program(&mut self, program: &TranslatedProgram) -> Result<Self::Program, FilterError>;

    /// Draws the full-target quad through `program` with the given uniform
    /// block contents.
    fn draw(&mut self, program: &Self::Program, uniforms: &[u8]) -> Result<(), FilterError>;

    /// Copies the render target into `dst`, tightly packed in the target
    /// encoding.
    fn read_back(&mut self, dst: &mut [u8]) -> Result<(), FilterError>;

    /// Starts capturing device errors for a periodic check.
    fn begin_error_check(&mut self) {}

    /// Ends the capture started by `begin_error_check`.
    fn end_error_check(&mut self) -> Option<String> {
        None
    }
}
