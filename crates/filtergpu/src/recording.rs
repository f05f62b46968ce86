//! In-memory [`Backend`] that records every device call and renders as if
//! the bound program were the identity filter.

use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

use crate::device::{Backend, Device, TextureFormat, TextureLayout};
use crate::diagnostics::{DiagnosticSender, GpuDiagnostic};
use crate::error::{FilterError, ShaderStageKind};
use crate::pixels::{pack_rgb565, ImageRef};
use crate::program::TranslatedProgram;
use crate::types::{OutputEncoding, PipelineOptions, TargetSpec};

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Open,
    MakeCurrent(ThreadId),
    AllocateTarget(TargetSpec),
    AllocateTexture(TextureLayout),
    WriteTexture,
    BuildProgram,
    Draw { uniforms: Vec<u8> },
    ReadBack,
    BeginErrorCheck,
    EndErrorCheck,
}

pub type EventLog = Arc<Mutex<Vec<Event>>>;

#[derive(Default)]
pub struct RecordingBackend {
    pub log: EventLog,
    pub fail_open: bool,
    pub fail_compile: bool,
    pub fail_target: bool,
    /// Returned by every `end_error_check`.
    pub scoped_error: Option<String>,
    /// Reported through the uncaptured-error hook when the device opens.
    pub uncaptured_on_open: Option<String>,
}

impl RecordingBackend {
    pub fn new() -> (Self, EventLog) {
        let backend = Self::default();
        let log = Arc::clone(&backend.log);
        (backend, log)
    }
}

impl Backend for RecordingBackend {
    type Device = RecordingDevice;

    fn open(
        &mut self,
        _options: &PipelineOptions,
        diagnostics: DiagnosticSender,
    ) -> Result<RecordingDevice, FilterError> {
        record(&self.log, Event::Open);
        if self.fail_open {
            return Err(FilterError::Initialization("no adapter available".into()));
        }
        if let Some(message) = &self.uncaptured_on_open {
            diagnostics.send(GpuDiagnostic::Uncaptured(message.clone()));
        }
        Ok(RecordingDevice {
            log: Arc::clone(&self.log),
            fail_compile: self.fail_compile,
            fail_target: self.fail_target,
            scoped_error: self.scoped_error.clone(),
            target: None,
            texture: None,
            texels: Vec::new(),
            frame: Vec::new(),
            programs: 0,
        })
    }
}

pub struct RecordingDevice {
    log: EventLog,
    fail_compile: bool,
    fail_target: bool,
    scoped_error: Option<String>,
    target: Option<TargetSpec>,
    texture: Option<TextureLayout>,
    texels: Vec<u8>,
    frame: Vec<u8>,
    programs: usize,
}

fn record(log: &EventLog, event: Event) {
    log.lock().unwrap().push(event);
}

impl RecordingDevice {
    /// Nearest-neighbour copy of the source into the target encoding.
    fn render(&mut self, target: TargetSpec, texture: TextureLayout) {
        let bpp = target.encoding.bytes_per_pixel();
        self.frame = vec![0; target.width as usize * target.height as usize * bpp];
        for y in 0..target.height as usize {
            for x in 0..target.width as usize {
                let sx = x * texture.width as usize / target.width as usize;
                let sy = y * texture.height as usize / target.height as usize;
                let src = sy * texture.width as usize + sx;
                let [r, g, b, a] = match texture.format {
                    TextureFormat::Luminance => {
                        let v = self.texels[src];
                        [v, v, v, 255]
                    }
                    TextureFormat::Rgba => {
                        let p = &self.texels[src * 4..src * 4 + 4];
                        [p[0], p[1], p[2], p[3]]
                    }
                };
                let out = (y * target.width as usize + x) * bpp;
                match target.encoding {
                    OutputEncoding::Rgba8 => {
                        self.frame[out..out + 4].copy_from_slice(&[r, g, b, a]);
                    }
                    OutputEncoding::Rgb565 => {
                        self.frame[out..out + 2]
                            .copy_from_slice(&pack_rgb565(r, g, b).to_le_bytes());
                    }
                }
            }
        }
    }
}

impl Device for RecordingDevice {
    type Program = usize;

    fn make_current(&mut self) -> Result<(), FilterError> {
        record(&self.log, Event::MakeCurrent(thread::current().id()));
        Ok(())
    }

    fn allocate_target(&mut self, target: TargetSpec) -> Result<(), FilterError> {
        record(&self.log, Event::AllocateTarget(target));
        if self.fail_target {
            return Err(FilterError::Initialization(format!(
                "{target} exceeds the device texture limit"
            )));
        }
        self.target = Some(target);
        Ok(())
    }

    fn allocate_texture(&mut self, layout: TextureLayout) -> Result<(), FilterError> {
        record(&self.log, Event::AllocateTexture(layout));
        self.texture = Some(layout);
        Ok(())
    }

    fn write_texture(&mut self, image: &ImageRef<'_>) -> Result<(), FilterError> {
        record(&self.log, Event::WriteTexture);
        self.texels = image.data().to_vec();
        Ok(())
    }

    fn build_program(&mut self, _program: &TranslatedProgram) -> Result<usize, FilterError> {
        record(&self.log, Event::BuildProgram);
        if self.fail_compile {
            return Err(FilterError::compile(
                ShaderStageKind::Fragment,
                "0:3: 'undefined_function' : no matching overloaded function found",
            ));
        }
        self.programs += 1;
        Ok(self.programs)
    }

    fn draw(&mut self, _program: &usize, uniforms: &[u8]) -> Result<(), FilterError> {
        record(
            &self.log,
            Event::Draw {
                uniforms: uniforms.to_vec(),
            },
        );
        let (Some(target), Some(texture)) = (self.target, self.texture) else {
            return Err(FilterError::Device("draw before allocation".into()));
        };
        self.render(target, texture);
        Ok(())
    }

    fn read_back(&mut self, dst: &mut [u8]) -> Result<(), FilterError> {
        record(&self.log, Event::ReadBack);
        dst.copy_from_slice(&self.frame);
        Ok(())
    }

    fn begin_error_check(&mut self) {
        record(&self.log, Event::BeginErrorCheck);
    }

    fn end_error_check(&mut self) -> Option<String> {
        record(&self.log, Event::EndErrorCheck);
        self.scoped_error.clone()
    }
}
