use std::borrow::Cow;

use wgpu::naga::front::glsl;
use wgpu::naga::valid::{Capabilities, ValidationFlags, Validator};
use wgpu::naga::{Module, ShaderStage};

use crate::error::{FilterError, ShaderStageKind};
use crate::program::{translate, TranslatedProgram};
use crate::types::OutputEncoding;

/// A translated program whose stages parsed and validated.
#[derive(Debug, Clone)]
pub struct CheckedProgram {
    pub translated: TranslatedProgram,
}

/// Translates and validates a shader pair without touching a GPU.
pub fn check_program(
    vertex: &str,
    fragment: &str,
    encoding: OutputEncoding,
) -> Result<CheckedProgram, FilterError> {
    let translated = translate(vertex, fragment, encoding)?;
    parse_program(&translated)?;
    Ok(CheckedProgram { translated })
}

/// Parses and validates both stages of a translated program.
pub(crate) fn parse_program(translated: &TranslatedProgram) -> Result<(Module, Module), FilterError> {
    let vertex = parse_stage(&translated.vertex, ShaderStageKind::Vertex)?;
    let fragment = parse_stage(&translated.fragment, ShaderStageKind::Fragment)?;
    Ok((vertex, fragment))
}

fn parse_stage(source: &str, kind: ShaderStageKind) -> Result<Module, FilterError> {
    let stage = match kind {
        ShaderStageKind::Vertex => ShaderStage::Vertex,
        _ => ShaderStage::Fragment,
    };
    let module = glsl::Frontend::default()
        .parse(&glsl::Options::from(stage), source)
        .map_err(|errors| FilterError::compile(kind, errors.emit_to_string(source)))?;
    Validator::new(ValidationFlags::all(), Capabilities::all())
        .validate(&module)
        .map_err(|err| FilterError::compile(kind, err.emit_to_string(source)))?;
    Ok(module)
}

/// Hands validated modules to the device.
pub(crate) fn create_modules(
    device: &wgpu::Device,
    (vertex, fragment): (Module, Module),
) -> (wgpu::ShaderModule, wgpu::ShaderModule) {
    let vertex = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("filter vertex"),
        source: wgpu::ShaderSource::Naga(Cow::Owned(vertex)),
    });
    let fragment = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("filter fragment"),
        source: wgpu::ShaderSource::Naga(Cow::Owned(fragment)),
    });
    (vertex, fragment)
}
