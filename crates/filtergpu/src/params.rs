//! Pending uniform values and the per-pass uniform block they are written to.

use std::collections::BTreeMap;
use std::fmt;

use crate::program::{UniformKind, UniformLayout, LUMINANCE_OFFSET, TEXELSIZE_OFFSET};

/// A typed uniform payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamValue {
    Float2([f32; 2]),
    Float1(f32),
    Int2([i32; 2]),
    Int1(i32),
}

impl ParamValue {
    /// Uniform type this value can be written to.
    pub fn kind(&self) -> UniformKind {
        match self {
            ParamValue::Float2(_) => UniformKind::Vec2,
            ParamValue::Float1(_) => UniformKind::Float,
            ParamValue::Int2(_) => UniformKind::IVec2,
            ParamValue::Int1(_) => UniformKind::Int,
        }
    }

    fn bytes(&self) -> &[u8] {
        match self {
            ParamValue::Float2(v) => bytemuck::cast_slice(v),
            ParamValue::Float1(v) => bytemuck::bytes_of(v),
            ParamValue::Int2(v) => bytemuck::cast_slice(v),
            ParamValue::Int1(v) => bytemuck::bytes_of(v),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Float2([x, y]) => write!(f, "vec2({x}, {y})"),
            ParamValue::Float1(v) => write!(f, "{v}"),
            ParamValue::Int2([x, y]) => write!(f, "ivec2({x}, {y})"),
            ParamValue::Int1(v) => write!(f, "{v}"),
        }
    }
}

/// Uniform values staged by callers, keyed by name; the last write wins.
#[derive(Debug, Clone, Default)]
pub struct ParameterStore {
    values: BTreeMap<String, ParamValue>,
}

/// Names `apply_all` could not write.
#[derive(Debug, Default, PartialEq)]
pub struct ApplyReport {
    /// Parameters the program does not declare.
    pub unused: Vec<String>,
    /// Parameters whose type does not match the declaration.
    pub mismatched: Vec<(String, UniformKind, UniformKind)>,
}

impl ParameterStore {
    pub fn set(&mut self, name: impl Into<String>, value: ParamValue) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<ParamValue> {
        self.values.get(name).copied()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Writes every stored value whose name the program declares.
    pub fn apply_all(&self, block: &mut UniformBlock) -> ApplyReport {
        let mut report = ApplyReport::default();
        for (name, value) in &self.values {
            let Some(slot) = block.layout().slot(name) else {
                // Undeclared or optimised out: nothing to write.
                report.unused.push(name.clone());
                continue;
            };
            if slot.kind != value.kind() {
                report
                    .mismatched
                    .push((name.clone(), slot.kind, value.kind()));
                continue;
            }
            block.write(slot.offset, value.bytes());
        }
        report
    }
}

/// CPU copy of a program's std140 uniform block.
pub struct UniformBlock<'a> {
    layout: &'a UniformLayout,
    bytes: Vec<u8>,
}

impl<'a> UniformBlock<'a> {
    pub fn new(layout: &'a UniformLayout) -> Self {
        Self {
            layout,
            bytes: vec![0; layout.size()],
        }
    }

    pub fn layout(&self) -> &'a UniformLayout {
        self.layout
    }

    /// Sets `texelsize` to the reciprocal of the source dimensions.
    pub fn set_texel_size(&mut self, width: u32, height: u32) {
        let texel = [1.0 / width as f32, 1.0 / height as f32];
        self.write(TEXELSIZE_OFFSET, bytemuck::cast_slice(&texel));
    }

    pub fn set_luminance(&mut self, luminance: bool) {
        self.write(LUMINANCE_OFFSET, bytemuck::bytes_of(&i32::from(luminance)));
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn write(&mut self, offset: usize, data: &[u8]) {
        self.bytes[offset..offset + data.len()].copy_from_slice(data);
    }
}
