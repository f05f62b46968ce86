//! Shader program staging, translation, and uniform reflection.
//!
//! Callers hand over GLSL ES 1.00 style sources (`attribute`, `varying`,
//! `gl_FragColor`, `texture2D`, loose `uniform` declarations). The GPU side
//! consumes Vulkan flavoured GLSL 450, so every program is rewritten before
//! compilation:
//!
//! 1. `#version`, `#extension`, and `precision` statements are dropped and
//!    precision qualifiers stripped.
//! 2. Loose non-opaque uniforms are gathered into a single std140 block whose
//!    layout doubles as the program's uniform reflection ([`UniformLayout`]).
//! 3. `attribute`/`varying` declarations receive explicit locations; varyings
//!    are matched across stages by name.
//! 4. The user `main` is renamed and wrapped by a generated entry point that
//!    flips clip-space Y (so output rows keep memory order) and, for RGB565
//!    targets, packs the fragment color into a 16-bit word.
//!
//! Declaration lines are replaced one-for-one, so the user code keeps its
//! shape and compiler diagnostics quote it verbatim.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{FilterError, ShaderStageKind};
use crate::types::OutputEncoding;

/// Uniform holding the reciprocal source texel size, set on every pass.
pub const TEXELSIZE_UNIFORM: &str = "texelsize";
/// Sampler name bound to the source texture.
pub const SOURCE_SAMPLER: &str = "tex";

pub(crate) const TEXELSIZE_OFFSET: usize = 0;
pub(crate) const LUMINANCE_OFFSET: usize = 8;
const FIRST_USER_OFFSET: usize = 12;
const BLOCK_ALIGNMENT: usize = 16;

const PRECISION_QUALIFIERS: [&str; 3] = ["lowp", "mediump", "highp"];

/// Uniform types a program may declare outside of samplers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformKind {
    Float,
    Vec2,
    Int,
    IVec2,
}

impl UniformKind {
    fn from_glsl(ty: &str) -> Option<Self> {
        match ty {
            "float" => Some(UniformKind::Float),
            "vec2" => Some(UniformKind::Vec2),
            "int" => Some(UniformKind::Int),
            "ivec2" => Some(UniformKind::IVec2),
            _ => None,
        }
    }

    pub fn glsl(self) -> &'static str {
        match self {
            UniformKind::Float => "float",
            UniformKind::Vec2 => "vec2",
            UniformKind::Int => "int",
            UniformKind::IVec2 => "ivec2",
        }
    }

    /// Byte size inside a std140 block; scalars and two-component vectors are
    /// aligned to their own size.
    pub fn size(self) -> usize {
        match self {
            UniformKind::Float | UniformKind::Int => 4,
            UniformKind::Vec2 | UniformKind::IVec2 => 8,
        }
    }
}

impl fmt::Display for UniformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.glsl())
    }
}

/// Location of one uniform inside the program's uniform block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformSlot {
    pub offset: usize,
    pub kind: UniformKind,
}

/// Reflected uniform block of a translated program.
///
/// `texelsize` always lives at offset 0 followed by a private luminance flag;
/// caller-declared uniforms follow in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformLayout {
    slots: BTreeMap<String, UniformSlot>,
    size: usize,
}

impl UniformLayout {
    fn new(declared: &[(String, UniformKind)]) -> Self {
        let mut slots = BTreeMap::new();
        slots.insert(
            TEXELSIZE_UNIFORM.to_string(),
            UniformSlot {
                offset: TEXELSIZE_OFFSET,
                kind: UniformKind::Vec2,
            },
        );

        let mut cursor = FIRST_USER_OFFSET;
        for (name, kind) in declared {
            cursor = cursor.next_multiple_of(kind.size());
            slots.insert(
                name.clone(),
                UniformSlot {
                    offset: cursor,
                    kind: *kind,
                },
            );
            cursor += kind.size();
        }

        Self {
            slots,
            size: cursor.next_multiple_of(BLOCK_ALIGNMENT),
        }
    }

    /// Resolves a uniform by name; `None` means the program does not use it.
    pub fn slot(&self, name: &str) -> Option<UniformSlot> {
        self.slots.get(name).copied()
    }

    /// Size in bytes of the uniform block, padded to 16 bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Declared uniforms (including `texelsize`) sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, UniformSlot)> {
        self.slots.iter().map(|(name, slot)| (name.as_str(), *slot))
    }
}

/// Type of the single vertex attribute fed from the quad buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKind {
    Vec2,
    Vec3,
    Vec4,
}

impl AttributeKind {
    fn from_glsl(ty: &str) -> Option<Self> {
        match ty {
            "vec2" => Some(AttributeKind::Vec2),
            "vec3" => Some(AttributeKind::Vec3),
            "vec4" => Some(AttributeKind::Vec4),
            _ => None,
        }
    }
}

/// Program rewritten into the GLSL dialect the device compiles.
#[derive(Debug, Clone)]
pub struct TranslatedProgram {
    pub vertex: String,
    pub fragment: String,
    pub layout: UniformLayout,
    pub attribute: Option<AttributeKind>,
    pub encoding: OutputEncoding,
}

enum Piece {
    Code(String),
    Varying { ty: String, names: Vec<String> },
    Attribute { ty: String, name: String },
}

/// Pieces of one source line. Declarations that only feed the uniform block
/// leave nothing behind.
type Line = Vec<Piece>;

struct Declaration {
    ty: String,
    names: Vec<String>,
}

/// Rewrites a caller-supplied shader pair for the given target encoding.
pub fn translate(
    vertex: &str,
    fragment: &str,
    encoding: OutputEncoding,
) -> Result<TranslatedProgram, FilterError> {
    let mut uniforms: Vec<(String, UniformKind)> = Vec::new();
    let vertex_lines = scan(vertex, ShaderStageKind::Vertex, &mut uniforms)?;
    let fragment_lines = scan(fragment, ShaderStageKind::Fragment, &mut uniforms)?;

    let mut attribute = None;
    for piece in vertex_lines.iter().flatten() {
        if let Piece::Attribute { ty, name } = piece {
            if attribute.is_some() {
                return Err(FilterError::compile(
                    ShaderStageKind::Vertex,
                    format!("attribute '{name}': only one vertex attribute is supported"),
                ));
            }
            attribute = Some(AttributeKind::from_glsl(ty).ok_or_else(|| {
                FilterError::compile(
                    ShaderStageKind::Vertex,
                    format!("attribute '{name}' must be vec2, vec3, or vec4 (found {ty})"),
                )
            })?);
        }
    }

    let mut locations: BTreeMap<String, usize> = BTreeMap::new();
    for piece in vertex_lines.iter().flatten() {
        if let Piece::Varying { names, .. } = piece {
            for name in names {
                let next = locations.len();
                locations.entry(name.clone()).or_insert(next);
            }
        }
    }

    let layout = UniformLayout::new(&uniforms);
    let block = uniform_block(&uniforms);

    let mut vertex_out = format!("#version 450\n{block}");
    for line in &vertex_lines {
        render_line(line, ShaderStageKind::Vertex, &uniforms, &mut locations, &mut vertex_out);
    }
    vertex_out.push_str(VERTEX_FOOTER);

    let (output_type, footer) = match encoding {
        OutputEncoding::Rgba8 => ("vec4", RGBA_FOOTER),
        OutputEncoding::Rgb565 => ("uint", RGB565_FOOTER),
    };
    let mut fragment_out = format!(
        "#version 450\nlayout(location = 0) out {output_type} filter_out;\n{block}{FRAGMENT_PRELUDE}"
    );
    for line in &fragment_lines {
        render_line(line, ShaderStageKind::Fragment, &uniforms, &mut locations, &mut fragment_out);
    }
    fragment_out.push_str(footer);

    Ok(TranslatedProgram {
        vertex: vertex_out,
        fragment: fragment_out,
        layout,
        attribute,
        encoding,
    })
}

fn scan(
    source: &str,
    stage: ShaderStageKind,
    uniforms: &mut Vec<(String, UniformKind)>,
) -> Result<Vec<Line>, FilterError> {
    let cleaned = strip_comments(source);
    let mut lines = Vec::new();
    // A declaration whose ';' has not been seen yet, with its first line.
    let mut pending: Option<(String, usize)> = None;

    for (index, text) in cleaned.lines().enumerate() {
        let line_no = index + 1;
        let mut pieces = Vec::new();

        let directive = text.trim_start();
        if pending.is_none() && directive.starts_with('#') {
            if !(directive.starts_with("#version") || directive.starts_with("#extension")) {
                pieces.push(Piece::Code(text.to_string()));
            }
            lines.push(pieces);
            continue;
        }

        for segment in text.split_inclusive(';') {
            let (statement, first_line) = match pending.take() {
                Some((mut partial, first_line)) => {
                    partial.push(' ');
                    partial.push_str(segment);
                    (partial, first_line)
                }
                None if is_declaration(segment) => (segment.to_string(), line_no),
                None => {
                    pieces.push(Piece::Code(segment.to_string()));
                    continue;
                }
            };
            match statement.trim_end().strip_suffix(';') {
                Some(body) => declare(body, stage, first_line, uniforms, &mut pieces)?,
                None => pending = Some((statement, first_line)),
            }
        }
        lines.push(pieces);
    }

    if let Some((_, first_line)) = pending {
        return Err(FilterError::compile(
            stage,
            format!("line {first_line}: declaration is missing its terminating ';'"),
        ));
    }
    Ok(lines)
}

/// Blanks out `//` and `/* */` comments. Newlines inside block comments are
/// kept so line numbers still match the caller's source.
fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    while let Some(ch) = chars.next() {
        match (ch, chars.peek().copied()) {
            ('/', Some('/')) => {
                while chars.next_if(|next| *next != '\n').is_some() {}
                out.push(' ');
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    if next == '\n' {
                        out.push('\n');
                    }
                    prev = next;
                }
                out.push(' ');
            }
            _ => out.push(ch),
        }
    }
    out
}

fn is_declaration(segment: &str) -> bool {
    matches!(
        segment.split_whitespace().next(),
        Some("precision" | "uniform" | "varying" | "attribute")
    )
}

/// Handles one declaration statement, `body` being its text without the `;`.
fn declare(
    body: &str,
    stage: ShaderStageKind,
    line_no: usize,
    uniforms: &mut Vec<(String, UniformKind)>,
    pieces: &mut Vec<Piece>,
) -> Result<(), FilterError> {
    let body = body.trim();
    let (keyword, rest) = body.split_once(char::is_whitespace).unwrap_or((body, ""));
    match keyword {
        "uniform" => {
            let decl = parse_declaration(rest, stage, line_no)?;
            register_uniforms(decl, stage, line_no, uniforms)?;
        }
        "varying" => {
            let decl = parse_declaration(rest, stage, line_no)?;
            pieces.push(Piece::Varying {
                ty: decl.ty,
                names: decl.names,
            });
        }
        "attribute" => {
            if stage == ShaderStageKind::Fragment {
                return Err(FilterError::compile(
                    stage,
                    format!("line {line_no}: attributes are only valid in the vertex stage"),
                ));
            }
            let decl = parse_declaration(rest, stage, line_no)?;
            for name in decl.names {
                pieces.push(Piece::Attribute {
                    ty: decl.ty.clone(),
                    name,
                });
            }
        }
        // precision statements
        _ => {}
    }
    Ok(())
}

fn parse_declaration(
    rest: &str,
    stage: ShaderStageKind,
    line_no: usize,
) -> Result<Declaration, FilterError> {
    let mut tokens = rest
        .split(char::is_whitespace)
        .filter(|token| !token.is_empty() && !PRECISION_QUALIFIERS.contains(token));
    let ty = tokens.next().unwrap_or_default().to_string();
    let names: Vec<String> = tokens
        .collect::<Vec<_>>()
        .join(" ")
        .split(',')
        .map(|name| name.trim().to_string())
        .collect();

    if ty.is_empty() || names.iter().any(|name| !is_identifier(name)) {
        return Err(FilterError::compile(
            stage,
            format!("line {line_no}: unsupported declaration '{}' (arrays and initializers are not supported)", rest.trim()),
        ));
    }
    Ok(Declaration { ty, names })
}

fn register_uniforms(
    decl: Declaration,
    stage: ShaderStageKind,
    line_no: usize,
    uniforms: &mut Vec<(String, UniformKind)>,
) -> Result<(), FilterError> {
    if decl.ty == "sampler2D" {
        if let Some(name) = decl.names.iter().find(|name| *name != SOURCE_SAMPLER) {
            return Err(FilterError::compile(
                stage,
                format!("line {line_no}: sampler '{name}' is not bound; only '{SOURCE_SAMPLER}' is available"),
            ));
        }
        return Ok(());
    }

    let kind = UniformKind::from_glsl(&decl.ty).ok_or_else(|| {
        FilterError::compile(
            stage,
            format!(
                "line {line_no}: uniform type '{}' is not supported (use float, vec2, int, or ivec2)",
                decl.ty
            ),
        )
    })?;

    for name in decl.names {
        if name == TEXELSIZE_UNIFORM {
            if kind != UniformKind::Vec2 {
                return Err(FilterError::compile(
                    stage,
                    format!("line {line_no}: '{TEXELSIZE_UNIFORM}' must be declared as vec2"),
                ));
            }
            continue;
        }
        if name == SOURCE_SAMPLER || name.starts_with("filter_") || name.starts_with("gl_") {
            return Err(FilterError::compile(
                stage,
                format!("line {line_no}: uniform name '{name}' is reserved"),
            ));
        }
        match uniforms.iter().find(|(existing, _)| *existing == name) {
            Some((_, existing)) if *existing != kind => {
                return Err(FilterError::compile(
                    ShaderStageKind::Link,
                    format!("uniform '{name}' is declared as both {existing} and {kind}"),
                ));
            }
            Some(_) => {}
            None => uniforms.push((name, kind)),
        }
    }
    Ok(())
}

fn render_line(
    line: &Line,
    stage: ShaderStageKind,
    uniforms: &[(String, UniformKind)],
    locations: &mut BTreeMap<String, usize>,
    out: &mut String,
) {
    let mut rendered = String::new();
    for piece in line {
        let text = match piece {
            Piece::Code(code) => rewrite_identifiers(code, |ident| rename(ident, stage, uniforms))
                .replace("(void)", "()"),
            Piece::Varying { ty, names } => {
                let direction = if stage == ShaderStageKind::Vertex { "out" } else { "in" };
                let decls: Vec<String> = names
                    .iter()
                    .map(|name| {
                        let next = locations.len();
                        let location = *locations.entry(name.clone()).or_insert(next);
                        format!("layout(location = {location}) {direction} {ty} {name};")
                    })
                    .collect();
                decls.join(" ")
            }
            Piece::Attribute { ty, name } => format!("layout(location = 0) in {ty} {name};"),
        };
        if !rendered.is_empty()
            && !rendered.ends_with(char::is_whitespace)
            && !text.starts_with(char::is_whitespace)
        {
            rendered.push(' ');
        }
        rendered.push_str(&text);
    }
    out.push_str(&rendered);
    out.push('\n');
}

fn rename(ident: &str, stage: ShaderStageKind, uniforms: &[(String, UniformKind)]) -> Option<String> {
    if PRECISION_QUALIFIERS.contains(&ident) {
        return Some(String::new());
    }
    match ident {
        "main" => return Some("filter_user_main".into()),
        TEXELSIZE_UNIFORM => return Some("filter_uniforms.filter_texelsize".into()),
        "gl_FragColor" if stage == ShaderStageKind::Fragment => {
            return Some("filter_frag_color".into())
        }
        "texture2D" | "texture" if stage == ShaderStageKind::Fragment => {
            return Some("filter_sample".into())
        }
        _ => {}
    }
    uniforms
        .iter()
        .any(|(name, _)| name == ident)
        .then(|| format!("filter_uniforms.filter_u_{ident}"))
}

/// Applies `map` to every identifier in `line` that is not a member access.
fn rewrite_identifiers(line: &str, map: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    let mut prev: Option<char> = None;

    while let Some(ch) = rest.chars().next() {
        let token_end = if ch.is_ascii_alphabetic() || ch == '_' {
            rest.find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(rest.len())
        } else if ch.is_ascii_digit() {
            rest.find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '.'))
                .unwrap_or(rest.len())
        } else {
            ch.len_utf8()
        };

        let token = &rest[..token_end];
        let is_identifier = ch.is_ascii_alphabetic() || ch == '_';
        match map(token) {
            Some(replacement) if is_identifier && prev != Some('.') => out.push_str(&replacement),
            _ => out.push_str(token),
        }
        if !ch.is_whitespace() {
            prev = token.chars().last();
        }
        rest = &rest[token_end..];
    }
    out
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn uniform_block(uniforms: &[(String, UniformKind)]) -> String {
    let mut block = String::from(
        "layout(std140, set = 0, binding = 0) uniform FilterUniforms {\n    vec2 filter_texelsize;\n    int filter_luminance;\n",
    );
    for (name, kind) in uniforms {
        block.push_str(&format!("    {kind} filter_u_{name};\n"));
    }
    block.push_str("} filter_uniforms;\n");
    block
}

/// Source sampling helper; luminance textures replicate R into RGB with A=1.
const FRAGMENT_PRELUDE: &str = r"layout(set = 0, binding = 1) uniform texture2D filter_source;
layout(set = 0, binding = 2) uniform sampler filter_source_sampler;
const int tex = 0;
vec4 filter_frag_color;

vec4 filter_sample(int unit, vec2 uv) {
    vec4 texel = texture(sampler2D(filter_source, filter_source_sampler), uv);
    if (filter_uniforms.filter_luminance != 0) {
        return vec4(texel.rrr, 1.0);
    }
    return texel;
}
";

const VERTEX_FOOTER: &str = r"void main() {
    filter_user_main();
    // Row 0 of the source must land in row 0 of the read-back.
    gl_Position.y = -gl_Position.y;
}
";

const RGBA_FOOTER: &str = r"void main() {
    filter_user_main();
    filter_out = filter_frag_color;
}
";

const RGB565_FOOTER: &str = r"void main() {
    filter_user_main();
    uvec3 q = uvec3(round(clamp(filter_frag_color.rgb, 0.0, 1.0) * vec3(31.0, 63.0, 31.0)));
    filter_out = (q.r << 11u) | (q.g << 5u) | q.b;
}
";

/// Caller-supplied shader pair, kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramSource {
    pub vertex: String,
    pub fragment: String,
}

/// A program built by a device together with the layout it was built from.
#[derive(Debug)]
pub(crate) struct CompiledProgram<P> {
    pub handle: P,
    pub layout: UniformLayout,
    pub encoding: OutputEncoding,
}

enum ProgramState<P> {
    Empty,
    Pending,
    Ready(CompiledProgram<P>),
    Failed(FilterError),
}

/// Staged source plus the lazily built program.
///
/// `set_source` only records text and marks the program dirty; the build
/// happens in `ensure_compiled`, which the pipeline calls from the render
/// thread. A failed build sticks until new source is staged.
pub(crate) struct ShaderProgram<P> {
    source: Option<ProgramSource>,
    state: ProgramState<P>,
    builds: u64,
}

impl<P> ShaderProgram<P> {
    pub fn new() -> Self {
        Self {
            source: None,
            state: ProgramState::Empty,
            builds: 0,
        }
    }

    pub fn set_source(&mut self, vertex: String, fragment: String) {
        self.source = Some(ProgramSource { vertex, fragment });
        self.state = ProgramState::Pending;
    }

    pub fn source(&self) -> Option<&ProgramSource> {
        self.source.as_ref()
    }

    pub fn is_dirty(&self) -> bool {
        matches!(self.state, ProgramState::Pending)
    }

    /// Number of build attempts since creation.
    pub fn builds(&self) -> u64 {
        self.builds
    }

    /// Builds the program if it is dirty or was built for another encoding.
    pub fn ensure_compiled(
        &mut self,
        encoding: OutputEncoding,
        build: impl FnOnce(&TranslatedProgram) -> Result<P, FilterError>,
    ) -> Result<&CompiledProgram<P>, FilterError> {
        let needs_build = match &self.state {
            ProgramState::Empty => {
                return Err(FilterError::ContractViolation(
                    "no shader program has been set".into(),
                ))
            }
            ProgramState::Failed(err) => return Err(err.clone()),
            ProgramState::Pending => true,
            ProgramState::Ready(compiled) => compiled.encoding != encoding,
        };

        if needs_build {
            if let Some(source) = &self.source {
                self.builds += 1;
                let result = translate(&source.vertex, &source.fragment, encoding).and_then(
                    |translated| {
                        let handle = build(&translated)?;
                        Ok(CompiledProgram {
                            handle,
                            layout: translated.layout,
                            encoding,
                        })
                    },
                );
                self.state = match result {
                    Ok(compiled) => ProgramState::Ready(compiled),
                    Err(err) => ProgramState::Failed(err),
                };
            }
        }

        match &self.state {
            ProgramState::Ready(compiled) => Ok(compiled),
            ProgramState::Failed(err) => Err(err.clone()),
            ProgramState::Empty | ProgramState::Pending => Err(FilterError::ContractViolation(
                "no shader program has been set".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shaders::{IDENTITY_FRAGMENT, PASSTHROUGH_VERTEX};

    fn build_ok(_: &TranslatedProgram) -> Result<u32, FilterError> {
        Ok(7)
    }

    #[test]
    fn identity_pair_is_rewritten_for_the_device() {
        let program =
            translate(PASSTHROUGH_VERTEX, IDENTITY_FRAGMENT, OutputEncoding::Rgba8).unwrap();

        assert!(program.vertex.starts_with("#version 450\n"));
        assert!(program.vertex.contains("layout(location = 0) in vec4 vertex;"));
        assert!(program.vertex.contains("layout(location = 0) out vec2 tcoord;"));
        assert!(program.vertex.contains("void filter_user_main()"));
        assert!(!program.vertex.contains("precision"));

        assert!(program.fragment.contains("layout(location = 0) in vec2 tcoord;"));
        assert!(program.fragment.contains("filter_frag_color = filter_sample(tex, tcoord);"));
        assert!(program.fragment.contains("layout(location = 0) out vec4 filter_out;"));
        assert!(!program.fragment.contains("uniform sampler2D tex"));
        assert_eq!(program.attribute, Some(AttributeKind::Vec4));
    }

    #[test]
    fn rgb565_targets_pack_in_the_shader() {
        let program =
            translate(PASSTHROUGH_VERTEX, IDENTITY_FRAGMENT, OutputEncoding::Rgb565).unwrap();
        assert!(program.fragment.contains("layout(location = 0) out uint filter_out;"));
        assert!(program.fragment.contains("(q.r << 11u) | (q.g << 5u) | q.b"));
    }

    #[test]
    fn uniform_layout_follows_std140() {
        let fragment = r"
            varying vec2 tcoord;
            uniform sampler2D tex;
            uniform mediump float gain;
            uniform vec2 offset;
            uniform int mode, level;
            uniform ivec2 window;
            void main(void) {
                gl_FragColor = texture2D(tex, tcoord + offset * texelsize) * gain;
            }
        ";
        let program = translate(PASSTHROUGH_VERTEX, fragment, OutputEncoding::Rgba8).unwrap();
        let layout = &program.layout;

        assert_eq!(
            layout.slot("texelsize"),
            Some(UniformSlot { offset: 0, kind: UniformKind::Vec2 })
        );
        assert_eq!(layout.slot("gain").unwrap().offset, 12);
        assert_eq!(layout.slot("offset").unwrap().offset, 16);
        assert_eq!(layout.slot("mode").unwrap().offset, 24);
        assert_eq!(layout.slot("level").unwrap().offset, 28);
        assert_eq!(layout.slot("window").unwrap().offset, 32);
        assert_eq!(layout.size(), 48);
        assert_eq!(layout.slot("missing"), None);

        assert!(program.fragment.contains("    float filter_u_gain;\n"));
        assert!(program.fragment.contains(
            "filter_sample(tex, tcoord + filter_uniforms.filter_u_offset * filter_uniforms.filter_texelsize) * filter_uniforms.filter_u_gain"
        ));
    }

    #[test]
    fn member_access_is_not_renamed() {
        let rewritten = rewrite_identifiers("v.gain = gain + 1.5;", |ident| {
            (ident == "gain").then(|| "u.gain".to_string())
        });
        assert_eq!(rewritten, "v.gain = u.gain + 1.5;");
    }

    #[test]
    fn varyings_are_matched_by_name() {
        let vertex = r"
            attribute vec2 corner;
            varying vec2 unused;
            varying vec2 tcoord;
            void main() { unused = corner; tcoord = corner; gl_Position = vec4(corner, 0.0, 1.0); }
        ";
        let fragment = r"
            varying vec2 tcoord;
            void main() { gl_FragColor = texture2D(tex, tcoord); }
        ";
        let program = translate(vertex, fragment, OutputEncoding::Rgba8).unwrap();
        assert!(program.fragment.contains("layout(location = 1) in vec2 tcoord;"));
        assert_eq!(program.attribute, Some(AttributeKind::Vec2));
    }

    #[test]
    fn declarations_keep_their_lines() {
        let program =
            translate(PASSTHROUGH_VERTEX, IDENTITY_FRAGMENT, OutputEncoding::Rgba8).unwrap();
        let generated = program.fragment.lines().count();
        // The `precision` line before it is blanked, not removed.
        let varying = program
            .fragment
            .lines()
            .position(|line| line == "layout(location = 0) in vec2 tcoord;")
            .unwrap();
        assert_eq!(
            generated,
            varying - 1 + IDENTITY_FRAGMENT.lines().count() + RGBA_FOOTER.lines().count()
        );
        assert!(!program.fragment.contains("uniform vec2 texelsize"));
    }

    #[test]
    fn comments_are_not_declarations() {
        let fragment = "precision mediump float;
varying vec2 tcoord;
/* blur
   uniform float ignored; */
uniform float gain; // uniform int commented;
void main(void) { gl_FragColor = texture2D(tex, tcoord) * gain; /* trailing */ }
";
        let program = translate(PASSTHROUGH_VERTEX, fragment, OutputEncoding::Rgba8).unwrap();
        assert_eq!(program.layout.slot("ignored"), None);
        assert_eq!(program.layout.slot("commented"), None);
        assert_eq!(program.layout.slot("gain").unwrap().offset, 12);
        assert!(!program.fragment.contains("blur"));

        let varying = program
            .fragment
            .lines()
            .position(|line| line == "layout(location = 0) in vec2 tcoord;")
            .unwrap();
        assert_eq!(
            program.fragment.lines().count(),
            varying - 1 + fragment.lines().count() + RGBA_FOOTER.lines().count()
        );
    }

    #[test]
    fn statements_split_on_semicolons() {
        let fragment = "precision mediump float; varying vec2 tcoord;
uniform float a; uniform float b;
uniform vec2
    spread;
void main(void) {
    vec4 acc = vec4(0.0);
    for (int i = 0; i < 3; i++) { acc += texture2D(tex, tcoord + spread * float(i)); }
    gl_FragColor = acc * a * b;
}
";
        let program = translate(PASSTHROUGH_VERTEX, fragment, OutputEncoding::Rgba8).unwrap();
        assert_eq!(program.layout.slot("a").unwrap().offset, 12);
        assert_eq!(program.layout.slot("b").unwrap().offset, 16);
        assert_eq!(program.layout.slot("spread").unwrap().offset, 24);
        assert!(program.fragment.contains("layout(location = 0) in vec2 tcoord;"));
        assert!(program.fragment.contains("for (int i = 0; i < 3; i++)"));

        let err = translate(
            PASSTHROUGH_VERTEX,
            "uniform float unterminated\nvoid main() {}\n",
            OutputEncoding::Rgba8,
        )
        .unwrap_err();
        assert!(matches!(err, FilterError::Compile { .. }));
    }

    #[test]
    fn rejects_unsupported_declarations() {
        let err = translate(
            PASSTHROUGH_VERTEX,
            "uniform mat4 transform;\nvoid main() {}\n",
            OutputEncoding::Rgba8,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            FilterError::Compile { stage: ShaderStageKind::Fragment, .. }
        ));

        let err = translate(
            PASSTHROUGH_VERTEX,
            "uniform float weights[4];\nvoid main() {}\n",
            OutputEncoding::Rgba8,
        )
        .unwrap_err();
        assert!(matches!(err, FilterError::Compile { .. }));

        let err = translate(
            PASSTHROUGH_VERTEX,
            "attribute vec4 vertex;\nvoid main() {}\n",
            OutputEncoding::Rgba8,
        )
        .unwrap_err();
        assert!(matches!(err, FilterError::Compile { .. }));

        let err = translate(
            PASSTHROUGH_VERTEX,
            "uniform sampler2D other;\nvoid main() {}\n",
            OutputEncoding::Rgba8,
        )
        .unwrap_err();
        assert!(matches!(err, FilterError::Compile { .. }));
    }

    #[test]
    fn conflicting_uniform_types_fail_at_link() {
        let vertex = "attribute vec4 vertex;\nuniform float scale;\nvoid main() { gl_Position = vertex * scale; }\n";
        let fragment = "uniform int scale;\nvoid main() { gl_FragColor = vec4(1.0); }\n";
        let err = translate(vertex, fragment, OutputEncoding::Rgba8).unwrap_err();
        assert!(matches!(
            err,
            FilterError::Compile { stage: ShaderStageKind::Link, .. }
        ));
    }

    #[test]
    fn program_builds_once_per_staged_source() {
        let mut program: ShaderProgram<u32> = ShaderProgram::new();
        assert!(matches!(
            program.ensure_compiled(OutputEncoding::Rgba8, build_ok),
            Err(FilterError::ContractViolation(_))
        ));

        program.set_source(PASSTHROUGH_VERTEX.into(), IDENTITY_FRAGMENT.into());
        assert!(program.is_dirty());
        for _ in 0..5 {
            let compiled = program.ensure_compiled(OutputEncoding::Rgba8, build_ok).unwrap();
            assert_eq!(compiled.handle, 7);
        }
        assert!(!program.is_dirty());
        assert_eq!(program.builds(), 1);

        program.ensure_compiled(OutputEncoding::Rgb565, build_ok).unwrap();
        assert_eq!(program.builds(), 2);
    }

    #[test]
    fn failed_builds_stick_until_new_source() {
        let mut program: ShaderProgram<u32> = ShaderProgram::new();
        program.set_source(PASSTHROUGH_VERTEX.into(), IDENTITY_FRAGMENT.into());

        for _ in 0..3 {
            let err = program
                .ensure_compiled(OutputEncoding::Rgba8, |_| {
                    Err(FilterError::compile(ShaderStageKind::Fragment, "boom"))
                })
                .unwrap_err();
            assert!(matches!(err, FilterError::Compile { .. }));
        }
        assert_eq!(program.builds(), 1);

        program.set_source(PASSTHROUGH_VERTEX.into(), IDENTITY_FRAGMENT.into());
        program.ensure_compiled(OutputEncoding::Rgba8, build_ok).unwrap();
        assert_eq!(program.builds(), 2);
    }
}
