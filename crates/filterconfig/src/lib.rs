//! TOML presets describing a filter run: shader sources, output target, GPU
//! options, and typed uniform parameters.
//!
//! ```toml
//! version = 1
//!
//! [shaders]
//! fragment = "edges.frag"
//!
//! [output]
//! encoding = "rgb565"
//! width = 320
//! height = 240
//!
//! [params]
//! threshold = { kind = "float", value = 0.25 }
//! offset = { kind = "vec2", value = [1.0, 0.0] }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse preset: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid preset: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FilterPreset {
    pub version: u32,
    pub shaders: ShaderPaths,
    #[serde(default)]
    pub output: OutputSettings,
    #[serde(default)]
    pub gpu: GpuSettings,
    #[serde(default)]
    pub params: BTreeMap<String, ParamSetting>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ShaderPaths {
    /// Falls back to the built-in passthrough vertex shader.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertex: Option<PathBuf>,
    pub fragment: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OutputSettings {
    #[serde(default)]
    pub encoding: EncodingSetting,
    /// Output size; defaults to the input image size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GpuSettings {
    #[serde(default)]
    pub power: PowerSetting,
    #[serde(default)]
    pub thread_policy: ThreadPolicySetting,
    /// Scoped device error check every N passes; 0 disables it.
    #[serde(default)]
    pub error_check_interval: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodingSetting {
    Rgb565,
    #[default]
    Rgba8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerSetting {
    #[default]
    Low,
    High,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadPolicySetting {
    #[default]
    Rebind,
    Pinned,
}

/// A typed uniform value, written `{ kind = "vec2", value = [1.0, 2.0] }`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum ParamSetting {
    Float(f32),
    Vec2([f32; 2]),
    Int(i32),
    IVec2([i32; 2]),
}

impl ParamSetting {
    /// Parses a command-line assignment such as `gain=f1:0.5`,
    /// `offset=vec2:1,-1`, or `taps=int:5`.
    pub fn parse_assignment(raw: &str) -> Result<(String, Self), ConfigError> {
        let invalid = |reason: &str| ConfigError::Invalid(format!("parameter '{raw}': {reason}"));

        let (name, typed) = raw
            .split_once('=')
            .ok_or_else(|| invalid("expected name=kind:value"))?;
        let name = name.trim();
        if !is_identifier(name) {
            return Err(invalid("name must be a GLSL identifier"));
        }
        let (kind, values) = typed
            .split_once(':')
            .ok_or_else(|| invalid("expected kind:value after '='"))?;
        let values: Vec<&str> = values.split(',').map(str::trim).collect();

        let floats = || -> Result<Vec<f32>, ConfigError> {
            values
                .iter()
                .map(|v| v.parse::<f32>().map_err(|_| invalid("expected float values")))
                .collect()
        };
        let ints = || -> Result<Vec<i32>, ConfigError> {
            values
                .iter()
                .map(|v| v.parse::<i32>().map_err(|_| invalid("expected integer values")))
                .collect()
        };

        let setting = match (kind.trim().to_ascii_lowercase().as_str(), values.len()) {
            ("f1" | "float", 1) => ParamSetting::Float(floats()?[0]),
            ("f2" | "vec2", 2) => {
                let v = floats()?;
                ParamSetting::Vec2([v[0], v[1]])
            }
            ("i1" | "int", 1) => ParamSetting::Int(ints()?[0]),
            ("i2" | "ivec2", 2) => {
                let v = ints()?;
                ParamSetting::IVec2([v[0], v[1]])
            }
            ("f1" | "float" | "i1" | "int", n) => {
                return Err(invalid(&format!("expected 1 value, got {n}")))
            }
            ("f2" | "vec2" | "i2" | "ivec2", n) => {
                return Err(invalid(&format!("expected 2 values, got {n}")))
            }
            (other, _) => {
                return Err(invalid(&format!(
                    "unknown kind '{other}' (use f1, f2, i1, i2 or float, vec2, int, ivec2)"
                )))
            }
        };
        Ok((name.to_string(), setting))
    }
}

impl fmt::Display for ParamSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamSetting::Float(v) => write!(f, "float {v}"),
            ParamSetting::Vec2([x, y]) => write!(f, "vec2({x}, {y})"),
            ParamSetting::Int(v) => write!(f, "int {v}"),
            ParamSetting::IVec2([x, y]) => write!(f, "ivec2({x}, {y})"),
        }
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl FilterPreset {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: FilterPreset = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != 1 {
            return Err(ConfigError::Invalid(format!(
                "unsupported preset version {}; expected 1",
                self.version
            )));
        }

        if self.shaders.fragment.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "shaders.fragment must name a fragment shader file".into(),
            ));
        }
        if let Some(vertex) = &self.shaders.vertex {
            if vertex.as_os_str().is_empty() {
                return Err(ConfigError::Invalid(
                    "shaders.vertex must not be empty when present".into(),
                ));
            }
        }

        match (self.output.width, self.output.height) {
            (Some(0), _) | (_, Some(0)) => {
                return Err(ConfigError::Invalid(
                    "output width and height must be greater than zero".into(),
                ));
            }
            (Some(_), None) | (None, Some(_)) => {
                return Err(ConfigError::Invalid(
                    "output width and height must be set together".into(),
                ));
            }
            _ => {}
        }

        for name in self.params.keys() {
            if !is_identifier(name) {
                return Err(ConfigError::Invalid(format!(
                    "parameter name '{name}' is not a GLSL identifier"
                )));
            }
            if name == "texelsize" {
                return Err(ConfigError::Invalid(
                    "'texelsize' is set automatically and cannot be a parameter".into(),
                ));
            }
        }

        Ok(())
    }

    /// Output size when the preset fixes one.
    pub fn output_size(&self) -> Option<(u32, u32)> {
        self.output.width.zip(self.output.height)
    }

    /// Shader paths resolved against the directory holding the preset.
    pub fn resolve_shaders(&self, base: &Path) -> (Option<PathBuf>, PathBuf) {
        let resolve = |path: &Path| {
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                base.join(path)
            }
        };
        (
            self.shaders.vertex.as_deref().map(resolve),
            resolve(&self.shaders.fragment),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
version = 1

[shaders]
vertex = "quad.vert"
fragment = "/opt/filters/edges.frag"

[output]
encoding = "rgb565"
width = 320
height = 240

[gpu]
power = "high"
thread_policy = "pinned"
error_check_interval = 30

[params]
threshold = { kind = "float", value = 0.25 }
offset = { kind = "vec2", value = [1.0, -1] }
taps = { kind = "int", value = 5 }
window = { kind = "ivec2", value = [3, 3] }
"#;

    #[test]
    fn parses_sample_preset() {
        let preset = FilterPreset::from_toml_str(SAMPLE).expect("parse preset");
        assert_eq!(preset.output.encoding, EncodingSetting::Rgb565);
        assert_eq!(preset.output_size(), Some((320, 240)));
        assert_eq!(preset.gpu.power, PowerSetting::High);
        assert_eq!(preset.gpu.thread_policy, ThreadPolicySetting::Pinned);
        assert_eq!(preset.gpu.error_check_interval, 30);
        assert_eq!(preset.params["threshold"], ParamSetting::Float(0.25));
        assert_eq!(preset.params["offset"], ParamSetting::Vec2([1.0, -1.0]));
        assert_eq!(preset.params["taps"], ParamSetting::Int(5));
        assert_eq!(preset.params["window"], ParamSetting::IVec2([3, 3]));

        let (vertex, fragment) = preset.resolve_shaders(Path::new("/etc/presets"));
        assert_eq!(vertex, Some(PathBuf::from("/etc/presets/quad.vert")));
        assert_eq!(fragment, PathBuf::from("/opt/filters/edges.frag"));
    }

    #[test]
    fn minimal_preset_uses_defaults() {
        let preset = FilterPreset::from_toml_str(
            r#"
version = 1
[shaders]
fragment = "identity.frag"
"#,
        )
        .unwrap();
        assert!(preset.shaders.vertex.is_none());
        assert_eq!(preset.output.encoding, EncodingSetting::Rgba8);
        assert_eq!(preset.output_size(), None);
        assert_eq!(preset.gpu.thread_policy, ThreadPolicySetting::Rebind);
        assert!(preset.params.is_empty());
    }

    #[test]
    fn rejects_half_specified_output_size() {
        let err = FilterPreset::from_toml_str(
            r#"
version = 1
[shaders]
fragment = "identity.frag"
[output]
width = 640
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_unknown_versions_and_kinds() {
        let err = FilterPreset::from_toml_str(
            "version = 2\n[shaders]\nfragment = \"a.frag\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = FilterPreset::from_toml_str(
            "version = 1\n[shaders]\nfragment = \"a.frag\"\n[params]\nm = { kind = \"mat4\", value = 1 }\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn parses_command_line_assignments() {
        assert_eq!(
            ParamSetting::parse_assignment("gain=f1:0.5").unwrap(),
            ("gain".to_string(), ParamSetting::Float(0.5))
        );
        assert_eq!(
            ParamSetting::parse_assignment("offset=vec2:1, -2.5").unwrap(),
            ("offset".to_string(), ParamSetting::Vec2([1.0, -2.5]))
        );
        assert_eq!(
            ParamSetting::parse_assignment("taps=i1:7").unwrap().1,
            ParamSetting::Int(7)
        );
        assert_eq!(
            ParamSetting::parse_assignment("window=ivec2:3,5").unwrap().1,
            ParamSetting::IVec2([3, 5])
        );

        for bad in ["gain", "gain=0.5", "gain=f2:1", "gain=i1:0.5", "9x=f1:1", "m=mat4:1"] {
            assert!(
                ParamSetting::parse_assignment(bad).is_err(),
                "{bad} should be rejected"
            );
        }
    }
}
