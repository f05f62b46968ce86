use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use filterconfig::ParamSetting;
use filtergpu::{GpuPowerPreference, OutputEncoding};

#[derive(Parser, Debug)]
#[command(
    name = "filtergpu",
    author,
    version,
    about = "Run a GLSL filter over an image on the GPU",
    arg_required_else_help = false
)]
pub struct Cli {
    #[command(flatten)]
    pub run: RunArgs,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Args, Debug, Default)]
pub struct ShaderArgs {
    /// Filter preset TOML; explicit flags override its values.
    #[arg(long, value_name = "FILE")]
    pub preset: Option<PathBuf>,

    /// Vertex shader source (defaults to the built-in passthrough quad).
    #[arg(long, value_name = "FILE")]
    pub vertex: Option<PathBuf>,

    /// Fragment shader source.
    #[arg(long, value_name = "FILE")]
    pub fragment: Option<PathBuf>,

    /// Render target encoding: `rgba8` or `rgb565`.
    #[arg(long, value_name = "ENCODING", value_parser = parse_encoding)]
    pub encoding: Option<OutputEncoding>,
}

#[derive(Parser, Debug, Default)]
pub struct RunArgs {
    #[command(flatten)]
    pub shaders: ShaderArgs,

    /// Image to filter (png, jpeg, or bmp).
    #[arg(long, short, value_name = "PATH")]
    pub input: Option<PathBuf>,

    /// Where to write the result. RGB565 output is written as raw
    /// little-endian words unless the path ends in `.png`.
    #[arg(long, short, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Upload the input as a single-channel luminance texture.
    #[arg(long)]
    pub gray: bool,

    /// Render target size (e.g. `320x240`); defaults to the input size.
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_size)]
    pub size: Option<(u32, u32)>,

    /// Uniform assignment `name=kind:value` (kinds f1, f2, i1, i2); repeatable.
    #[arg(long = "param", value_name = "NAME=KIND:VALUE", value_parser = parse_param)]
    pub params: Vec<(String, ParamSetting)>,

    /// Adapter power preference: `low` or `high`.
    #[arg(long, value_name = "PROFILE", value_parser = parse_power)]
    pub power: Option<GpuPowerPreference>,

    /// Run the pass this many times, reporting pipeline counters at the end.
    #[arg(long, value_name = "COUNT", default_value_t = 1)]
    pub repeat: u32,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Translate and validate a shader pair without a GPU, then print its uniforms.
    Check(ShaderArgs),
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_encoding(value: &str) -> Result<OutputEncoding, String> {
    value.parse()
}

pub fn parse_power(value: &str) -> Result<GpuPowerPreference, String> {
    value.parse()
}

pub fn parse_param(value: &str) -> Result<(String, ParamSetting), String> {
    ParamSetting::parse_assignment(value).map_err(|err| err.to_string())
}

pub fn parse_size(value: &str) -> Result<(u32, u32), String> {
    let trimmed = value.trim();
    let (w, h) = trimmed
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("invalid size '{trimmed}'; expected WIDTHxHEIGHT"))?;
    let width: u32 = w
        .trim()
        .parse()
        .map_err(|_| format!("invalid width '{}'", w.trim()))?;
    let height: u32 = h
        .trim()
        .parse()
        .map_err(|_| format!("invalid height '{}'", h.trim()))?;
    if width == 0 || height == 0 {
        return Err("size dimensions must be greater than zero".into());
    }
    Ok((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_parse_with_either_separator() {
        assert_eq!(parse_size("320x240"), Ok((320, 240)));
        assert_eq!(parse_size(" 64X32 "), Ok((64, 32)));
        assert!(parse_size("0x10").is_err());
        assert!(parse_size("320").is_err());
    }

    #[test]
    fn run_flags_collect_repeated_params() {
        let cli = Cli::try_parse_from([
            "filtergpu",
            "--input",
            "in.png",
            "--fragment",
            "edge.frag",
            "--param",
            "gain=f1:2",
            "--param",
            "window=i2:3,3",
            "--encoding",
            "rgb565",
        ])
        .unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.run.params.len(), 2);
        assert_eq!(cli.run.params[1].1, ParamSetting::IVec2([3, 3]));
        assert_eq!(cli.run.shaders.encoding, Some(OutputEncoding::Rgb565));
        assert_eq!(cli.run.repeat, 1);
    }

    #[test]
    fn check_subcommand_takes_shader_flags() {
        let cli = Cli::try_parse_from(["filtergpu", "check", "--fragment", "a.frag"]).unwrap();
        match cli.command {
            Some(Command::Check(args)) => {
                assert_eq!(args.fragment, Some(PathBuf::from("a.frag")));
            }
            other => panic!("expected check subcommand, got {other:?}"),
        }
    }
}
