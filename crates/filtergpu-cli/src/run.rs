use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use filterconfig::FilterPreset;
use filtergpu::shaders::PASSTHROUGH_VERTEX;
use filtergpu::{
    check_program, rgb565_to_rgba, FilterPipeline, ImageMut, ImageRef, OutputEncoding,
    PipelineOptions, TargetSpec,
};
use image::{GrayImage, RgbaImage};
use tracing_subscriber::EnvFilter;

use crate::bindings::{map_encoding, map_param, map_power, map_thread_policy};
use crate::cli::{RunArgs, ShaderArgs};

/// Shader sources and target encoding after merging a preset with flags.
struct ResolvedShaders {
    vertex: String,
    fragment: String,
    fragment_path: PathBuf,
    encoding: OutputEncoding,
    preset: Option<FilterPreset>,
}

enum SourceImage {
    Gray(GrayImage),
    Rgba(RgbaImage),
}

impl SourceImage {
    fn view(&self) -> ImageRef<'_> {
        match self {
            SourceImage::Gray(img) => ImageRef::from(img),
            SourceImage::Rgba(img) => ImageRef::from(img),
        }
    }
}

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_preset(path: &Path) -> Result<FilterPreset> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read preset {}", path.display()))?;
    FilterPreset::from_toml_str(&text)
        .with_context(|| format!("failed to load preset {}", path.display()))
}

fn read_shader(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read shader {}", path.display()))
}

fn resolve_shaders(args: &ShaderArgs) -> Result<ResolvedShaders> {
    let preset = args.preset.as_deref().map(load_preset).transpose()?;

    let (preset_vertex, preset_fragment) = match (&preset, &args.preset) {
        (Some(preset), Some(path)) => {
            let base = path.parent().unwrap_or_else(|| Path::new("."));
            let (vertex, fragment) = preset.resolve_shaders(base);
            (vertex, Some(fragment))
        }
        _ => (None, None),
    };

    let Some(fragment_path) = args.fragment.clone().or(preset_fragment) else {
        bail!("no fragment shader given; pass --fragment or --preset");
    };
    let vertex = match args.vertex.clone().or(preset_vertex) {
        Some(path) => read_shader(&path)?,
        None => PASSTHROUGH_VERTEX.to_string(),
    };
    let fragment = read_shader(&fragment_path)?;

    let encoding = args
        .encoding
        .or_else(|| preset.as_ref().map(|p| map_encoding(p.output.encoding)))
        .unwrap_or(OutputEncoding::Rgba8);

    Ok(ResolvedShaders {
        vertex,
        fragment,
        fragment_path,
        encoding,
        preset,
    })
}

pub fn run(args: RunArgs) -> Result<()> {
    let shaders = resolve_shaders(&args.shaders)?;
    let Some(input) = args.input.as_ref() else {
        bail!("no input image given; pass --input");
    };
    let Some(output) = args.output.as_ref() else {
        bail!("no output path given; pass --output");
    };

    let decoded =
        image::open(input).with_context(|| format!("failed to decode {}", input.display()))?;
    let source = if args.gray {
        SourceImage::Gray(decoded.to_luma8())
    } else {
        SourceImage::Rgba(decoded.to_rgba8())
    };
    let src = source.view();

    let preset = shaders.preset.as_ref();
    let (width, height) = args
        .size
        .or_else(|| preset.and_then(FilterPreset::output_size))
        .unwrap_or((src.width(), src.height()));
    let target = TargetSpec::new(width, height, shaders.encoding);

    let mut options = PipelineOptions {
        target: Some(target),
        ..PipelineOptions::default()
    };
    if let Some(preset) = preset {
        options.power = map_power(preset.gpu.power);
        options.thread_policy = map_thread_policy(preset.gpu.thread_policy);
        options.error_check_interval = preset.gpu.error_check_interval;
    }
    if let Some(power) = args.power {
        options.power = power;
    }

    tracing::info!(
        input = %input.display(),
        fragment = %shaders.fragment_path.display(),
        source = %src.format(),
        %target,
        "running filter"
    );

    let pipeline = FilterPipeline::with_options(options);
    pipeline.set_program(shaders.vertex, shaders.fragment);
    let preset_params = preset.into_iter().flat_map(|p| p.params.iter());
    for (name, setting) in preset_params {
        pipeline.set_param(name.clone(), map_param(*setting));
    }
    for (name, setting) in &args.params {
        pipeline.set_param(name.clone(), map_param(*setting));
    }

    let mut pixels = vec![0u8; width as usize * height as usize * shaders.encoding.bytes_per_pixel()];
    {
        let mut dst = ImageMut::new(width, height, shaders.encoding.pixel_format(), &mut pixels)?;
        for pass in 0..args.repeat.max(1) {
            pipeline
                .process(&src, &mut dst)
                .with_context(|| format!("filter pass {pass} failed"))?;
        }
    }

    for diagnostic in pipeline.diagnostics().try_iter() {
        tracing::warn!(%diagnostic, "device diagnostic");
    }
    let stats = pipeline.stats();
    tracing::info!(
        passes = stats.passes,
        compiles = stats.compiles,
        texture_allocations = stats.texture_allocations,
        target_allocations = stats.target_allocations,
        "filter complete"
    );

    write_output(output, target, pixels)
}

fn write_output(path: &Path, target: TargetSpec, pixels: Vec<u8>) -> Result<()> {
    let is_png = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("png"));

    let rgba = match target.encoding {
        OutputEncoding::Rgba8 => pixels,
        OutputEncoding::Rgb565 if !is_png => {
            fs::write(path, &pixels)
                .with_context(|| format!("failed to write {}", path.display()))?;
            tracing::info!(path = %path.display(), "wrote raw rgb565 frame");
            return Ok(());
        }
        OutputEncoding::Rgb565 => {
            let mut rgba = vec![0u8; target.width as usize * target.height as usize * 4];
            rgb565_to_rgba(&pixels, &mut rgba);
            rgba
        }
    };

    let image = RgbaImage::from_raw(target.width, target.height, rgba)
        .context("filtered frame does not match the target size")?;
    image
        .save(path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), "wrote filtered image");
    Ok(())
}

pub fn check(args: ShaderArgs) -> Result<()> {
    let shaders = resolve_shaders(&args)?;
    let checked = check_program(&shaders.vertex, &shaders.fragment, shaders.encoding)
        .with_context(|| format!("{} failed to build", shaders.fragment_path.display()))?;

    let layout = &checked.translated.layout;
    println!(
        "{}: ok ({} target)",
        shaders.fragment_path.display(),
        shaders.encoding
    );
    println!("Uniform block ({} bytes):", layout.size());
    for (name, slot) in layout.iter() {
        println!("  {name:<20} {:<6} offset={}", slot.kind.glsl(), slot.offset);
    }
    Ok(())
}
