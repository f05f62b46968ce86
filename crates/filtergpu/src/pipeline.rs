use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use crossbeam_channel::Receiver;

use crate::device::{Backend, Device, TextureFormat, TextureLayout};
use crate::diagnostics::{self, DiagnosticSender, GpuDiagnostic};
use crate::error::FilterError;
use crate::gpu::WgpuBackend;
use crate::pixels::{ImageMut, ImageRef};
use crate::params::{ParamValue, ParameterStore, UniformBlock};
use crate::program::ShaderProgram;
use crate::types::{OutputEncoding, PipelineOptions, PipelineStats, TargetSpec, ThreadPolicy};

/// Runs CPU images through a caller-supplied shader program on the GPU.
///
/// Construction does no graphics work. The context, render target, source
/// texture, and compiled program are all created inside the first
/// [`process`](Self::process) call, on whichever thread makes it.
///
/// One lock guards both the render entry point and the staging calls
/// ([`set_program`](Self::set_program), [`set_param`](Self::set_param)), so
/// a pipeline can be shared between a control thread and a render thread;
/// overlapping passes are serialized.
pub struct FilterPipeline<B: Backend = WgpuBackend> {
    state: Mutex<PipelineState<B>>,
    diagnostics_tx: DiagnosticSender,
    diagnostics_rx: Receiver<GpuDiagnostic>,
}

enum ContextSlot<D> {
    Uninitialized,
    Ready { device: D, owner: ThreadId },
    /// Initialization failed; never retried.
    Failed(FilterError),
}

struct PipelineState<B: Backend> {
    backend: B,
    options: PipelineOptions,
    context: ContextSlot<B::Device>,
    /// Target the next pass renders into.
    target: Option<TargetSpec>,
    /// Target currently allocated on the device.
    allocated_target: Option<TargetSpec>,
    texture: Option<TextureLayout>,
    program: ShaderProgram<<B::Device as Device>::Program>,
    params: ParameterStore,
    /// Mistyped parameters already reported since they were last staged.
    reported: BTreeSet<String>,
    /// Every `process` call, including rejected ones; indexes error checks.
    attempts: u64,
    stats: PipelineStats,
}

impl FilterPipeline<WgpuBackend> {
    pub fn new() -> Self {
        Self::with_options(PipelineOptions::default())
    }

    pub fn with_options(options: PipelineOptions) -> Self {
        Self::with_backend(WgpuBackend::default(), options)
    }
}

impl Default for FilterPipeline<WgpuBackend> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> FilterPipeline<B> {
    pub fn with_backend(backend: B, options: PipelineOptions) -> Self {
        let (diagnostics_tx, diagnostics_rx) = diagnostics::channel(options.diagnostics_capacity);
        let state = PipelineState {
            backend,
            target: options.target,
            options,
            context: ContextSlot::Uninitialized,
            allocated_target: None,
            texture: None,
            program: ShaderProgram::new(),
            params: ParameterStore::default(),
            reported: BTreeSet::new(),
            attempts: 0,
            stats: PipelineStats::default(),
        };
        Self {
            state: Mutex::new(state),
            diagnostics_tx,
            diagnostics_rx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, PipelineState<B>> {
        // A panic mid-pass leaves the state consistent enough to continue.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stages a new shader pair and clears all parameters. Compilation is
    /// deferred to the next pass.
    pub fn set_program(&self, vertex: impl Into<String>, fragment: impl Into<String>) {
        let mut state = self.lock();
        state.program.set_source(vertex.into(), fragment.into());
        state.params.clear();
        state.reported.clear();
        tracing::debug!("shader program staged");
    }

    /// Stages a uniform value, replacing any earlier value under `name`.
    pub fn set_param(&self, name: impl Into<String>, value: ParamValue) {
        let name = name.into();
        let mut state = self.lock();
        state.reported.remove(&name);
        state.params.set(name, value);
    }

    pub fn set_param_2f(&self, name: impl Into<String>, x: f32, y: f32) {
        self.set_param(name, ParamValue::Float2([x, y]));
    }

    pub fn set_param_1f(&self, name: impl Into<String>, value: f32) {
        self.set_param(name, ParamValue::Float1(value));
    }

    pub fn set_param_2i(&self, name: impl Into<String>, x: i32, y: i32) {
        self.set_param(name, ParamValue::Int2([x, y]));
    }

    pub fn set_param_1i(&self, name: impl Into<String>, value: i32) {
        self.set_param(name, ParamValue::Int1(value));
    }

    /// Changes the render target configuration. The target (and, for a new
    /// encoding, the program) is recreated on the next pass; later `dst`
    /// images must match the new configuration.
    pub fn reconfigure(
        &self,
        width: u32,
        height: u32,
        encoding: OutputEncoding,
    ) -> Result<(), FilterError> {
        if width == 0 || height == 0 {
            return Err(FilterError::ContractViolation(format!(
                "render target dimensions must be non-zero (got {width}x{height})"
            )));
        }
        let target = TargetSpec::new(width, height, encoding);
        self.lock().target = Some(target);
        tracing::debug!(%target, "render target reconfigured");
        Ok(())
    }

    /// Filters `src` into `dst`.
    ///
    /// `dst` must match the render target (fixed by
    /// [`PipelineOptions::target`], the first `dst` seen, or
    /// [`reconfigure`](Self::reconfigure)); otherwise the call fails with
    /// [`FilterError::ContractViolation`] before touching the GPU or `dst`.
    pub fn process(&self, src: &ImageRef<'_>, dst: &mut ImageMut<'_>) -> Result<(), FilterError> {
        let mut state = self.lock();
        state.run_pass(src, dst, &self.diagnostics_tx)
    }

    pub fn stats(&self) -> PipelineStats {
        let state = self.lock();
        PipelineStats {
            compiles: state.program.builds(),
            ..state.stats
        }
    }

    /// Receiver for out-of-band device diagnostics. Every clone observes the
    /// same queue; each record is delivered once.
    pub fn diagnostics(&self) -> Receiver<GpuDiagnostic> {
        self.diagnostics_rx.clone()
    }
}

impl<B: Backend> PipelineState<B> {
    fn run_pass(
        &mut self,
        src: &ImageRef<'_>,
        dst: &mut ImageMut<'_>,
        diagnostics: &DiagnosticSender,
    ) -> Result<(), FilterError> {
        let pass = self.attempts;
        self.attempts += 1;
        let _span = tracing::debug_span!("filter_pass", pass).entered();

        let texture = TextureLayout::of(src)?;
        let encoding = OutputEncoding::try_from(dst.format())?;
        let requested = TargetSpec::new(dst.width(), dst.height(), encoding);
        let target = *self.target.get_or_insert(requested);
        if requested != target {
            return Err(FilterError::ContractViolation(format!(
                "destination is {requested} but the render target is {target}"
            )));
        }
        if self.program.source().is_none() {
            return Err(FilterError::ContractViolation(
                "no shader program has been set".into(),
            ));
        }

        let PipelineState {
            backend,
            options,
            context,
            allocated_target,
            texture: texture_slot,
            program,
            params,
            reported,
            stats,
            ..
        } = self;

        let device = acquire_context(context, backend, options, diagnostics)?;

        if *allocated_target != Some(target) {
            *allocated_target = None;
            if let Err(err) = device.allocate_target(target) {
                // Losing the render target ends the pipeline like a failed open.
                tracing::error!(%err, %target, "render target unavailable");
                *context = ContextSlot::Failed(err.clone());
                return Err(err);
            }
            *allocated_target = Some(target);
            stats.target_allocations += 1;
            tracing::debug!(%target, "render target allocated");
        }

        if *texture_slot != Some(texture) {
            *texture_slot = None;
            device.allocate_texture(texture)?;
            *texture_slot = Some(texture);
            stats.texture_allocations += 1;
            tracing::debug!(
                width = texture.width,
                height = texture.height,
                format = ?texture.format,
                "source texture allocated"
            );
        }
        device.write_texture(src)?;

        if program.is_dirty() {
            tracing::debug!(encoding = %target.encoding, "building staged program");
        }
        let compiled =
            program.ensure_compiled(target.encoding, |translated| device.build_program(translated))?;

        let mut block = UniformBlock::new(&compiled.layout);
        block.set_texel_size(src.width(), src.height());
        block.set_luminance(texture.format == TextureFormat::Luminance);
        let report = params.apply_all(&mut block);
        for (name, declared, supplied) in report.mismatched {
            if reported.insert(name.clone()) {
                tracing::warn!(%name, %declared, %supplied, "skipping mistyped uniform");
                diagnostics.send(GpuDiagnostic::UniformMismatch {
                    name,
                    declared,
                    supplied,
                });
            }
        }
        if !report.unused.is_empty() {
            tracing::trace!(unused = ?report.unused, "parameters not declared by the program");
        }

        let interval = u64::from(options.error_check_interval);
        let checking = interval > 0 && pass % interval == 0;
        if checking {
            device.begin_error_check();
        }
        let drawn = device.draw(&compiled.handle, block.as_bytes());
        if checking {
            if let Some(message) = device.end_error_check() {
                tracing::warn!(pass, %message, "device reported an error");
                diagnostics.send(GpuDiagnostic::ScopeCheck { pass, message });
            }
        }
        drawn?;

        device.read_back(dst.data_mut())?;
        stats.passes += 1;
        Ok(())
    }
}

fn acquire_context<'a, B: Backend>(
    slot: &'a mut ContextSlot<B::Device>,
    backend: &mut B,
    options: &PipelineOptions,
    diagnostics: &DiagnosticSender,
) -> Result<&'a mut B::Device, FilterError> {
    if let ContextSlot::Uninitialized = slot {
        *slot = match backend.open(options, diagnostics.clone()) {
            Ok(device) => {
                tracing::info!(policy = ?options.thread_policy, "graphics context initialised");
                ContextSlot::Ready {
                    device,
                    owner: thread::current().id(),
                }
            }
            Err(err) => {
                tracing::error!(%err, "graphics context unavailable");
                ContextSlot::Failed(err)
            }
        };
    }

    match slot {
        ContextSlot::Ready { device, owner } => {
            let current = thread::current().id();
            match options.thread_policy {
                ThreadPolicy::Pinned if *owner != current => Err(FilterError::ThreadAffinity {
                    owner: *owner,
                    current,
                }),
                ThreadPolicy::Pinned => Ok(device),
                ThreadPolicy::Rebind => {
                    device.make_current()?;
                    *owner = current;
                    Ok(device)
                }
            }
        }
        ContextSlot::Failed(err) => Err(err.clone()),
        ContextSlot::Uninitialized => Err(FilterError::Initialization(
            "graphics context was not created".into(),
        )),
    }
}
