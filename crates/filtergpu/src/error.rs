use std::fmt;
use std::thread::ThreadId;

/// Which part of a program build produced a [`FilterError::Compile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStageKind {
    Vertex,
    Fragment,
    /// Interface matching between the two stages and pipeline creation.
    Link,
}

impl fmt::Display for ShaderStageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderStageKind::Vertex => f.write_str("vertex"),
            ShaderStageKind::Fragment => f.write_str("fragment"),
            ShaderStageKind::Link => f.write_str("link"),
        }
    }
}

/// Errors surfaced by [`crate::FilterPipeline::process`].
///
/// Every variant is returned synchronously to the caller. Initialization and
/// compile failures are sticky: the pipeline remembers them and returns the
/// same error on later passes instead of retrying.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FilterError {
    /// Adapter, device, or render target acquisition failed.
    #[error("graphics initialization failed: {0}")]
    Initialization(String),
    /// Shader translation, compilation, or linking failed.
    #[error("{stage} stage failed to build:\n{log}")]
    Compile { stage: ShaderStageKind, log: String },
    /// The source or destination pixel layout is not one of the supported ones.
    #[error("unsupported pixel format: {0}")]
    UnsupportedFormat(String),
    /// The caller broke a documented precondition (for example a `dst` image
    /// that does not match the configured render target).
    #[error("contract violation: {0}")]
    ContractViolation(String),
    /// A pass was issued from a thread other than the one owning the context
    /// while [`crate::ThreadPolicy::Pinned`] is in effect.
    #[error("graphics context is bound to thread {owner:?} but process() ran on {current:?}")]
    ThreadAffinity { owner: ThreadId, current: ThreadId },
    /// Low-level device failure while transferring pixels.
    #[error("device error: {0}")]
    Device(String),
}

impl FilterError {
    pub(crate) fn compile(stage: ShaderStageKind, log: impl Into<String>) -> Self {
        FilterError::Compile {
            stage,
            log: log.into(),
        }
    }
}
