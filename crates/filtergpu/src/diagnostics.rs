//! Out-of-band device diagnostics.
//!
//! Low-level GPU errors are never inspected on the per-pass hot path. They
//! arrive here instead: from the device's uncaptured-error hook, from the
//! periodic scoped check, and from uniform writes the program rejected.

use std::fmt;

use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::program::UniformKind;

#[derive(Debug, Clone, PartialEq)]
pub enum GpuDiagnostic {
    /// Reported by the device outside of any error scope.
    Uncaptured(String),
    /// Captured by the periodic error check that ran before `pass`.
    ScopeCheck { pass: u64, message: String },
    /// A staged parameter whose type does not match the program's uniform.
    UniformMismatch {
        name: String,
        declared: UniformKind,
        supplied: UniformKind,
    },
}

impl fmt::Display for GpuDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuDiagnostic::Uncaptured(message) => write!(f, "uncaptured device error: {message}"),
            GpuDiagnostic::ScopeCheck { pass, message } => {
                write!(f, "device error before pass {pass}: {message}")
            }
            GpuDiagnostic::UniformMismatch {
                name,
                declared,
                supplied,
            } => write!(
                f,
                "uniform '{name}' is declared as {declared} but was set as {supplied}"
            ),
        }
    }
}

/// Sending half of the diagnostic channel; never blocks.
#[derive(Debug, Clone)]
pub struct DiagnosticSender {
    tx: Sender<GpuDiagnostic>,
}

impl DiagnosticSender {
    pub fn send(&self, diagnostic: GpuDiagnostic) {
        match self.tx.try_send(diagnostic) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) => {
                tracing::warn!(%dropped, "diagnostic channel full; dropping record");
            }
            // Nobody is listening any more.
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

pub(crate) fn channel(capacity: usize) -> (DiagnosticSender, Receiver<GpuDiagnostic>) {
    let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
    (DiagnosticSender { tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_drops_newest_records() {
        let (tx, rx) = channel(1);
        tx.send(GpuDiagnostic::Uncaptured("first".into()));
        tx.send(GpuDiagnostic::Uncaptured("second".into()));

        let received: Vec<_> = rx.try_iter().collect();
        assert_eq!(received, vec![GpuDiagnostic::Uncaptured("first".into())]);
    }
}
