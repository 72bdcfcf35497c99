use serde::Serialize;
use thiserror::Error;

use crate::entity::{FlowId, ProcessId};

/// Fatal construction errors. Everything else is reported through the
/// [`Diagnostic`] list on the build output.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LciError {
    /// An exchange references a flow id that is not part of the snapshot.
    #[error("process {process} has an exchange on unknown flow {flow}")]
    UnknownFlow { process: ProcessId, flow: FlowId },

    /// An interior flow has more than one candidate producer and neither an
    /// explicit link, a producer-selection entry, nor a unique market
    /// designation resolves it. Recoverable only by caller configuration.
    #[error("ambiguous producer for flow {flow}: {candidates:?}")]
    AmbiguousProducer {
        flow: FlowId,
        candidates: Vec<ProcessId>,
    },
}

/// Non-fatal, value-based findings accumulated during a build.
///
/// Callers must inspect these before trusting `fully_allocated`: an
/// allocation failure excludes the offending process from the interior
/// matrix without aborting the whole build.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Diagnostic {
    /// Explicit allocation fractions were missing or invalid for a declared
    /// multi-reference process; its commodities get no columns.
    AllocationError { process: ProcessId, reason: String },

    /// A substitution declaration could not be honoured for this process.
    SubstitutionError { process: ProcessId, reason: String },

    /// More than one disjoint cyclic component exists. Conventional LCI
    /// databases converge to a single background, so this is a structural
    /// anomaly rather than a failure.
    MultipleBackgroundComponents { count: usize },

    /// Two reference exchanges of one process name the same flow; only the
    /// first is registered as a commodity.
    DuplicateReference { process: ProcessId, flow: FlowId },
}
