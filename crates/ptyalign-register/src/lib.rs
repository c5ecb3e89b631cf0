#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Error types for the register module.
pub mod error;

/// masked translation estimation in the frequency domain.
pub mod phase_correlation;

/// the end-to-end alignment pipeline.
pub mod pipeline;

/// bounded local refinement of similarity parameters.
pub mod refine;

pub use crate::error::RegisterError;
pub use crate::phase_correlation::{
    estimate_translation, PhaseCorrelationConfig, TranslationEstimate,
};
pub use crate::pipeline::{
    align, AlignmentConfig, AlignmentResult, DiscardOverlay, OverlaySink, Reference,
    ReferenceSource,
};
pub use crate::refine::{
    refine, RefinementBounds, RefinementConfig, RefinementParams, RefinementResult,
    TerminationReason,
};
