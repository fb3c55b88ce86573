//! Error types for the emitter core.
//!
//! Every fallible operation in the library returns [`Error`].  The set of
//! kinds is closed: emitters, the code holder, and the per-architecture
//! encoders all report through these variants, optionally routed through an
//! [`ErrorHandler`](crate::emitter::ErrorHandler) before being returned.

#[allow(unused_imports)]
use alloc::format;
use alloc::string::String;
#[allow(unused_imports)]
use alloc::vec;
use core::fmt;

/// Emission error with a descriptive payload.
///
/// A failing operation leaves persistent state unchanged except for the
/// per-instruction transient state, which is always consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Error {
    /// Allocation failed.
    OutOfMemory,

    /// An argument was rejected (bad alignment, oversized operand list, …).
    InvalidArgument {
        /// Description of the rejected argument.
        detail: String,
    },

    /// The operation is not valid in the current state.
    InvalidState {
        /// Description of the state conflict.
        detail: String,
    },

    /// The emitter is already attached to a code holder.
    AlreadyAttached,

    /// The emitter is not attached to a code holder.
    NotAttached,

    /// `finalize()` already ran; the instruction stream is frozen.
    AlreadyFinalized,

    /// The label id does not name a live label.
    InvalidLabel {
        /// The offending label id (raw).
        id: u32,
    },

    /// A named label with the same name already exists in the namespace.
    LabelNameCollision {
        /// The colliding name.
        name: String,
    },

    /// The label is already bound; labels bind exactly once.
    AlreadyBound {
        /// The offending label id (raw).
        id: u32,
    },

    /// The label arena is full.
    TooManyLabels,

    /// The section id does not name a live section.
    InvalidSection {
        /// The offending section id (raw).
        id: u32,
    },

    /// Unknown or unencodable instruction for the target architecture.
    InvalidInstruction {
        /// Description of the rejected instruction.
        detail: String,
    },

    /// An operand is malformed or unsupported in this position.
    InvalidOperand {
        /// Description of the rejected operand.
        detail: String,
    },

    /// Operand sizes disagree (e.g. 32-bit destination, 64-bit source).
    OperandSizeMismatch {
        /// Description of the mismatch.
        detail: String,
    },

    /// A displacement does not fit the encoding chosen for a patch site.
    RelocationOutOfRange {
        /// The displacement that was requested.
        displacement: i64,
        /// Number of bits available in the encoding.
        bits: u32,
    },

    /// The register allocator ran out of assignable registers.
    RegAllocFailure {
        /// Description of the failure.
        detail: String,
    },

    /// Support for the requested architecture is compiled out.
    FeatureNotEnabled {
        /// The Cargo feature that would enable it.
        feature: &'static str,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::OutOfMemory => write!(f, "out of memory"),
            Error::InvalidArgument { detail } => write!(f, "invalid argument: {}", detail),
            Error::InvalidState { detail } => write!(f, "invalid state: {}", detail),
            Error::AlreadyAttached => write!(f, "emitter is already attached to a code holder"),
            Error::NotAttached => write!(f, "emitter is not attached to a code holder"),
            Error::AlreadyFinalized => write!(f, "emitter was already finalized"),
            Error::InvalidLabel { id } => write!(f, "invalid label id {}", id),
            Error::LabelNameCollision { name } => {
                write!(f, "label name '{}' already exists", name)
            }
            Error::AlreadyBound { id } => write!(f, "label {} is already bound", id),
            Error::TooManyLabels => write!(f, "label limit exceeded"),
            Error::InvalidSection { id } => write!(f, "invalid section id {}", id),
            Error::InvalidInstruction { detail } => {
                write!(f, "invalid instruction: {}", detail)
            }
            Error::InvalidOperand { detail } => write!(f, "invalid operand: {}", detail),
            Error::OperandSizeMismatch { detail } => {
                write!(f, "operand size mismatch: {}", detail)
            }
            Error::RelocationOutOfRange { displacement, bits } => {
                write!(
                    f,
                    "displacement {} does not fit a {}-bit relocation field",
                    displacement, bits
                )
            }
            Error::RegAllocFailure { detail } => {
                write!(f, "register allocation failed: {}", detail)
            }
            Error::FeatureNotEnabled { feature } => {
                write!(f, "architecture support not compiled in (feature '{}')", feature)
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

impl Error {
    /// Shorthand for [`Error::InvalidArgument`] from any displayable detail.
    pub(crate) fn invalid_arg(detail: impl fmt::Display) -> Self {
        Error::InvalidArgument {
            detail: format!("{}", detail),
        }
    }

    /// Shorthand for [`Error::InvalidOperand`].
    pub(crate) fn invalid_operand(detail: impl fmt::Display) -> Self {
        Error::InvalidOperand {
            detail: format!("{}", detail),
        }
    }

    /// Shorthand for [`Error::InvalidInstruction`].
    pub(crate) fn invalid_inst(detail: impl fmt::Display) -> Self {
        Error::InvalidInstruction {
            detail: format!("{}", detail),
        }
    }
}
