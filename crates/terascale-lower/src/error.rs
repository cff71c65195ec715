//! # Lowering Errors
//!
//! The only recoverable failures of the lowering entry point. Anything else
//! (arity mismatches, writes without a destination, malformed text) is a
//! compiler bug and panics.

use core::fmt;

use terascale_ir::ChipClass;

use crate::op::GenericOp;

/// Error returned by [`Shader::lower_alu`](crate::shader::Shader::lower_alu)
///
/// The shader is left exactly as it was before the failing call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum LowerError {
    /// No emitter for this operation on the target generation
    Unsupported {
        /// The operation
        op: GenericOp,
        /// Target generation
        chip: ChipClass,
    },
    /// The destination or a source has a component count the emitter
    /// cannot handle
    InvalidComponentCount {
        /// The operation
        op: GenericOp,
        /// Offending component count
        components: u8,
    },
    /// A pre-built group could not be formed
    BundleRejected {
        /// The operation
        op: GenericOp,
    },
}

impl LowerError {
    /// The operation that failed to lower
    pub fn op(&self) -> GenericOp {
        match *self {
            LowerError::Unsupported { op, .. }
            | LowerError::InvalidComponentCount { op, .. }
            | LowerError::BundleRejected { op } => op,
        }
    }
}

impl fmt::Display for LowerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LowerError::Unsupported { op, chip } => {
                write!(f, "Unsupported operation: {} on {}", op, chip)
            },
            LowerError::InvalidComponentCount { op, components } => {
                write!(f, "Invalid component count {} for {}", components, op)
            },
            LowerError::BundleRejected { op } => {
                write!(f, "Instruction group rejected while lowering {}", op)
            },
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for LowerError {}

/// Result type for lowering
pub type Result<T> = core::result::Result<T, LowerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_op() {
        let err = LowerError::Unsupported {
            op: GenericOp::Fsin,
            chip: ChipClass::R600,
        };
        let text = format!("{}", err);
        assert!(text.contains("fsin"));
        assert!(text.contains("R600"));
        assert_eq!(err.op(), GenericOp::Fsin);
    }

    #[test]
    fn test_component_count_message() {
        let err = LowerError::InvalidComponentCount {
            op: GenericOp::Cube,
            components: 2,
        };
        assert_eq!(format!("{}", err), "Invalid component count 2 for cube");
    }
}
