//! Gradient fetch node: the texture unit computes screen-space derivatives
//! of a four-channel register.

use core::fmt;

use crate::value::RegId;

/// Index of a gradient node in the program arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TexId(pub u32);

impl TexId {
    /// Arena slot
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Derivative direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GradientOp {
    /// d/dx
    Horizontal,
    /// d/dy
    Vertical,
}

impl fmt::Display for GradientOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GradientOp::Horizontal => "GET_GRADIENT_H",
            GradientOp::Vertical => "GET_GRADIENT_V",
        })
    }
}

/// Gradient fetch
#[derive(Debug, Clone)]
pub struct GradientInstr {
    pub(crate) op: GradientOp,
    pub(crate) dest: [Option<RegId>; 4],
    pub(crate) src: [RegId; 4],
    pub(crate) fine: bool,
}

impl GradientInstr {
    /// Gradient of `src` into the unmasked channels of `dest`
    pub fn new(
        op: GradientOp,
        dest: [Option<RegId>; 4],
        src: [RegId; 4],
        fine: bool,
    ) -> Self {
        Self { op, dest, src, fine }
    }

    /// Direction
    pub fn op(&self) -> GradientOp {
        self.op
    }

    /// Destination per channel, `None` when masked
    pub fn dest(&self) -> &[Option<RegId>; 4] {
        &self.dest
    }

    /// Source vector
    pub fn src(&self) -> &[RegId; 4] {
        &self.src
    }

    /// Per-pixel rather than per-quad derivative
    pub fn is_fine(&self) -> bool {
        self.fine
    }
}
