//! # TeraScale Lower - Generic Arithmetic to VLIW ALU
//!
//! Translates target independent SSA arithmetic into scalar ALU
//! instructions and instruction groups of the TeraScale IR. The translation
//! depends on the hardware generation: the trans lane of R600 to Evergreen,
//! the replicated transcendentals of Cayman, and 64-bit emulation on
//! register pairs.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    TERASCALE LOWERING PIPELINE                  │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │   AluOperation (op, dest, srcs)                                 │
//! │         │                                                       │
//! │         ▼                                                       │
//! │   ┌─────────────┐                                               │
//! │   │  Dispatch   │ ◄── (chip, 64-bit, op) → Lowering             │
//! │   └──────┬──────┘                                               │
//! │          │                                                      │
//! │          ▼                                                      │
//! │   ┌─────────────┐                                               │
//! │   │  Emitters   │ ◄── Value factory of the Shader               │
//! │   └──────┬──────┘                                               │
//! │          │                                                      │
//! │          ▼                                                      │
//! │   ┌─────────────┐                                               │
//! │   │  Program    │ ◄── Instructions, groups, gradient fetches    │
//! │   └──────┬──────┘                                               │
//! │          │                                                      │
//! │          ▼                                                      │
//! │   Optimizer (copy propagation, dead code)                       │
//! │                                                                 │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use terascale_ir::ChipClass;
//! use terascale_lower::{AluOperation, DestDescriptor, GenericOp, Shader, ShaderConfig, SrcDescriptor};
//!
//! let mut shader = Shader::new(ShaderConfig::new(ChipClass::Evergreen));
//! let add = AluOperation::new(
//!     GenericOp::Fadd,
//!     DestDescriptor::ssa(2, 1),
//!     vec![SrcDescriptor::ssa(0), SrcDescriptor::ssa(1)],
//! );
//! shader.lower_alu(&add).unwrap();
//! assert_eq!(shader.program().instr_count(), 1);
//! ```
//!
//! ## Modules
//!
//! - [`config`] - Shader configuration
//! - [`op`] - Generic operations and operand descriptors
//! - [`dispatch`] - Lowering tables per generation
//! - [`emit`] - Emitters
//! - [`shader`] - Compile context and value factory
//! - [`error`] - Error types

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(not(feature = "std"))]
extern crate alloc;

pub mod config;
pub mod dispatch;
pub mod emit;
pub mod error;
pub mod op;
pub mod shader;

pub use config::ShaderConfig;
pub use dispatch::{lookup, supports};
pub use emit::{Lowering, Op2Options};
pub use error::{LowerError, Result};
pub use op::{AluOperation, DestDescriptor, GenericOp, Operand, SrcDescriptor};
pub use shader::Shader;
