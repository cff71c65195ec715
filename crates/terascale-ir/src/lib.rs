//! # TeraScale IR - VLIW ALU Representation
//!
//! Scalar ALU instructions, registers and instruction groups for the
//! R600, R700, Evergreen and Cayman GPU generations. The IR models what
//! the hardware can issue in one cycle: four vector lanes plus a trans
//! lane (Cayman has only the four vector lanes), sharing three register
//! read cycles, two constant-cache ports and four literal slots.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     TERASCALE IR ARCHITECTURE                   │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │   Lowered ALU operations                                        │
//! │         │                                                       │
//! │         ▼                                                       │
//! │   ┌─────────────┐                                               │
//! │   │  Program    │ ◄── Arena: values, instructions, groups       │
//! │   └──────┬──────┘                                               │
//! │          │                                                      │
//! │          ▼                                                      │
//! │   ┌─────────────┐                                               │
//! │   │  Groups     │ ◄── Lane placement, bank swizzles, LAST flag  │
//! │   └──────┬──────┘                                               │
//! │          │                                                      │
//! │          ▼                                                      │
//! │   ┌─────────────┐                                               │
//! │   │  Optimizer  │ ◄── Copy propagation, dead code               │
//! │   └──────┬──────┘                                               │
//! │          │                                                      │
//! │          ▼                                                      │
//! │   Scheduler / encoder / text dump                               │
//! │                                                                 │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`chip`] - Hardware generations
//! - [`opcode`] - ALU and LDS opcode tables
//! - [`value`] - Registers, uniforms, literals and inline constants
//! - [`pool`] - Value arena and register allocation
//! - [`instr`] - Scalar ALU instructions
//! - [`readport`] - Register read port and bank swizzle validation
//! - [`group`] - Instruction groups
//! - [`tex`] - Gradient fetches
//! - [`program`] - Program arena and group placement
//! - [`rewrite`] - Local rewrites and readiness queries
//! - [`optimizer`] - Peephole passes
//! - [`text`] - Textual form

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(not(feature = "std"))]
extern crate alloc;

pub mod chip;
pub mod group;
pub mod instr;
pub mod opcode;
pub mod optimizer;
pub mod pool;
pub mod program;
pub mod readport;
pub mod rewrite;
pub mod tex;
pub mod text;
pub mod value;

pub use chip::*;
pub use group::*;
pub use instr::*;
pub use opcode::*;
pub use optimizer::*;
pub use pool::*;
pub use program::*;
pub use readport::*;
pub use tex::*;
pub use text::*;
pub use value::*;
