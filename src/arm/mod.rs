//! ARM32 backend: instruction selection and calling convention.
//!
//! This module contains all ARM-specific code:
//! - Immediate operand encoding and constant construction
//! - The instruction-selection pattern matcher
//! - Calling convention decision and stack frame layout
//! - Register table and code generation configuration

pub mod cconv;
pub mod config;
pub mod imm;
pub mod registers;
pub mod transform;

pub use cconv::{decide_calling_convention, CallingConvention, ParamSlot, ResultSlot, StackLayout};
pub use config::{ArmConfig, ArmVariant, FpuKind};
pub use imm::{Immediate, ImmediateSeq};
pub use transform::{lower_function, ArmTransform, LoweredFunction};

/// Projection numbers of the ARM multi-result nodes.
pub mod pn {
    pub const LDR_RES: u32 = 0;
    pub const LDR_M: u32 = 1;
    pub const LDF_RES: u32 = 0;
    pub const LDF_M: u32 = 1;
    pub const DVF_RES: u32 = 0;
    pub const DVF_M: u32 = 1;
    /// Bl/LinkMovPC: memory token.
    pub const BL_M: u32 = 0;
    /// Bl/LinkMovPC: stack pointer after the call.
    pub const BL_STACK: u32 = 1;
    /// Bl/LinkMovPC: first clobbered-register output.
    pub const BL_FIRST_RESULT: u32 = 2;
    pub const FLAGOP_RES: u32 = 0;
    pub const FLAGOP_FLAGS: u32 = 1;
    pub const UMULL_LOW: u32 = 0;
    pub const UMULL_HIGH: u32 = 1;
}
