// This module implements the ARM calling convention decision: one slot per
// parameter and per result, each carrying a primary register, an optional
// secondary register (64-bit values split across a register pair), a stack
// offset, and the backing type. r0-r3 carry arguments in order; a 64-bit value
// that straddles the register boundary takes the last register plus a stack
// half. Results use r0 for integers and f0 for FPA floats. The decision is a
// pure function of the signature, which is what makes call-site and
// function-entry lowering agree on the register of every parameter. The stack
// layout descriptor partitions the frame into argument, local and
// saved-register areas with explicit byte offsets.

//! ARM calling convention and stack frame layout.

use crate::arm::registers::{CALLEE_SAVES, F0, PARAM_REGS, R0, R1};
use crate::ir::{Mode, Reg, Signature};

/// Location of one parameter: register(s) and/or a stack slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSlot {
    /// First (or only) register carrying the value.
    pub reg0: Option<Reg>,
    /// Second register of a 64-bit register pair.
    pub reg1: Option<Reg>,
    /// Stack offset of the value (or of its second half when `reg0` is
    /// set but `reg1` is not), relative to the incoming stack pointer.
    pub offset: Option<i32>,
    /// Backing type of the parameter.
    pub ty: Mode,
}

/// Location of one result value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultSlot {
    pub reg0: Option<Reg>,
    pub ty: Mode,
}

/// Calling convention of one function signature. Built once per signature
/// by [`decide_calling_convention`], consumed by the materializer and then
/// released; never mutated after construction.
#[derive(Debug, Clone)]
pub struct CallingConvention {
    pub parameters: Vec<ParamSlot>,
    pub results: Vec<ResultSlot>,
    /// Number of registers occupied by parameters (pairs count twice).
    pub n_param_regs: usize,
    /// Bytes of outgoing/incoming stack argument area.
    pub param_stack_size: i32,
}

/// Decide register and stack assignment for a signature.
///
/// `is_caller` selects the call-site view; both views share the register
/// assignment, so parameter `i` lands in the same register on both sides.
pub fn decide_calling_convention(sig: Signature<'_>, is_caller: bool) -> CallingConvention {
    let _ = is_caller;
    let mut parameters = Vec::with_capacity(sig.params.len());
    let mut gp_idx = 0usize;
    let mut stack: i32 = 0;
    let mut n_param_regs = 0usize;

    for &ty in sig.params {
        let is_double = ty.bits() == 64;
        let slot = if is_double {
            if gp_idx + 1 < PARAM_REGS.len() {
                let slot = ParamSlot {
                    reg0: Some(PARAM_REGS[gp_idx]),
                    reg1: Some(PARAM_REGS[gp_idx + 1]),
                    offset: None,
                    ty,
                };
                gp_idx += 2;
                n_param_regs += 2;
                slot
            } else if gp_idx < PARAM_REGS.len() {
                // Straddles the register boundary: low half in the last
                // register, high half on the stack.
                let slot = ParamSlot {
                    reg0: Some(PARAM_REGS[gp_idx]),
                    reg1: None,
                    offset: Some(stack),
                    ty,
                };
                gp_idx += 1;
                n_param_regs += 1;
                stack += 4;
                slot
            } else {
                let slot = ParamSlot {
                    reg0: None,
                    reg1: None,
                    offset: Some(stack),
                    ty,
                };
                stack += 8;
                slot
            }
        } else if gp_idx < PARAM_REGS.len() {
            let slot = ParamSlot {
                reg0: Some(PARAM_REGS[gp_idx]),
                reg1: None,
                offset: None,
                ty,
            };
            gp_idx += 1;
            n_param_regs += 1;
            slot
        } else {
            let slot = ParamSlot {
                reg0: None,
                reg1: None,
                offset: Some(stack),
                ty,
            };
            stack += 4;
            slot
        };
        parameters.push(slot);
    }

    let mut results = Vec::with_capacity(sig.results.len());
    let mut ret_gp = 0usize;
    let mut ret_fpa = 0usize;
    for &ty in sig.results {
        let reg0 = if ty.is_float() {
            let reg = Reg::new(F0.bank, F0.index + ret_fpa as u8);
            ret_fpa += 1;
            Some(reg)
        } else {
            let reg = match ret_gp {
                0 => Some(R0),
                1 => Some(R1),
                _ => None,
            };
            ret_gp += 1;
            reg
        };
        results.push(ResultSlot { reg0, ty });
    }

    CallingConvention {
        parameters,
        results,
        n_param_regs,
        param_stack_size: stack,
    }
}

/// Frame partition exposed to the downstream backend stages.
///
/// Layout, from the incoming stack pointer downward: incoming argument
/// area (positive offsets), saved-register area, local area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackLayout {
    /// Bytes of incoming stack arguments.
    pub arg_size: i32,
    /// Bytes of callee-saved register spill area.
    pub saved_size: i32,
    /// Bytes of locals and spill slots.
    pub local_size: i32,
}

impl StackLayout {
    pub fn for_function(cconv: &CallingConvention) -> StackLayout {
        StackLayout {
            arg_size: cconv.param_stack_size,
            saved_size: (CALLEE_SAVES.len() * 4) as i32,
            local_size: 0,
        }
    }

    /// Byte offset of the incoming argument area.
    pub fn arg_offset(&self) -> i32 {
        self.saved_size + self.local_size
    }

    /// Byte offset of the saved-register area.
    pub fn saved_offset(&self) -> i32 {
        self.local_size
    }

    /// Total frame size below the incoming stack pointer.
    pub fn frame_size(&self) -> i32 {
        self.saved_size + self.local_size
    }
}
