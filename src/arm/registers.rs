//! ARM register table and classes.
//!
//! Register bank 0 holds the sixteen general-purpose registers, bank 1 the
//! eight FPA float registers, bank 2 the condition flags. The calling
//! convention tables below mirror the AAPCS-style split the backend uses:
//! r0-r3 carry arguments, r4-r11 and lr are callee saved.

use crate::ir::{Mode, Reg, RegClass, RegReq};

pub const BANK_GP: u8 = 0;
pub const BANK_FPA: u8 = 1;
pub const BANK_FLAGS: u8 = 2;

pub const CLASS_GP: RegClass = RegClass(BANK_GP);
pub const CLASS_FPA: RegClass = RegClass(BANK_FPA);

/// Integer mode of the general-purpose registers.
pub const MODE_GP: Mode = Mode::I32;
/// Mode of the FPA register class.
pub const MODE_FPA: Mode = Mode::F64;

pub const R0: Reg = Reg::new(BANK_GP, 0);
pub const R1: Reg = Reg::new(BANK_GP, 1);
pub const R2: Reg = Reg::new(BANK_GP, 2);
pub const R3: Reg = Reg::new(BANK_GP, 3);
pub const R4: Reg = Reg::new(BANK_GP, 4);
pub const R5: Reg = Reg::new(BANK_GP, 5);
pub const R6: Reg = Reg::new(BANK_GP, 6);
pub const R7: Reg = Reg::new(BANK_GP, 7);
pub const R8: Reg = Reg::new(BANK_GP, 8);
pub const R9: Reg = Reg::new(BANK_GP, 9);
pub const R10: Reg = Reg::new(BANK_GP, 10);
pub const R11: Reg = Reg::new(BANK_GP, 11);
pub const R12: Reg = Reg::new(BANK_GP, 12);
pub const SP: Reg = Reg::new(BANK_GP, 13);
pub const LR: Reg = Reg::new(BANK_GP, 14);
pub const PC: Reg = Reg::new(BANK_GP, 15);

pub const F0: Reg = Reg::new(BANK_FPA, 0);
pub const F1: Reg = Reg::new(BANK_FPA, 1);
pub const F2: Reg = Reg::new(BANK_FPA, 2);
pub const F3: Reg = Reg::new(BANK_FPA, 3);
pub const F4: Reg = Reg::new(BANK_FPA, 4);
pub const F5: Reg = Reg::new(BANK_FPA, 5);
pub const F6: Reg = Reg::new(BANK_FPA, 6);
pub const F7: Reg = Reg::new(BANK_FPA, 7);

pub const FLAGS: Reg = Reg::new(BANK_FLAGS, 0);

/// Argument registers, in assignment order.
pub const PARAM_REGS: [Reg; 4] = [R0, R1, R2, R3];

/// Registers the callee must preserve.
pub const CALLEE_SAVES: [Reg; 9] = [R4, R5, R6, R7, R8, R9, R10, R11, LR];

/// Registers a call may clobber.
pub const CALLER_SAVES: [Reg; 13] = [R0, R1, R2, R3, LR, F0, F1, F2, F3, F4, F5, F6, F7];

pub fn gp_req() -> RegReq {
    RegReq::Class(CLASS_GP)
}

pub fn fixed(reg: Reg) -> RegReq {
    RegReq::Fixed(reg)
}
