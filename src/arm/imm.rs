// This module implements the ARM rotated-immediate encoding search and the
// multi-instruction decomposition of constants too wide for one instruction.
// An encodable immediate is an 8-bit value rotated right by an even amount;
// the search finds the smallest even bit position carrying a set bit and the
// smallest even position at or above the highest set bit, and accepts the
// value when the run between them fits in a byte, with one wrap-around retry
// for runs touching the top bits. Wider constants decompose into a sequence
// of descriptors combined by OR from zero or by AND-NOT from all-ones,
// whichever needs fewer instructions.

//! ARM immediate operand encoding.

use crate::ir::ShifterOp;

/// One hardware-encodable constant: `value.rotate_right(rot)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Immediate {
    pub value: u8,
    pub rot: u8,
}

impl Immediate {
    /// Try to encode a 32-bit constant as a single rotated immediate.
    ///
    /// The rotation is a multiple of 2, so we determine the smallest even
    /// position with a bit set and the smallest even position at or above
    /// the highest set bit; if their distance is at most 8 the run fits in
    /// one byte after rotation.
    pub fn encode(val: u32) -> Option<Immediate> {
        if val <= 0xFF {
            // Prefer rotation 0.
            return Some(Immediate {
                value: val as u8,
                rot: 0,
            });
        }

        let low_pos = val.trailing_zeros() & !1;
        let high_pos = (32 - val.leading_zeros() + 1) & !1;

        if high_pos - low_pos <= 8 {
            return Some(Immediate {
                value: (val >> low_pos) as u8,
                rot: ((32 - low_pos) % 32) as u8,
            });
        }

        if high_pos > 24 {
            // The run may wrap around the word boundary.
            let rot = 34 - high_pos;
            let rotated = (val >> (32 - rot)) | (val << rot);
            if rotated <= 0xFF {
                return Some(Immediate {
                    value: rotated as u8,
                    rot: rot as u8,
                });
            }
        }

        None
    }

    /// The encoded constant.
    pub fn decode(self) -> u32 {
        (self.value as u32).rotate_right(self.rot as u32)
    }

    pub fn shifter(self) -> ShifterOp {
        ShifterOp::Imm {
            value: self.value,
            rot: self.rot,
        }
    }
}

/// Decomposition of a 32-bit constant into immediate descriptors.
///
/// OR-ing the decoded descriptors together reproduces the constant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImmediateSeq {
    pub descriptors: Vec<Immediate>,
}

impl ImmediateSeq {
    /// Decompose by repeatedly stripping pairs of zero low bits and taking
    /// the next 8 bits as one descriptor.
    pub fn decompose(mut value: u32) -> ImmediateSeq {
        if value <= 0xFF {
            // Prefer shift amount 0.
            return ImmediateSeq {
                descriptors: vec![Immediate {
                    value: value as u8,
                    rot: 0,
                }],
            };
        }

        let mut descriptors = Vec::new();
        let mut shifted = 0u32;
        loop {
            while value & 0x3 == 0 {
                value >>= 2;
                shifted += 2;
            }
            descriptors.push(Immediate {
                value: (value & 0xFF) as u8,
                rot: ((32 - shifted) % 32) as u8,
            });
            value >>= 8;
            shifted += 8;
            if value == 0 {
                break;
            }
        }
        ImmediateSeq { descriptors }
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// OR of all decoded descriptors.
    pub fn reconstruct(&self) -> u32 {
        self.descriptors.iter().fold(0, |acc, d| acc | d.decode())
    }
}
