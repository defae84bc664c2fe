// This module is the ARM instruction selector: it rewrites each machine-
// independent node into one concrete ARM instruction form, folding adjacent
// operations where the ISA supports a combined form. Binary operations go
// through a factory-driven matcher with a fixed tie-break policy (immediate
// right operand, immediate left operand for commutative/reversible operators,
// shifter-operand fold right, shifter-operand fold left, plain register form).
// Rotate patterns collapse to a single ROR shifter operand, Add/Sub fuse with
// an adjacent multiply into Mla/Mls where the variant allows, and operands
// already clean for the required width skip their extension instructions. The
// calling-convention materializer lowers Start/Return/Call into concrete
// register and stack-slot sequences from the precomputed convention table.

//! Lowering of the machine-independent IR into ARM nodes.

use bumpalo::Bump;
use hashbrown::HashMap;
use log::debug;

use crate::arm::cconv::{decide_calling_convention, CallingConvention, StackLayout};
use crate::arm::config::{ArmConfig, ArmVariant, FpuKind};
use crate::arm::imm::{Immediate, ImmediateSeq};
use crate::arm::pn as apn;
use crate::arm::registers::{
    fixed, gp_req, CALLEE_SAVES, CALLER_SAVES, FLAGS, MODE_FPA, MODE_GP, SP,
};
use crate::be::clean::Oracle;
use crate::be::error::{LowerError, LowerResult};
use crate::be::stackorder::{collect_stack_nodes, StackOrder};
use crate::be::transform::{
    duplicate_node, lower_graph, pattern_is_rotl, setup_generic, skip_downconv, skip_sameconv,
    transform_block_of, transform_node, transform_phi, Engine, LowerStats, Registry, TransformHost,
};
use crate::ir::{pn, Attr, Graph, Mode, NodeId, Op, Reg, RegReq, ShifterOp, Signature};

/// Stack alignment as a power-of-two log.
const ARM_PO2_STACK_ALIGNMENT: u32 = 3;

/// Lowering host for one function graph: the generic engine plus the
/// ARM-specific state (convention table, stack order, Start bookkeeping).
pub struct ArmTransform<'g> {
    eng: Engine<'g>,
    registry: Registry<ArmTransform<'g>>,
    config: ArmConfig,
    /// Convention of the function being lowered.
    cconv: CallingConvention,
    stackorder: StackOrder,
    /// Old stack-modifying node to its new stack-pointer value.
    node_to_stack: HashMap<NodeId, NodeId>,
    /// Output position of each incoming register on the new Start node.
    start_val_pos: HashMap<Reg, u32>,
    start_mem_pos: u32,
    start_sp_pos: u32,
    start_callee_saves_offset: u32,
    /// Cached Projs of the new Start node, by output position.
    start_projs: HashMap<u32, NodeId>,
}

impl<'g> TransformHost<'g> for ArmTransform<'g> {
    fn engine(&self) -> &Engine<'g> {
        &self.eng
    }

    fn engine_mut(&mut self) -> &mut Engine<'g> {
        &mut self.eng
    }

    fn registry(&self) -> &Registry<Self> {
        &self.registry
    }
}

impl<'g> ArmTransform<'g> {
    fn old(&self) -> &'g Graph<'g> {
        self.eng.old()
    }

    fn t(&mut self, node: NodeId) -> LowerResult<NodeId> {
        transform_node(self, node)
    }

    fn block_of(&mut self, node: NodeId) -> LowerResult<NodeId> {
        transform_block_of(self, node)
    }

    fn build(&mut self, block: NodeId, op: Op, mode: Mode, ins: &[NodeId], attr: Attr<'g>) -> NodeId {
        self.eng.new_graph_mut().add(op, mode, block, ins, attr)
    }

    fn proj(&mut self, pred: NodeId, pn: u32, mode: Mode) -> NodeId {
        self.eng.new_graph_mut().add_proj(pred, pn, mode)
    }

    fn no_mem(&mut self) -> LowerResult<NodeId> {
        let nm = self.old().no_mem();
        self.t(nm)
    }

    fn is_clean(&self, node: NodeId, mode: Mode) -> bool {
        Oracle::new(self.old(), self.registry.clean_table()).clean(node, mode)
    }

    /// The transformed Start node, lowering it on first use.
    fn transformed_start(&mut self) -> LowerResult<NodeId> {
        let start = self.old().start();
        self.t(start)
    }

    /// Cached Proj selecting output `pos` of the new Start node.
    fn start_proj(&mut self, pos: u32, mode: Mode) -> LowerResult<NodeId> {
        let start = self.transformed_start()?;
        if let Some(&p) = self.start_projs.get(&pos) {
            return Ok(p);
        }
        let p = self.proj(start, pos, mode);
        self.start_projs.insert(pos, p);
        Ok(p)
    }

    fn start_proj_mem(&mut self) -> LowerResult<NodeId> {
        let pos = self.start_mem_pos;
        self.start_proj(pos, Mode::Memory)
    }

    fn start_proj_sp(&mut self) -> LowerResult<NodeId> {
        let pos = self.start_sp_pos;
        self.start_proj(pos, MODE_GP)
    }

    fn start_proj_reg(&mut self, reg: Reg, node: NodeId) -> LowerResult<NodeId> {
        self.transformed_start()?;
        let pos = *self
            .start_val_pos
            .get(&reg)
            .ok_or(LowerError::Unsupported {
                node,
                reason: "parameter register missing from function entry",
            })?;
        self.start_proj(pos, MODE_GP)
    }

    /// Stack pointer value in effect before `node`, following the
    /// per-block stack order.
    fn stack_pointer_for(&mut self, node: NodeId) -> LowerResult<NodeId> {
        let Some(pred) = self.stackorder.pred(node) else {
            // First stack user in the block: the initial stack pointer.
            return self.start_proj_sp();
        };
        self.t(pred)?;
        match self.node_to_stack.get(&pred) {
            Some(&stack) => Ok(stack),
            None => self.stack_pointer_for(pred),
        }
    }

    /// Build the instruction sequence materializing a 32-bit constant:
    /// either add bits to zero (Mov + Or) or remove bits from all-ones
    /// (Mvn + Bic), whichever needs fewer instructions.
    fn create_const_graph_value(&mut self, block: NodeId, value: u32) -> NodeId {
        let v = ImmediateSeq::decompose(value);
        let vn = ImmediateSeq::decompose(!value);

        if vn.len() < v.len() {
            // Remove bits.
            let mut result = self.build(
                block,
                Op::ArmMvn,
                MODE_GP,
                &[],
                Attr::Shifter(vn.descriptors[0].shifter()),
            );
            for d in &vn.descriptors[1..] {
                result = self.build(block, Op::ArmBic, MODE_GP, &[result], Attr::Shifter(d.shifter()));
            }
            result
        } else {
            // Add bits.
            let mut result = self.build(
                block,
                Op::ArmMov,
                MODE_GP,
                &[],
                Attr::Shifter(v.descriptors[0].shifter()),
            );
            for d in &v.descriptors[1..] {
                result = self.build(block, Op::ArmOr, MODE_GP, &[result], Attr::Shifter(d.shifter()));
            }
            result
        }
    }

    /// And with an inline mask, or a shift-up/shift-down pair, zeroing the
    /// bits above `src_bits`.
    fn zero_extension(
        &mut self,
        block: NodeId,
        op: NodeId,
        src_bits: u8,
        node: NodeId,
    ) -> LowerResult<NodeId> {
        match src_bits {
            8 => Ok(self.build(
                block,
                Op::ArmAnd,
                MODE_GP,
                &[op],
                Attr::Shifter(ShifterOp::Imm { value: 0xFF, rot: 0 }),
            )),
            16 => {
                let lshift = self.build(
                    block,
                    Op::ArmMov,
                    MODE_GP,
                    &[op],
                    Attr::Shifter(ShifterOp::LslImm(16)),
                );
                Ok(self.build(
                    block,
                    Op::ArmMov,
                    MODE_GP,
                    &[lshift],
                    Attr::Shifter(ShifterOp::LsrImm(16)),
                ))
            }
            _ => Err(LowerError::Unsupported {
                node,
                reason: "zero extension only supported for 8 and 16 bits",
            }),
        }
    }

    /// Shift-up/arithmetic-shift-down pair replicating the sign bit.
    fn sign_extension(&mut self, block: NodeId, op: NodeId, src_bits: u8) -> NodeId {
        let shift_width = 32 - src_bits;
        let lshift = self.build(
            block,
            Op::ArmMov,
            MODE_GP,
            &[op],
            Attr::Shifter(ShifterOp::LslImm(shift_width)),
        );
        self.build(
            block,
            Op::ArmMov,
            MODE_GP,
            &[lshift],
            Attr::Shifter(ShifterOp::AsrImm(shift_width)),
        )
    }

    /// Extend `new_op` to 32 bits unless the oracle proves the upper bits
    /// of the old value already clean for `orig_mode`.
    fn gen_extension(
        &mut self,
        block: NodeId,
        old_op: NodeId,
        new_op: NodeId,
        orig_mode: Mode,
        node: NodeId,
    ) -> LowerResult<NodeId> {
        let bits = orig_mode.bits();
        if bits == 32 {
            return Ok(new_op);
        }
        if self.is_clean(old_op, orig_mode) {
            return Ok(new_op);
        }
        if orig_mode.is_signed() {
            Ok(self.sign_extension(block, new_op, bits))
        } else {
            self.zero_extension(block, new_op, bits, node)
        }
    }

    /// Fold a transformed Mov-with-shifter operand into a combined
    /// instruction form. Only single-use shifts are folded; a shared shift
    /// gets materialized anyway.
    fn fold_shifter(
        &mut self,
        factory: BinopFactory,
        block: NodeId,
        left_new: NodeId,
        old_right: NodeId,
        right_new: NodeId,
    ) -> Option<NodeId> {
        if self.eng.new_graph().op(right_new) != Op::ArmMov {
            return None;
        }
        if self.old().n_uses(old_right) != 1 {
            return None;
        }
        let Attr::Shifter(shifter) = self.eng.new_graph().attr(right_new) else {
            return None;
        };
        if shifter.is_shift_imm() {
            let rm = self.eng.new_graph().ins(right_new)[0];
            debug!("folding shift-by-immediate into {:?}", factory.op);
            Some(self.build(block, factory.op, factory.mode, &[left_new, rm], Attr::Shifter(shifter)))
        } else if shifter.is_shift_reg() {
            let rm = self.eng.new_graph().ins(right_new)[0];
            let rs = self.eng.new_graph().ins(right_new)[1];
            debug!("folding shift-by-register into {:?}", factory.op);
            Some(self.build(
                block,
                factory.op,
                factory.mode,
                &[left_new, rm, rs],
                Attr::Shifter(shifter),
            ))
        } else {
            None
        }
    }

    /// Binary-operation matcher. Tie-break order: immediate right operand,
    /// immediate left operand (commutative/reversible only), shifter fold
    /// right, shifter fold left, plain register-register form.
    fn int_binop_ops(
        &mut self,
        node: NodeId,
        op1: NodeId,
        op2: NodeId,
        flags: MatchFlags,
        factories: &[BinopFactory],
    ) -> LowerResult<NodeId> {
        let old = self.old();
        let block = self.block_of(node)?;

        let (op1, op2) = if flags.size_neutral {
            (skip_downconv(old, op1, true), skip_downconv(old, op2, true))
        } else {
            debug_assert_eq!(old.mode(node).bits(), 32);
            (skip_sameconv(old, op1), skip_sameconv(old, op2))
        };

        let normal = factories[0];
        if let Some(imm) = encode_operand(old, op2) {
            let new_op1 = self.t(op1)?;
            return Ok(self.build(block, normal.op, normal.mode, &[new_op1], Attr::Shifter(imm.shifter())));
        }
        let new_op2 = self.t(op2)?;
        if flags.commutative || flags.reverse {
            if let Some(imm) = encode_operand(old, op1) {
                let f = if flags.reverse { factories[1] } else { factories[0] };
                return Ok(self.build(block, f.op, f.mode, &[new_op2], Attr::Shifter(imm.shifter())));
            }
        }
        let new_op1 = self.t(op1)?;

        if let Some(folded) = self.fold_shifter(normal, block, new_op1, op2, new_op2) {
            return Ok(folded);
        }
        if flags.commutative || flags.reverse {
            let f = if flags.reverse { factories[1] } else { factories[0] };
            if let Some(folded) = self.fold_shifter(f, block, new_op2, op1, new_op1) {
                return Ok(folded);
            }
        }

        Ok(self.build(
            block,
            normal.op,
            normal.mode,
            &[new_op1, new_op2],
            Attr::Shifter(ShifterOp::Reg),
        ))
    }

    fn int_binop(
        &mut self,
        node: NodeId,
        flags: MatchFlags,
        factories: &[BinopFactory],
    ) -> LowerResult<NodeId> {
        let op1 = self.old().ins(node)[0];
        let op2 = self.old().ins(node)[1];
        self.int_binop_ops(node, op1, op2, flags, factories)
    }

    /// Rotate-right lowering shared by the Or/Add rotate patterns.
    /// `negate_op` rewrites a rotate-left amount as `width - amount`.
    fn gen_ror(
        &mut self,
        node: NodeId,
        op1: NodeId,
        op2: NodeId,
        negate_op: bool,
    ) -> LowerResult<NodeId> {
        let old = self.old();
        let block = self.block_of(node)?;
        let new_op1 = self.t(op1)?;
        if let Some(val) = old.const_value(op2) {
            let bits = i64::from(old.mode(node).bits());
            if bits == 32 {
                let amount = ((if negate_op { bits - val } else { val }) & 31) as u8;
                return Ok(self.build(
                    block,
                    Op::ArmMov,
                    MODE_GP,
                    &[new_op1],
                    Attr::Shifter(ShifterOp::RorImm(amount)),
                ));
            }
        }

        let mut new_op2 = self.t(op2)?;
        if negate_op {
            new_op2 = self.build(
                block,
                Op::ArmRsb,
                MODE_GP,
                &[new_op2],
                Attr::Shifter(ShifterOp::Imm { value: 32, rot: 0 }),
            );
        }
        Ok(self.build(
            block,
            Op::ArmMov,
            MODE_GP,
            &[new_op1, new_op2],
            Attr::Shifter(ShifterOp::RorReg),
        ))
    }

    /// Recognize Or/Add of two complementary half-word masks and lower it
    /// to a packed-halfword instruction.
    fn match_pkh(&mut self, node: NodeId) -> LowerResult<Option<NodeId>> {
        let old = self.old();
        debug_assert!(matches!(old.op(node), Op::Or | Op::Add));
        let mut left = old.ins(node)[0];
        let mut right = old.ins(node)[1];
        if old.op(left) != Op::And || old.op(right) != Op::And {
            return Ok(None);
        }
        let mut left_right = old.ins(left)[1];
        let right_right = old.ins(right)[1];
        let (Some(lmask), Some(rmask)) = (old.const_value(left_right), old.const_value(right_right))
        else {
            return Ok(None);
        };
        // We want the low mask on the left side.
        if is_high_mask(lmask) {
            std::mem::swap(&mut left, &mut right);
            left_right = right_right;
        } else if !is_high_mask(rmask) {
            return Ok(None);
        }
        let Some(lmask) = old.const_value(left_right) else {
            return Ok(None);
        };
        if !is_low_mask(lmask) {
            return Ok(None);
        }
        let left_left = old.ins(left)[0];
        let right_left = old.ins(right)[0];
        let factories = [
            BinopFactory::new(Op::ArmPkhbt, MODE_GP),
            BinopFactory::new(Op::ArmPkhtb, MODE_GP),
        ];
        self.int_binop_ops(node, left_left, right_left, MatchFlags::REVERSE, &factories)
            .map(Some)
    }

    // Float values move between register banks through a frame scratch
    // slot; the FPA has no direct transfer path.

    fn ints_to_double(
        &mut self,
        block: NodeId,
        value0: NodeId,
        value1: NodeId,
    ) -> LowerResult<NodeId> {
        let stack = self.start_proj_sp()?;
        let nomem = self.no_mem()?;
        let str0 = self.build(
            block,
            Op::ArmStr,
            Mode::Memory,
            &[stack, value0, nomem],
            Attr::MemAccess {
                mode: MODE_GP,
                offset: 0,
                frame: true,
            },
        );
        let str1 = self.build(
            block,
            Op::ArmStr,
            Mode::Memory,
            &[stack, value1, nomem],
            Attr::MemAccess {
                mode: MODE_GP,
                offset: 4,
                frame: true,
            },
        );
        let sync = self.build(block, Op::Sync, Mode::Memory, &[str0, str1], Attr::None);
        let ldf = self.build(
            block,
            Op::ArmLdf,
            Mode::Tuple,
            &[stack, sync],
            Attr::MemAccess {
                mode: Mode::F64,
                offset: 0,
                frame: true,
            },
        );
        Ok(self.proj(ldf, apn::LDF_RES, MODE_FPA))
    }

    fn int_to_float(&mut self, block: NodeId, value: NodeId) -> LowerResult<NodeId> {
        let stack = self.start_proj_sp()?;
        let nomem = self.no_mem()?;
        let store = self.build(
            block,
            Op::ArmStr,
            Mode::Memory,
            &[stack, value, nomem],
            Attr::MemAccess {
                mode: MODE_GP,
                offset: 0,
                frame: true,
            },
        );
        let ldf = self.build(
            block,
            Op::ArmLdf,
            Mode::Tuple,
            &[stack, store],
            Attr::MemAccess {
                mode: Mode::F32,
                offset: 0,
                frame: true,
            },
        );
        Ok(self.proj(ldf, apn::LDF_RES, MODE_FPA))
    }

    fn float_to_int(&mut self, block: NodeId, value: NodeId) -> LowerResult<NodeId> {
        let stack = self.start_proj_sp()?;
        let nomem = self.no_mem()?;
        let stf = self.build(
            block,
            Op::ArmStf,
            Mode::Memory,
            &[stack, value, nomem],
            Attr::MemAccess {
                mode: Mode::F32,
                offset: 0,
                frame: true,
            },
        );
        let ldr = self.build(
            block,
            Op::ArmLdr,
            Mode::Tuple,
            &[stack, stf],
            Attr::MemAccess {
                mode: MODE_GP,
                offset: 0,
                frame: true,
            },
        );
        Ok(self.proj(ldr, apn::LDR_RES, MODE_GP))
    }

    fn double_to_ints(&mut self, block: NodeId, value: NodeId) -> LowerResult<(NodeId, NodeId)> {
        let stack = self.start_proj_sp()?;
        let nomem = self.no_mem()?;
        let stf = self.build(
            block,
            Op::ArmStf,
            Mode::Memory,
            &[stack, value, nomem],
            Attr::MemAccess {
                mode: Mode::F64,
                offset: 0,
                frame: true,
            },
        );
        let ldr0 = self.build(
            block,
            Op::ArmLdr,
            Mode::Tuple,
            &[stack, stf],
            Attr::MemAccess {
                mode: MODE_GP,
                offset: 0,
                frame: true,
            },
        );
        let ldr1 = self.build(
            block,
            Op::ArmLdr,
            Mode::Tuple,
            &[stack, stf],
            Attr::MemAccess {
                mode: MODE_GP,
                offset: 4,
                frame: true,
            },
        );
        let lo = self.proj(ldr0, apn::LDR_RES, MODE_GP);
        let hi = self.proj(ldr1, apn::LDR_RES, MODE_GP);
        Ok((lo, hi))
    }
}

/// Matching behavior of a binary operator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchFlags {
    /// Operands may swap freely.
    pub commutative: bool,
    /// A reversed-operand opcode exists (factory index 1).
    pub reverse: bool,
    /// The operation only cares about the low bits, so down-conversions
    /// below the operands can be skipped.
    pub size_neutral: bool,
}

impl MatchFlags {
    pub const NONE: MatchFlags = MatchFlags {
        commutative: false,
        reverse: false,
        size_neutral: false,
    };
    pub const COMMUTATIVE: MatchFlags = MatchFlags {
        commutative: true,
        reverse: false,
        size_neutral: false,
    };
    pub const REVERSE: MatchFlags = MatchFlags {
        commutative: false,
        reverse: true,
        size_neutral: false,
    };
    pub const SIZE_NEUTRAL: MatchFlags = MatchFlags {
        commutative: false,
        reverse: false,
        size_neutral: true,
    };
}

impl std::ops::BitOr for MatchFlags {
    type Output = MatchFlags;

    fn bitor(self, rhs: MatchFlags) -> MatchFlags {
        MatchFlags {
            commutative: self.commutative || rhs.commutative,
            reverse: self.reverse || rhs.reverse,
            size_neutral: self.size_neutral || rhs.size_neutral,
        }
    }
}

/// Construction recipe for one binary operator: the target opcode covers
/// the register-register, register-immediate and register-shifted forms
/// through its shifter operand attribute.
#[derive(Debug, Clone, Copy)]
pub struct BinopFactory {
    pub op: Op,
    pub mode: Mode,
}

impl BinopFactory {
    pub const fn new(op: Op, mode: Mode) -> Self {
        Self { op, mode }
    }
}

fn encode_operand(graph: &Graph<'_>, node: NodeId) -> Option<Immediate> {
    Immediate::encode(graph.const_value(node)? as u32)
}

fn encode_not_operand(graph: &Graph<'_>, node: NodeId) -> Option<Immediate> {
    Immediate::encode(!(graph.const_value(node)? as u32))
}

fn is_low_mask(value: i64) -> bool {
    value as u32 == 0x0000_FFFF
}

fn is_high_mask(value: i64) -> bool {
    value as u32 == 0xFFFF_0000
}

fn proj_num(graph: &Graph<'_>, node: NodeId) -> u32 {
    match graph.attr(node) {
        Attr::Proj(pn) => pn,
        _ => unreachable!("projection without index"),
    }
}

fn can_use_shift_constant(val: u32, modifier: ShifterOp) -> bool {
    if val <= 31 {
        return true;
    }
    val == 32 && !matches!(modifier, ShifterOp::LslReg | ShifterOp::RorReg)
}

// ---------------------------------------------------------------------------
// Per-opcode transform handlers.
// ---------------------------------------------------------------------------

fn gen_const(t: &mut ArmTransform<'_>, node: NodeId) -> LowerResult<NodeId> {
    let old = t.old();
    let block = t.block_of(node)?;
    let mode = old.mode(node);
    if mode.is_float() {
        if t.config.fpu != FpuKind::Fpa {
            return Err(LowerError::Unsupported {
                node,
                reason: "softfloat not lowered",
            });
        }
        let attr = old.attr(node);
        return Ok(t.build(block, Op::ArmFConst, mode, &[], attr));
    }
    let value = old.const_value(node).unwrap_or(0) as u32;
    Ok(t.create_const_graph_value(block, value))
}

fn gen_add(t: &mut ArmTransform<'_>, node: NodeId) -> LowerResult<NodeId> {
    let old = t.old();
    if let Some((rotl_left, rotl_right)) = pattern_is_rotl(old, node) {
        if old.op(rotl_right) == Op::Minus {
            let amount = old.ins(rotl_right)[0];
            return t.gen_ror(node, rotl_left, amount, false);
        }
        return t.gen_ror(node, rotl_left, rotl_right, true);
    }
    if let Some(pkh) = t.match_pkh(node)? {
        return Ok(pkh);
    }

    let mode = old.mode(node);
    if mode.is_float() {
        if t.config.fpu != FpuKind::Fpa {
            return Err(LowerError::Unsupported {
                node,
                reason: "softfloat not lowered",
            });
        }
        let block = t.block_of(node)?;
        let new_op1 = t.t(old.ins(node)[0])?;
        let new_op2 = t.t(old.ins(node)[1])?;
        return Ok(t.build(block, Op::ArmAdf, mode, &[new_op1, new_op2], Attr::None));
    }

    let left = old.ins(node)[0];
    let right = old.ins(node)[1];
    let mul = if old.op(left) == Op::Mul {
        Some((left, right))
    } else if old.op(right) == Op::Mul {
        Some((right, left))
    } else {
        None
    };
    if let Some((mul, other)) = mul {
        let block = t.block_of(node)?;
        let new_left = t.t(old.ins(mul)[0])?;
        let new_right = t.t(old.ins(mul)[1])?;
        let new_add = t.t(other)?;
        debug!("fusing multiply into Mla");
        return Ok(t.build(
            block,
            Op::ArmMla,
            MODE_GP,
            &[new_left, new_right, new_add],
            Attr::None,
        ));
    }

    let factories = [BinopFactory::new(Op::ArmAdd, MODE_GP)];
    t.int_binop_ops(
        node,
        left,
        right,
        MatchFlags::COMMUTATIVE | MatchFlags::SIZE_NEUTRAL,
        &factories,
    )
}

fn gen_sub(t: &mut ArmTransform<'_>, node: NodeId) -> LowerResult<NodeId> {
    let old = t.old();
    let mode = old.mode(node);
    let left = old.ins(node)[0];
    let right = old.ins(node)[1];
    if mode.is_float() {
        if t.config.fpu != FpuKind::Fpa {
            return Err(LowerError::Unsupported {
                node,
                reason: "softfloat not lowered",
            });
        }
        let block = t.block_of(node)?;
        let new_left = t.t(left)?;
        let new_right = t.t(right)?;
        return Ok(t.build(block, Op::ArmSuf, mode, &[new_left, new_right], Attr::None));
    }

    if old.op(right) == Op::Mul && t.config.variant >= ArmVariant::V6T2 {
        let block = t.block_of(node)?;
        let new_left = t.t(old.ins(right)[0])?;
        let new_right = t.t(old.ins(right)[1])?;
        let new_sub = t.t(left)?;
        debug!("fusing multiply into Mls");
        return Ok(t.build(
            block,
            Op::ArmMls,
            MODE_GP,
            &[new_left, new_right, new_sub],
            Attr::None,
        ));
    }

    let factories = [
        BinopFactory::new(Op::ArmSub, MODE_GP),
        BinopFactory::new(Op::ArmRsb, MODE_GP),
    ];
    t.int_binop_ops(
        node,
        left,
        right,
        MatchFlags::SIZE_NEUTRAL | MatchFlags::REVERSE,
        &factories,
    )
}

fn gen_and(t: &mut ArmTransform<'_>, node: NodeId) -> LowerResult<NodeId> {
    let old = t.old();
    let left = old.ins(node)[0];
    let right = old.ins(node)[1];
    let bic = [BinopFactory::new(Op::ArmBic, MODE_GP)];

    // Check for and-not.
    if old.op(right) == Op::Not {
        let right_not = old.ins(right)[0];
        return t.int_binop_ops(node, left, right_not, MatchFlags::SIZE_NEUTRAL, &bic);
    }
    if old.op(left) == Op::Not {
        let left_not = old.ins(left)[0];
        return t.int_binop_ops(node, right, left_not, MatchFlags::SIZE_NEUTRAL, &bic);
    }
    if let Some(imm) = encode_not_operand(old, right) {
        let block = t.block_of(node)?;
        let new_l = t.t(left)?;
        return Ok(t.build(block, Op::ArmBic, MODE_GP, &[new_l], Attr::Shifter(imm.shifter())));
    }
    let and = [BinopFactory::new(Op::ArmAnd, MODE_GP)];
    t.int_binop(node, MatchFlags::COMMUTATIVE | MatchFlags::SIZE_NEUTRAL, &and)
}

fn gen_or(t: &mut ArmTransform<'_>, node: NodeId) -> LowerResult<NodeId> {
    let old = t.old();
    if let Some((rotl_left, rotl_right)) = pattern_is_rotl(old, node) {
        if old.op(rotl_right) == Op::Minus {
            let amount = old.ins(rotl_right)[0];
            return t.gen_ror(node, rotl_left, amount, false);
        }
        return t.gen_ror(node, rotl_left, rotl_right, true);
    }
    if let Some(pkh) = t.match_pkh(node)? {
        return Ok(pkh);
    }

    let factories = [BinopFactory::new(Op::ArmOr, MODE_GP)];
    t.int_binop(
        node,
        MatchFlags::COMMUTATIVE | MatchFlags::SIZE_NEUTRAL,
        &factories,
    )
}

fn gen_eor(t: &mut ArmTransform<'_>, node: NodeId) -> LowerResult<NodeId> {
    let factories = [BinopFactory::new(Op::ArmEor, MODE_GP)];
    t.int_binop(
        node,
        MatchFlags::COMMUTATIVE | MatchFlags::SIZE_NEUTRAL,
        &factories,
    )
}

fn gen_mul(t: &mut ArmTransform<'_>, node: NodeId) -> LowerResult<NodeId> {
    let old = t.old();
    let block = t.block_of(node)?;
    let new_op1 = t.t(old.ins(node)[0])?;
    let new_op2 = t.t(old.ins(node)[1])?;
    let mode = old.mode(node);

    if mode.is_float() {
        if t.config.fpu != FpuKind::Fpa {
            return Err(LowerError::Unsupported {
                node,
                reason: "softfloat not lowered",
            });
        }
        return Ok(t.build(block, Op::ArmMuf, mode, &[new_op1, new_op2], Attr::None));
    }
    Ok(t.build(block, Op::ArmMul, MODE_GP, &[new_op1, new_op2], Attr::None))
}

fn gen_div(t: &mut ArmTransform<'_>, node: NodeId) -> LowerResult<NodeId> {
    let old = t.old();
    let res_mode = match old.attr(node) {
        Attr::DivMode(m) => m,
        _ => old.mode(node),
    };
    // Integer division is replaced by a runtime call before selection.
    if !res_mode.is_float() {
        return Err(LowerError::Unsupported {
            node,
            reason: "integer division must be lowered to a runtime call",
        });
    }
    if t.config.fpu != FpuKind::Fpa {
        return Err(LowerError::Unsupported {
            node,
            reason: "softfloat not lowered",
        });
    }
    let block = t.block_of(node)?;
    let new_op1 = t.t(old.ins(node)[1])?;
    let new_op2 = t.t(old.ins(node)[2])?;
    Ok(t.build(
        block,
        Op::ArmDvf,
        Mode::Tuple,
        &[new_op1, new_op2],
        Attr::DivMode(res_mode),
    ))
}

fn make_shift(
    t: &mut ArmTransform<'_>,
    node: NodeId,
    flags: MatchFlags,
    reg_modifier: ShifterOp,
) -> LowerResult<NodeId> {
    let old = t.old();
    let block = t.block_of(node)?;
    let mut op1 = old.ins(node)[0];
    let mut op2 = old.ins(node)[1];

    if flags.size_neutral {
        op1 = skip_downconv(old, op1, true);
        op2 = skip_downconv(old, op2, true);
    }

    let new_op1 = t.t(op1)?;
    if let Some(val) = old.const_value(op2) {
        let val = val as u32;
        if can_use_shift_constant(val, reg_modifier) {
            let imm_modifier = match reg_modifier {
                ShifterOp::LslReg => ShifterOp::LslImm(val as u8),
                ShifterOp::LsrReg => ShifterOp::LsrImm(val as u8),
                ShifterOp::AsrReg => ShifterOp::AsrImm(val as u8),
                ShifterOp::RorReg => ShifterOp::RorImm(val as u8),
                _ => {
                    return Err(LowerError::Unsupported {
                        node,
                        reason: "unexpected shift modifier",
                    })
                }
            };
            return Ok(t.build(block, Op::ArmMov, MODE_GP, &[new_op1], Attr::Shifter(imm_modifier)));
        }
    }

    let new_op2 = t.t(op2)?;
    Ok(t.build(
        block,
        Op::ArmMov,
        MODE_GP,
        &[new_op1, new_op2],
        Attr::Shifter(reg_modifier),
    ))
}

fn gen_shl(t: &mut ArmTransform<'_>, node: NodeId) -> LowerResult<NodeId> {
    make_shift(t, node, MatchFlags::SIZE_NEUTRAL, ShifterOp::LslReg)
}

fn gen_shr(t: &mut ArmTransform<'_>, node: NodeId) -> LowerResult<NodeId> {
    make_shift(t, node, MatchFlags::NONE, ShifterOp::LsrReg)
}

fn gen_shrs(t: &mut ArmTransform<'_>, node: NodeId) -> LowerResult<NodeId> {
    make_shift(t, node, MatchFlags::NONE, ShifterOp::AsrReg)
}

fn gen_not(t: &mut ArmTransform<'_>, node: NodeId) -> LowerResult<NodeId> {
    let old = t.old();
    let block = t.block_of(node)?;
    let op = old.ins(node)[0];
    let new_op = t.t(op)?;

    // Check if we can fold in a Mov.
    if t.eng.new_graph().op(new_op) == Op::ArmMov && old.n_uses(op) == 1 {
        if let Attr::Shifter(shifter) = t.eng.new_graph().attr(new_op) {
            if shifter.is_shift_imm() {
                let rm = t.eng.new_graph().ins(new_op)[0];
                return Ok(t.build(block, Op::ArmMvn, MODE_GP, &[rm], Attr::Shifter(shifter)));
            }
            if shifter.is_shift_reg() {
                let rm = t.eng.new_graph().ins(new_op)[0];
                let rs = t.eng.new_graph().ins(new_op)[1];
                return Ok(t.build(block, Op::ArmMvn, MODE_GP, &[rm, rs], Attr::Shifter(shifter)));
            }
        }
    }

    Ok(t.build(block, Op::ArmMvn, MODE_GP, &[new_op], Attr::Shifter(ShifterOp::Reg)))
}

fn gen_minus(t: &mut ArmTransform<'_>, node: NodeId) -> LowerResult<NodeId> {
    let old = t.old();
    let block = t.block_of(node)?;
    let op = old.ins(node)[0];
    let new_op = t.t(op)?;
    let mode = old.mode(node);

    if mode.is_float() {
        if t.config.fpu != FpuKind::Fpa {
            return Err(LowerError::Unsupported {
                node,
                reason: "softfloat not lowered",
            });
        }
        return Ok(t.build(block, Op::ArmMvf, mode, &[new_op], Attr::None));
    }
    Ok(t.build(
        block,
        Op::ArmRsb,
        MODE_GP,
        &[new_op],
        Attr::Shifter(ShifterOp::Imm { value: 0, rot: 0 }),
    ))
}

fn gen_load(t: &mut ArmTransform<'_>, node: NodeId) -> LowerResult<NodeId> {
    let old = t.old();
    let (mode, unaligned) = match old.attr(node) {
        Attr::Load { mode, unaligned } => (mode, unaligned),
        _ => (old.mode(node), false),
    };
    if unaligned {
        return Err(LowerError::UnalignedAccess { node });
    }
    let block = t.block_of(node)?;
    let new_ptr = t.t(old.ins(node)[0])?;
    let new_mem = t.t(old.ins(node)[1])?;

    let op = if mode.is_float() {
        if t.config.fpu != FpuKind::Fpa {
            return Err(LowerError::Unsupported {
                node,
                reason: "softfloat not lowered",
            });
        }
        Op::ArmLdf
    } else {
        Op::ArmLdr
    };
    let new_load = t.build(
        block,
        op,
        Mode::Tuple,
        &[new_ptr, new_mem],
        Attr::MemAccess {
            mode,
            offset: 0,
            frame: false,
        },
    );
    let pinned = old.node(node).pinned;
    t.eng.new_graph_mut().set_pinned(new_load, pinned);
    Ok(new_load)
}

fn gen_store(t: &mut ArmTransform<'_>, node: NodeId) -> LowerResult<NodeId> {
    let old = t.old();
    if let Attr::Store { unaligned: true } = old.attr(node) {
        return Err(LowerError::UnalignedAccess { node });
    }
    let block = t.block_of(node)?;
    let new_ptr = t.t(old.ins(node)[0])?;
    let new_val = t.t(old.ins(node)[1])?;
    let new_mem = t.t(old.ins(node)[2])?;
    let mode = old.mode(old.ins(node)[1]);

    let op = if mode.is_float() {
        if t.config.fpu != FpuKind::Fpa {
            return Err(LowerError::Unsupported {
                node,
                reason: "softfloat not lowered",
            });
        }
        Op::ArmStf
    } else {
        Op::ArmStr
    };
    let new_store = t.build(
        block,
        op,
        Mode::Memory,
        &[new_ptr, new_val, new_mem],
        Attr::MemAccess {
            mode,
            offset: 0,
            frame: false,
        },
    );
    let pinned = old.node(node).pinned;
    t.eng.new_graph_mut().set_pinned(new_store, pinned);
    Ok(new_store)
}

fn gen_cmp(t: &mut ArmTransform<'_>, node: NodeId) -> LowerResult<NodeId> {
    let old = t.old();
    let block = t.block_of(node)?;
    let op1 = old.ins(node)[0];
    let op2 = old.ins(node)[1];
    let cmp_mode = old.mode(op1);

    if cmp_mode.is_float() {
        let new_op1 = t.t(op1)?;
        let new_op2 = t.t(op2)?;
        return Ok(t.build(
            block,
            Op::ArmCmfe,
            Mode::Flags,
            &[new_op1, new_op2],
            Attr::CmpAttr { is_unsigned: false },
        ));
    }

    debug_assert_eq!(old.mode(op2), cmp_mode);
    let is_unsigned = !cmp_mode.is_signed();

    let new_op1 = t.t(op1)?;
    let new_op1 = t.gen_extension(block, op1, new_op1, cmp_mode, node)?;
    let new_op2 = t.t(op2)?;
    let new_op2 = t.gen_extension(block, op2, new_op2, cmp_mode, node)?;
    Ok(t.build(
        block,
        Op::ArmCmp,
        Mode::Flags,
        &[new_op1, new_op2],
        Attr::CmpAttr { is_unsigned },
    ))
}

fn gen_cond(t: &mut ArmTransform<'_>, node: NodeId) -> LowerResult<NodeId> {
    let old = t.old();
    let block = t.block_of(node)?;
    let selector = old.ins(node)[0];
    let relation = match old.attr(selector) {
        Attr::Relation(r) => r,
        _ => {
            return Err(LowerError::Unsupported {
                node,
                reason: "branch selector is not a compare",
            })
        }
    };
    let flag_node = t.t(selector)?;
    Ok(t.build(block, Op::ArmB, Mode::Tuple, &[flag_node], Attr::Relation(relation)))
}

fn gen_switch(t: &mut ArmTransform<'_>, node: NodeId) -> LowerResult<NodeId> {
    let old = t.old();
    let block = t.block_of(node)?;
    let selector = old.ins(node)[0];
    // The selector must have been lowered to a single word already.
    if old.mode(selector).bits() != 32 {
        return Err(LowerError::Unsupported {
            node,
            reason: "unexpected switch selector mode",
        });
    }
    let n_outs = match old.attr(node) {
        Attr::Switch { n_outs } => n_outs,
        _ => 0,
    };
    let new_op = t.t(selector)?;
    Ok(t.build(
        block,
        Op::ArmSwitchJmp,
        Mode::Tuple,
        &[new_op],
        Attr::Switch { n_outs },
    ))
}

fn gen_conv(t: &mut ArmTransform<'_>, node: NodeId) -> LowerResult<NodeId> {
    let old = t.old();
    let op = old.ins(node)[0];
    let src_mode = old.mode(op);
    let dst_mode = old.mode(node);

    if src_mode == dst_mode {
        return t.t(op);
    }

    if src_mode.is_float() || dst_mode.is_float() {
        if t.config.fpu != FpuKind::Fpa {
            return Err(LowerError::Unsupported {
                node,
                reason: "softfloat not lowered",
            });
        }
        let block = t.block_of(node)?;
        let new_op = t.t(op)?;
        if src_mode.is_float() {
            if dst_mode.is_float() {
                return Ok(t.build(block, Op::ArmMvf, dst_mode, &[new_op], Attr::None));
            }
            return Err(LowerError::Unsupported {
                node,
                reason: "float to int conversion not implemented",
            });
        }
        if !src_mode.is_signed() {
            return Err(LowerError::Unsupported {
                node,
                reason: "unsigned int to float conversion not implemented",
            });
        }
        return Ok(t.build(block, Op::ArmFltX, dst_mode, &[new_op], Attr::None));
    }

    // Complete in gp registers.
    let block = t.block_of(node)?;
    let new_op = t.t(op)?;
    let src_bits = src_mode.bits();
    let dst_bits = dst_mode.bits();
    if src_bits == dst_bits {
        // Kill the unnecessary conv.
        return Ok(new_op);
    }

    let min_mode = if src_bits < dst_bits { src_mode } else { dst_mode };
    if t.is_clean(op, min_mode) {
        return Ok(new_op);
    }
    if min_mode.is_signed() {
        Ok(t.sign_extension(block, new_op, min_mode.bits()))
    } else {
        t.zero_extension(block, new_op, min_mode.bits(), node)
    }
}

fn gen_address(t: &mut ArmTransform<'_>, node: NodeId) -> LowerResult<NodeId> {
    let old = t.old();
    let block = t.block_of(node)?;
    let attr = old.attr(node);
    Ok(t.build(block, Op::ArmAddress, MODE_GP, &[], attr))
}

fn gen_member(t: &mut ArmTransform<'_>, node: NodeId) -> LowerResult<NodeId> {
    let old = t.old();
    let ptr = old.ins(node)[0];
    // All other member accesses must have been lowered already; only the
    // frame pointer remains.
    let frame_based = old.op(ptr) == Op::Proj
        && old.op(old.ins(ptr)[0]) == Op::Start
        && proj_num(old, ptr) == pn::START_FRAME;
    if !frame_based {
        return Err(LowerError::Unsupported {
            node,
            reason: "member base is not the frame pointer",
        });
    }
    let block = t.block_of(node)?;
    let new_ptr = t.t(ptr)?;
    let offset = match old.attr(node) {
        Attr::FrameOffset(off) => off,
        _ => 0,
    };
    Ok(t.build(
        block,
        Op::ArmFrameAddr,
        MODE_GP,
        &[new_ptr],
        Attr::FrameOffset(offset),
    ))
}

fn gen_unknown(t: &mut ArmTransform<'_>, node: NodeId) -> LowerResult<NodeId> {
    let old = t.old();
    let block = t.block_of(node)?;
    let mode = old.mode(node);
    if mode.is_float() {
        if t.config.fpu != FpuKind::Fpa {
            return Err(LowerError::Unsupported {
                node,
                reason: "softfloat not lowered",
            });
        }
        return Ok(t.build(block, Op::ArmFConst, mode, &[], Attr::Float(0.0)));
    }
    if mode.is_int() {
        return Ok(t.create_const_graph_value(block, 0));
    }
    Err(LowerError::Unsupported {
        node,
        reason: "unexpected Unknown mode",
    })
}

fn gen_jmp(t: &mut ArmTransform<'_>, node: NodeId) -> LowerResult<NodeId> {
    let block = t.block_of(node)?;
    Ok(t.build(block, Op::ArmJmp, Mode::Control, &[], Attr::None))
}

fn gen_phi(t: &mut ArmTransform<'_>, node: NodeId) -> LowerResult<NodeId> {
    let mode = t.old().mode(node);
    if mode.is_int() {
        // 64-bit values are split before instruction selection; all
        // integer phis live in 32-bit registers afterwards.
        if mode.bits() > 32 {
            return Err(LowerError::Unsupported {
                node,
                reason: "wide integer phi must be lowered before instruction selection",
            });
        }
        transform_phi(t, node, MODE_GP, gp_req())
    } else {
        transform_phi(t, node, mode, RegReq::NoReg)
    }
}

fn gen_adds_t(t: &mut ArmTransform<'_>, node: NodeId) -> LowerResult<NodeId> {
    let old = t.old();
    let left = old.ins(node)[0];
    let right = old.ins(node)[1];
    let factories = [BinopFactory::new(Op::ArmAddS, Mode::Tuple)];
    let res = t.int_binop_ops(
        node,
        left,
        right,
        MatchFlags::COMMUTATIVE | MatchFlags::SIZE_NEUTRAL,
        &factories,
    )?;
    t.eng
        .new_graph_mut()
        .set_out_req(res, apn::FLAGOP_FLAGS as usize, fixed(FLAGS));
    Ok(res)
}

fn gen_subs_t(t: &mut ArmTransform<'_>, node: NodeId) -> LowerResult<NodeId> {
    let old = t.old();
    let left = old.ins(node)[0];
    let right = old.ins(node)[1];
    let factories = [
        BinopFactory::new(Op::ArmSubS, Mode::Tuple),
        BinopFactory::new(Op::ArmRsbS, Mode::Tuple),
    ];
    let res = t.int_binop_ops(
        node,
        left,
        right,
        MatchFlags::SIZE_NEUTRAL | MatchFlags::REVERSE,
        &factories,
    )?;
    t.eng
        .new_graph_mut()
        .set_out_req(res, apn::FLAGOP_FLAGS as usize, fixed(FLAGS));
    Ok(res)
}

fn gen_umull_t(t: &mut ArmTransform<'_>, node: NodeId) -> LowerResult<NodeId> {
    let old = t.old();
    let block = t.block_of(node)?;
    let new_left = t.t(old.ins(node)[0])?;
    let new_right = t.t(old.ins(node)[1])?;
    Ok(t.build(
        block,
        Op::ArmUMulL,
        Mode::Tuple,
        &[new_left, new_right],
        Attr::None,
    ))
}

// ---------------------------------------------------------------------------
// Calling-convention materialization.
// ---------------------------------------------------------------------------

/// Transform the start node into the prolog: one output per incoming
/// register plus memory, stack pointer and the callee-saved values.
fn gen_start(t: &mut ArmTransform<'_>, node: NodeId) -> LowerResult<NodeId> {
    let block = t.block_of(node)?;

    let mut out_reqs: Vec<RegReq> = Vec::new();
    t.start_mem_pos = out_reqs.len() as u32;
    out_reqs.push(RegReq::NoReg);
    t.start_sp_pos = out_reqs.len() as u32;
    t.start_val_pos.insert(SP, t.start_sp_pos);
    out_reqs.push(fixed(SP));

    // Function parameters in registers.
    let param_regs: Vec<Reg> = t
        .cconv
        .parameters
        .iter()
        .flat_map(|slot| [slot.reg0, slot.reg1])
        .flatten()
        .collect();
    for reg in param_regs {
        t.start_val_pos.insert(reg, out_reqs.len() as u32);
        out_reqs.push(fixed(reg));
    }

    // Callee saved registers pass through to the function exit.
    t.start_callee_saves_offset = out_reqs.len() as u32;
    for &reg in CALLEE_SAVES.iter() {
        out_reqs.push(fixed(reg));
    }

    let start = t.build(block, Op::ArmStart, Mode::Tuple, &[], Attr::None);
    t.eng.new_graph_mut().set_out_reqs(start, out_reqs);
    Ok(start)
}

fn gen_proj_start(t: &mut ArmTransform<'_>, node: NodeId) -> LowerResult<NodeId> {
    match proj_num(t.old(), node) {
        pn::START_M => t.start_proj_mem(),
        pn::START_FRAME => t.start_proj_sp(),
        pn::START_ARGS => Err(LowerError::Unsupported {
            node,
            reason: "argument tuple has no direct replacement",
        }),
        other => Err(LowerError::UnexpectedProj {
            op: Op::Start,
            node,
            pn: other,
        }),
    }
}

/// Method argument: Proj(Proj(Start)). Register arguments read the Start
/// outputs; stack arguments load from the incoming argument area.
fn gen_proj_proj_start(t: &mut ArmTransform<'_>, node: NodeId) -> LowerResult<NodeId> {
    let old = t.old();
    debug_assert_eq!(proj_num(old, old.ins(node)[0]), pn::START_ARGS);

    let param_idx = proj_num(old, node) as usize;
    let slot = t.cconv.parameters[param_idx];
    let new_block = t.block_of(node)?;

    if let Some(reg0) = slot.reg0 {
        // Argument transmitted in a register.
        let mut value = t.start_proj_reg(reg0, node)?;

        if slot.ty.is_float() {
            let value1 = if let Some(reg1) = slot.reg1 {
                Some(t.start_proj_reg(reg1, node)?)
            } else if let Some(offset) = slot.offset {
                // Second half of a straddling double, from the stack.
                let fp = t.start_proj_sp()?;
                let mem = t.start_proj_mem()?;
                let ldr = t.build(
                    new_block,
                    Op::ArmLdr,
                    Mode::Tuple,
                    &[fp, mem],
                    Attr::MemAccess {
                        mode: MODE_GP,
                        offset,
                        frame: true,
                    },
                );
                Some(t.proj(ldr, apn::LDR_RES, MODE_GP))
            } else {
                None
            };

            value = match value1 {
                Some(value1) => t.ints_to_double(new_block, value, value1)?,
                None => t.int_to_float(new_block, value)?,
            };
        }
        Ok(value)
    } else {
        // Argument transmitted on the stack.
        let fp = t.start_proj_sp()?;
        let mem = t.start_proj_mem()?;
        let offset = slot.offset.ok_or(LowerError::Unsupported {
            node,
            reason: "parameter has neither register nor stack slot",
        })?;

        let access = Attr::MemAccess {
            mode: if slot.ty.is_float() { slot.ty } else { MODE_GP },
            offset,
            frame: true,
        };
        if slot.ty.is_float() {
            let load = t.build(new_block, Op::ArmLdf, Mode::Tuple, &[fp, mem], access);
            Ok(t.proj(load, apn::LDF_RES, MODE_FPA))
        } else {
            let load = t.build(new_block, Op::ArmLdr, Mode::Tuple, &[fp, mem], access);
            Ok(t.proj(load, apn::LDR_RES, MODE_GP))
        }
    }
}

/// Transform a Return node into epilogue inputs: memory, final stack
/// pointer, result values in their registers, then the callee-saved
/// values forwarded from the function entry.
fn gen_return(t: &mut ArmTransform<'_>, node: NodeId) -> LowerResult<NodeId> {
    let old = t.old();
    let new_block = t.block_of(node)?;
    let mem = old.ins(node)[0];
    let new_mem = t.t(mem)?;
    let sp = t.stack_pointer_for(node)?;
    let n_res = old.ins(node).len() - 1;

    let mut ins: Vec<NodeId> = Vec::with_capacity(2 + n_res + CALLEE_SAVES.len());
    let mut reqs: Vec<RegReq> = Vec::with_capacity(ins.capacity());

    ins.push(new_mem);
    reqs.push(RegReq::NoReg);
    ins.push(sp);
    reqs.push(fixed(SP));

    // Result values.
    for i in 0..n_res {
        let res_value = old.ins(node)[1 + i];
        let new_res_value = t.t(res_value)?;
        let slot = t.cconv.results[i];
        let reg = slot.reg0.ok_or(LowerError::Unsupported {
            node,
            reason: "return value without register assignment",
        })?;
        ins.push(new_res_value);
        reqs.push(fixed(reg));
    }

    // Connect callee saves with their values at the function begin.
    for (i, &reg) in CALLEE_SAVES.iter().enumerate() {
        let pos = t.start_callee_saves_offset + i as u32;
        let value = t.start_proj(pos, MODE_GP)?;
        ins.push(value);
        reqs.push(fixed(reg));
    }

    let ret = t.build(new_block, Op::ArmReturn, Mode::Control, &ins, Attr::None);
    t.eng.new_graph_mut().set_in_reqs(ret, reqs);
    Ok(ret)
}

/// Transform a Call node: merged memory input, argument-area stack
/// adjustment, register arguments (64-bit values split across a pair or a
/// register plus a stack store), the callee, and one clobber output per
/// caller-saved register.
fn gen_call(t: &mut ArmTransform<'_>, node: NodeId) -> LowerResult<NodeId> {
    let old = t.old();
    let new_block = t.block_of(node)?;
    let mem = old.ins(node)[0];
    let callee = old.ins(node)[1];
    let n_params = old.ins(node).len() - 2;
    let sig = match old.attr(node) {
        Attr::Call { sig } => sig,
        _ => {
            return Err(LowerError::Unsupported {
                node,
                reason: "call without signature",
            })
        }
    };
    let cconv = decide_calling_convention(sig, true);
    debug_assert_eq!(n_params, cconv.parameters.len());

    let new_mem = t.t(mem)?;

    // Stack pointer: create the parameter stack frame and align the stack.
    // An IncSp is emitted even for an empty argument area to keep the
    // alignment invariant.
    let new_frame = t.stack_pointer_for(node)?;
    let incsp = t.build(
        new_block,
        Op::IncSp,
        MODE_GP,
        &[new_frame],
        Attr::IncSp {
            offset: cconv.param_stack_size,
            align: ARM_PO2_STACK_ALIGNMENT,
        },
    );
    t.eng.new_graph_mut().set_out_req(incsp, 0, fixed(SP));

    let mut ins: Vec<NodeId> = Vec::new();
    let mut in_reqs: Vec<RegReq> = Vec::new();
    // Memory input is placed once the argument stores are known.
    let mem_pos = ins.len();
    ins.push(new_mem);
    in_reqs.push(RegReq::NoReg);
    ins.push(incsp);
    in_reqs.push(fixed(SP));

    let mut sync_ins: Vec<NodeId> = Vec::new();
    for p in 0..n_params {
        let value = old.ins(node)[2 + p];
        let mut new_value = t.t(value)?;
        let mut new_value1 = None;
        let slot = cconv.parameters[p];
        let mut mode = slot.ty;

        if mode.is_float() && slot.reg0.is_some() {
            if mode.bits() == 64 {
                let (lo, hi) = t.double_to_ints(new_block, new_value)?;
                new_value = lo;
                new_value1 = Some(hi);
            } else {
                new_value = t.float_to_int(new_block, new_value)?;
            }
        }

        // Put the value into registers.
        if let Some(reg0) = slot.reg0 {
            ins.push(new_value);
            in_reqs.push(fixed(reg0));
            match new_value1 {
                None => continue,
                Some(high) => new_value = high,
            }
        }
        if let Some(reg1) = slot.reg1 {
            ins.push(new_value);
            in_reqs.push(fixed(reg1));
            continue;
        }

        // We need a store if we are here.
        if new_value1.is_some() {
            mode = MODE_GP;
        }
        let offset = slot.offset.ok_or(LowerError::Unsupported {
            node,
            reason: "argument has neither register nor stack slot",
        })?;
        let access = Attr::MemAccess {
            mode,
            offset,
            frame: true,
        };
        let store_op = if mode.is_float() { Op::ArmStf } else { Op::ArmStr };
        let store = t.build(
            new_block,
            store_op,
            Mode::Memory,
            &[incsp, new_value, new_mem],
            access,
        );
        sync_ins.push(store);
    }

    // Construct the memory input.
    match sync_ins.len() {
        0 => {}
        1 => ins[mem_pos] = sync_ins[0],
        _ => ins[mem_pos] = t.build(new_block, Op::Sync, Mode::Memory, &sync_ins, Attr::None),
    }

    let entity = if old.op(callee) == Op::Address {
        match old.attr(callee) {
            Attr::Address { name } => Some(name),
            _ => None,
        }
    } else {
        None
    };
    if entity.is_none() {
        let new_callee = t.t(callee)?;
        ins.push(new_callee);
        in_reqs.push(gp_req());
    }

    let out_arity = apn::BL_FIRST_RESULT as usize + CALLER_SAVES.len();
    let call_op = if entity.is_some() { Op::ArmBl } else { Op::ArmLinkMovPC };
    let res = t.build(
        new_block,
        call_op,
        Mode::Tuple,
        &ins,
        Attr::ArmCall {
            callee: entity,
            sig,
        },
    );
    t.eng.new_graph_mut().set_in_reqs(res, in_reqs);

    // Output register requirements: memory, stack, then the clobbers.
    let mut out_reqs = vec![RegReq::NoReg; out_arity];
    out_reqs[apn::BL_STACK as usize] = fixed(SP);
    for (o, &reg) in CALLER_SAVES.iter().enumerate() {
        out_reqs[apn::BL_FIRST_RESULT as usize + o] = fixed(reg);
    }
    t.eng.new_graph_mut().set_out_reqs(res, out_reqs);
    let pinned = old.node(node).pinned;
    t.eng.new_graph_mut().set_pinned(res, pinned);

    // IncSp to destroy the call stack frame again.
    let call_stack = t.proj(res, apn::BL_STACK, MODE_GP);
    let incsp_after = t.build(
        new_block,
        Op::IncSp,
        MODE_GP,
        &[call_stack],
        Attr::IncSp {
            offset: -cconv.param_stack_size,
            align: 0,
        },
    );
    t.eng.new_graph_mut().set_out_req(incsp_after, 0, fixed(SP));
    // The last stack producer of a block must stay alive.
    t.eng.new_graph_mut().keep_alive(incsp_after);
    t.node_to_stack.insert(node, incsp_after);

    Ok(res)
}

// ---------------------------------------------------------------------------
// Projection handlers.
// ---------------------------------------------------------------------------

fn gen_proj_load(t: &mut ArmTransform<'_>, node: NodeId) -> LowerResult<NodeId> {
    let old = t.old();
    let load = old.ins(node)[0];
    let new_load = t.t(load)?;
    let num = proj_num(old, node);

    // Renumber the proj.
    match t.eng.new_graph().op(new_load) {
        Op::ArmLdr => match num {
            pn::LOAD_RES => Ok(t.proj(new_load, apn::LDR_RES, MODE_GP)),
            pn::LOAD_M => Ok(t.proj(new_load, apn::LDR_M, Mode::Memory)),
            other => Err(LowerError::UnexpectedProj {
                op: Op::Load,
                node,
                pn: other,
            }),
        },
        Op::ArmLdf => match num {
            pn::LOAD_RES => {
                let mode = match old.attr(load) {
                    Attr::Load { mode, .. } => mode,
                    _ => MODE_FPA,
                };
                Ok(t.proj(new_load, apn::LDF_RES, mode))
            }
            pn::LOAD_M => Ok(t.proj(new_load, apn::LDF_M, Mode::Memory)),
            other => Err(LowerError::UnexpectedProj {
                op: Op::Load,
                node,
                pn: other,
            }),
        },
        _ => Err(LowerError::UnexpectedProj {
            op: Op::Load,
            node,
            pn: num,
        }),
    }
}

fn gen_proj_store(t: &mut ArmTransform<'_>, node: NodeId) -> LowerResult<NodeId> {
    let old = t.old();
    let pred = old.ins(node)[0];
    match proj_num(old, node) {
        pn::STORE_M => t.t(pred),
        other => Err(LowerError::UnexpectedProj {
            op: Op::Store,
            node,
            pn: other,
        }),
    }
}

fn gen_proj_div(t: &mut ArmTransform<'_>, node: NodeId) -> LowerResult<NodeId> {
    let old = t.old();
    let pred = old.ins(node)[0];
    let new_pred = t.t(pred)?;
    let mode = old.mode(node);
    match proj_num(old, node) {
        pn::DIV_M => Ok(t.proj(new_pred, apn::DVF_M, Mode::Memory)),
        pn::DIV_RES => Ok(t.proj(new_pred, apn::DVF_RES, mode)),
        other => Err(LowerError::UnexpectedProj {
            op: Op::Div,
            node,
            pn: other,
        }),
    }
}

fn gen_proj_call(t: &mut ArmTransform<'_>, node: NodeId) -> LowerResult<NodeId> {
    let old = t.old();
    let call = old.ins(node)[0];
    let new_call = t.t(call)?;
    match proj_num(old, node) {
        pn::CALL_M => Ok(t.proj(new_call, apn::BL_M, Mode::Memory)),
        other => Err(LowerError::UnexpectedProj {
            op: Op::Call,
            node,
            pn: other,
        }),
    }
}

/// Output slot of a multi-result node constrained to one specific
/// register.
fn find_out_for_reg(graph: &Graph<'_>, node: NodeId, reg: Reg) -> Option<u32> {
    graph
        .node(node)
        .out_reqs()
        .iter()
        .position(|req| *req == RegReq::Fixed(reg))
        .map(|p| p as u32)
}

/// Call result: found by scanning the call's output register constraints,
/// never by position, because the clobber outputs vary by call form.
fn gen_proj_proj_call(t: &mut ArmTransform<'_>, node: NodeId) -> LowerResult<NodeId> {
    let old = t.old();
    let call = old.ins(old.ins(node)[0])[0];
    let new_call = t.t(call)?;
    let sig = match old.attr(call) {
        Attr::Call { sig } => sig,
        _ => {
            return Err(LowerError::Unsupported {
                node,
                reason: "call without signature",
            })
        }
    };
    let cconv = decide_calling_convention(sig, true);
    let res_idx = proj_num(old, node) as usize;
    let slot = cconv.results[res_idx];
    let reg = slot.reg0.ok_or(LowerError::Unsupported {
        node,
        reason: "call result without register assignment",
    })?;
    let regn =
        find_out_for_reg(t.eng.new_graph(), new_call, reg).ok_or(LowerError::Unsupported {
            node,
            reason: "call output constraints miss the result register",
        })?;
    let mode = if slot.ty.is_float() { MODE_FPA } else { MODE_GP };
    Ok(t.proj(new_call, regn, mode))
}

fn gen_proj_proj(t: &mut ArmTransform<'_>, node: NodeId) -> LowerResult<NodeId> {
    let old = t.old();
    let pred = old.ins(node)[0];
    let pred_pred = old.ins(pred)[0];
    match old.op(pred_pred) {
        Op::Call => gen_proj_proj_call(t, node),
        Op::Start => gen_proj_proj_start(t, node),
        _ => Err(LowerError::Unsupported {
            node,
            reason: "unexpected nested projection",
        }),
    }
}

fn gen_proj_flagop(t: &mut ArmTransform<'_>, node: NodeId) -> LowerResult<NodeId> {
    let old = t.old();
    let pred = old.ins(node)[0];
    let pred_op = old.op(pred);
    let new_pred = t.t(pred)?;
    match proj_num(old, node) {
        pn::FLAGOP_RES => Ok(t.proj(new_pred, apn::FLAGOP_RES, MODE_GP)),
        pn::FLAGOP_FLAGS => Ok(t.proj(new_pred, apn::FLAGOP_FLAGS, Mode::Flags)),
        other => Err(LowerError::UnexpectedProj {
            op: pred_op,
            node,
            pn: other,
        }),
    }
}

fn gen_proj_umull_t(t: &mut ArmTransform<'_>, node: NodeId) -> LowerResult<NodeId> {
    let old = t.old();
    let pred = old.ins(node)[0];
    let new_pred = t.t(pred)?;
    match proj_num(old, node) {
        pn::UMULL_LOW => Ok(t.proj(new_pred, apn::UMULL_LOW, MODE_GP)),
        pn::UMULL_HIGH => Ok(t.proj(new_pred, apn::UMULL_HIGH, MODE_GP)),
        other => Err(LowerError::UnexpectedProj {
            op: Op::UMulLT,
            node,
            pn: other,
        }),
    }
}

// The cleanliness of a Mov result depends on its shifter operand; that
// case analysis is still missing, so the predicate stays conservative.
fn arm_mov_clean(_oracle: &Oracle<'_, '_>, _node: NodeId, _mode: Mode) -> bool {
    false
}

/// Enter all transform functions into the registry.
fn register_transformers(registry: &mut Registry<ArmTransform<'_>>) {
    setup_generic(registry);

    registry.register(Op::Add, gen_add);
    registry.register(Op::Address, gen_address);
    registry.register(Op::And, gen_and);
    registry.register(Op::AddST, gen_adds_t);
    registry.register(Op::SubST, gen_subs_t);
    registry.register(Op::UMulLT, gen_umull_t);
    registry.register(Op::Call, gen_call);
    registry.register(Op::Cmp, gen_cmp);
    registry.register(Op::Cond, gen_cond);
    registry.register(Op::Const, gen_const);
    registry.register(Op::Conv, gen_conv);
    registry.register(Op::Div, gen_div);
    registry.register(Op::Eor, gen_eor);
    registry.register(Op::Jmp, gen_jmp);
    registry.register(Op::Load, gen_load);
    registry.register(Op::Member, gen_member);
    registry.register(Op::Minus, gen_minus);
    registry.register(Op::Mul, gen_mul);
    registry.register(Op::Not, gen_not);
    registry.register(Op::Or, gen_or);
    registry.register(Op::Phi, gen_phi);
    registry.register(Op::Return, gen_return);
    registry.register(Op::Shl, gen_shl);
    registry.register(Op::Shr, gen_shr);
    registry.register(Op::Shrs, gen_shrs);
    registry.register(Op::Start, gen_start);
    registry.register(Op::Store, gen_store);
    registry.register(Op::Sub, gen_sub);
    registry.register(Op::Switch, gen_switch);
    registry.register(Op::Unknown, gen_unknown);

    registry.register_proj(Op::AddST, gen_proj_flagop);
    registry.register_proj(Op::SubST, gen_proj_flagop);
    registry.register_proj(Op::UMulLT, gen_proj_umull_t);
    registry.register_proj(Op::Call, gen_proj_call);
    registry.register_proj(Op::Cond, duplicate_node);
    registry.register_proj(Op::Div, gen_proj_div);
    registry.register_proj(Op::Load, gen_proj_load);
    registry.register_proj(Op::Proj, gen_proj_proj);
    registry.register_proj(Op::Start, gen_proj_start);
    registry.register_proj(Op::Store, gen_proj_store);
    registry.register_proj(Op::Switch, duplicate_node);

    registry.register_clean(Op::ArmMov, arm_mov_clean);
}

/// Result of lowering one function graph.
pub struct LoweredFunction<'g> {
    pub graph: Graph<'g>,
    pub layout: StackLayout,
    pub stats: LowerStats,
}

impl<'g> std::fmt::Debug for LoweredFunction<'g> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoweredFunction")
            .field("graph_len", &self.graph.len())
            .field("layout", &self.layout)
            .field("stats", &self.stats)
            .finish()
    }
}

/// Lower a machine-independent function graph into an ARM graph.
///
/// The new graph is allocated in `new_arena`; the old graph (and its
/// arena) may be released as a unit once this returns successfully.
pub fn lower_function<'g>(
    old: &'g Graph<'g>,
    new_arena: &'g Bump,
    config: ArmConfig,
    sig: Signature<'g>,
) -> LowerResult<LoweredFunction<'g>> {
    let mut registry = Registry::new();
    register_transformers(&mut registry);

    let stackorder = collect_stack_nodes(old);
    let cconv = decide_calling_convention(sig, false);
    let layout = StackLayout::for_function(&cconv);
    let new = Graph::with_base(new_arena, old.id_end());

    let mut host = ArmTransform {
        eng: Engine::new(old, new),
        registry,
        config,
        cconv,
        stackorder,
        node_to_stack: HashMap::new(),
        start_val_pos: HashMap::new(),
        start_mem_pos: 0,
        start_sp_pos: 1,
        start_callee_saves_offset: 0,
        start_projs: HashMap::new(),
    };
    lower_graph(&mut host)?;

    let stats = host.eng.stats().clone();
    Ok(LoweredFunction {
        graph: host.eng.into_new_graph(),
        layout,
        stats,
    })
}
