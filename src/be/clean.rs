// This module implements the upper-bits-clean oracle: a conservative, lazily
// evaluated predicate answering whether the bits of a value above its declared
// width are already correctly extended (zero for unsigned, sign copies for
// signed), so the pattern matcher can elide redundant extension instructions.
// It is deliberately incomplete rather than a fixpoint dataflow analysis; an
// unregistered kind answers false, which is always safe, just pessimal.

//! Upper-bits cleanliness oracle.

use hashbrown::HashMap;

use crate::ir::{pn, Attr, Graph, Mode, NodeId, Op};

/// Cleanliness predicate for one node kind.
pub type CleanFn = fn(&Oracle<'_, '_>, NodeId, Mode) -> bool;

/// Per-kind predicate table; part of the dispatch registry.
pub struct CleanTable {
    fns: HashMap<Op, CleanFn>,
}

impl CleanTable {
    pub fn new() -> Self {
        Self { fns: HashMap::new() }
    }

    /// Registering a kind twice is a programming error.
    pub fn register(&mut self, op: Op, f: CleanFn) {
        let prev = self.fns.insert(op, f);
        assert!(prev.is_none(), "clean predicate for {op:?} registered twice");
    }

    fn get(&self, op: Op) -> Option<CleanFn> {
        self.fns.get(&op).copied()
    }
}

impl Default for CleanTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Oracle over one graph generation.
pub struct Oracle<'a, 'g> {
    graph: &'a Graph<'g>,
    table: &'a CleanTable,
}

impl<'a, 'g> Oracle<'a, 'g> {
    pub fn new(graph: &'a Graph<'g>, table: &'a CleanTable) -> Self {
        Self { graph, table }
    }

    pub fn graph(&self) -> &'a Graph<'g> {
        self.graph
    }

    /// Are the bits of `node` above `mode`'s width already correctly
    /// extended? Answers false for kinds without a registered predicate.
    pub fn clean(&self, node: NodeId, mode: Mode) -> bool {
        match self.table.get(self.graph.op(node)) {
            Some(f) => f(self, node, mode),
            None => false,
        }
    }
}

fn bit_binop_clean(o: &Oracle<'_, '_>, node: NodeId, mode: Mode) -> bool {
    let ins = o.graph.ins(node);
    o.clean(ins[0], mode) && o.clean(ins[1], mode)
}

fn and_clean(o: &Oracle<'_, '_>, node: NodeId, mode: Mode) -> bool {
    if !mode.is_signed() {
        let ins = o.graph.ins(node);
        o.clean(ins[0], mode) || o.clean(ins[1], mode)
    } else {
        bit_binop_clean(o, node, mode)
    }
}

fn mux_clean(o: &Oracle<'_, '_>, node: NodeId, mode: Mode) -> bool {
    // Mux operands: selector, false value, true value.
    let ins = o.graph.ins(node);
    o.clean(ins[1], mode) && o.clean(ins[2], mode)
}

fn shr_clean(o: &Oracle<'_, '_>, node: NodeId, mode: Mode) -> bool {
    if mode.is_signed() {
        return false;
    }
    let ins = o.graph.ins(node);
    if let Some(val) = o.graph.const_value(ins[1]) {
        if val >= 32 - i64::from(mode.bits()) {
            return true;
        }
    }
    o.clean(ins[0], mode)
}

fn shrs_clean(o: &Oracle<'_, '_>, node: NodeId, mode: Mode) -> bool {
    let ins = o.graph.ins(node);
    if mode.is_signed() {
        // Shifting by at least 32-width fills everything above the new
        // sign bit with copies of it, whatever the operand was.
        if let Some(val) = o.graph.const_value(ins[1]) {
            if val >= 32 - i64::from(mode.bits()) {
                return true;
            }
        }
    }
    o.clean(ins[0], mode)
}

fn const_clean(o: &Oracle<'_, '_>, node: NodeId, mode: Mode) -> bool {
    let val = match o.graph.attr(node) {
        Attr::Int(v) => v,
        _ => return false,
    };
    if mode.is_signed() {
        let shifted = val >> (mode.bits() - 1);
        shifted == 0 || shifted == -1
    } else {
        let mut shifted = val as u64;
        shifted >>= mode.bits() - 1;
        shifted >>= 1;
        shifted == 0
    }
}

fn conv_clean(o: &Oracle<'_, '_>, node: NodeId, mode: Mode) -> bool {
    let dest_mode = o.graph.mode(node);
    let op = o.graph.ins(node)[0];
    let src_mode = o.graph.mode(op);
    if src_mode.is_float() {
        return true;
    }

    let src_bits = src_mode.bits();
    let dest_bits = dest_mode.bits();
    // Down-conversions are a nop.
    if src_bits >= dest_bits {
        return o.clean(op, mode);
    }
    // Up-conversions are fine if the source is big enough or the sign matches.
    src_bits <= mode.bits() && src_mode.is_signed() == mode.is_signed()
}

fn proj_clean(o: &Oracle<'_, '_>, node: NodeId, mode: Mode) -> bool {
    let pred = o.graph.ins(node)[0];
    if o.graph.op(pred) != Op::Load {
        return false;
    }
    if let Attr::Proj(p) = o.graph.attr(node) {
        if p != pn::LOAD_RES {
            return false;
        }
    }
    let load_mode = match o.graph.attr(pred) {
        Attr::Load { mode, .. } => mode,
        _ => return false,
    };
    load_mode.bits() <= mode.bits() && load_mode.is_signed() == mode.is_signed()
}

/// Register the predicates for the machine-independent kinds.
pub fn setup_generic_clean(table: &mut CleanTable) {
    table.register(Op::And, and_clean);
    table.register(Op::Const, const_clean);
    table.register(Op::Conv, conv_clean);
    table.register(Op::Eor, bit_binop_clean);
    table.register(Op::Mux, mux_clean);
    table.register(Op::Or, bit_binop_clean);
    table.register(Op::Proj, proj_clean);
    table.register(Op::Shr, shr_clean);
    table.register(Op::Shrs, shrs_clean);
}
