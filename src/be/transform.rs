// This module implements the generic SSA-to-SSA lowering engine shared by all
// target backends: the per-opcode dispatch registry, the memoized transform of
// old-graph nodes into new-graph nodes, the FIFO worklist that bounds recursion
// for blocks and the graph terminator, the Phi placeholder construction that
// tolerates true dependency cycles, and the fix-up pass that replaces the stale
// old-graph references those placeholders leave behind. Target backends register
// one transform handler per opcode (plus one projection handler per multi-result
// opcode) before lowering starts; a missing handler for an encountered kind is a
// fatal configuration error, not a silent default.

//! Generic lowering engine and dispatch registry.
//!
//! The engine drains a worklist of old-graph nodes; for each node it looks
//! up the registered handler for the node's kind and invokes it. Handlers
//! call back into [`transform_node`] to lower their own operands, building
//! replacements depth-first. Projections are dispatched on the kind of
//! their predecessor, because only the predecessor's handler knows how many
//! outputs it produced and in what order.

use std::collections::VecDeque;
use std::fmt;

use hashbrown::{HashMap, HashSet};
use log::trace;

use crate::be::clean::{CleanFn, CleanTable, Oracle};
use crate::be::error::{LowerError, LowerResult};
use crate::ir::{Graph, Mode, NodeId, Op, RegReq};

/// Memo entry of the old-node to new-node map.
///
/// `Pending` guards against mis-detecting completion while a handler runs;
/// it does not guard against true cycles, which only Phi handlers may
/// introduce and which they resolve by not recursing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Memo {
    Pending,
    Done(NodeId),
}

/// Counters for debugging and the memoization tests.
#[derive(Debug, Default, Clone)]
pub struct LowerStats {
    /// Transform handlers actually executed (at most once per old node).
    pub handlers_run: usize,
    /// Lookups answered from the memo map.
    pub memo_hits: usize,
    /// Operand/block slots rewritten by the fix-up pass.
    pub stale_slots_fixed: usize,
}

impl fmt::Display for LowerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Lowering statistics:")?;
        writeln!(f, "  Handlers run: {}", self.handlers_run)?;
        writeln!(f, "  Memo hits: {}", self.memo_hits)?;
        writeln!(f, "  Stale slots fixed: {}", self.stale_slots_fixed)
    }
}

/// Transform handler: lowers one old node, returning its replacement.
pub type TransformFn<H> = fn(&mut H, NodeId) -> LowerResult<NodeId>;

/// Per-opcode handler table, immutable once lowering starts.
pub struct Registry<H> {
    transform: HashMap<Op, TransformFn<H>>,
    proj: HashMap<Op, TransformFn<H>>,
    clean: CleanTable,
}

impl<H> Registry<H> {
    pub fn new() -> Self {
        Self {
            transform: HashMap::new(),
            proj: HashMap::new(),
            clean: CleanTable::new(),
        }
    }

    /// Register the transform handler for a node kind.
    /// Registering a kind twice is a programming error.
    pub fn register(&mut self, op: Op, f: TransformFn<H>) {
        let prev = self.transform.insert(op, f);
        assert!(prev.is_none(), "transform handler for {op:?} registered twice");
    }

    /// Register the projection handler for a predecessor kind.
    pub fn register_proj(&mut self, op: Op, f: TransformFn<H>) {
        let prev = self.proj.insert(op, f);
        assert!(prev.is_none(), "projection handler for {op:?} registered twice");
    }

    /// Register the upper-bits-clean predicate for a node kind.
    pub fn register_clean(&mut self, op: Op, f: CleanFn) {
        self.clean.register(op, f);
    }

    pub fn transform_fn(&self, op: Op) -> Option<TransformFn<H>> {
        self.transform.get(&op).copied()
    }

    pub fn proj_fn(&self, op: Op) -> Option<TransformFn<H>> {
        self.proj.get(&op).copied()
    }

    pub fn clean_table(&self) -> &CleanTable {
        &self.clean
    }
}

impl<H> Default for Registry<H> {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-function lowering state: the two graph generations, the memo map
/// and the pending-node queue.
pub struct Engine<'g> {
    old: &'g Graph<'g>,
    new: Graph<'g>,
    memo: HashMap<NodeId, Memo>,
    worklist: VecDeque<NodeId>,
    stats: LowerStats,
}

impl<'g> Engine<'g> {
    /// New engine lowering `old` into `new`. The new graph's identity
    /// range must start past the old graph's (see [`Graph::with_base`]).
    pub fn new(old: &'g Graph<'g>, new: Graph<'g>) -> Self {
        debug_assert!(new.id_end() >= old.id_end());
        Self {
            old,
            new,
            memo: HashMap::new(),
            worklist: VecDeque::new(),
            stats: LowerStats::default(),
        }
    }

    pub fn old(&self) -> &'g Graph<'g> {
        self.old
    }

    pub fn new_graph(&self) -> &Graph<'g> {
        &self.new
    }

    pub fn new_graph_mut(&mut self) -> &mut Graph<'g> {
        &mut self.new
    }

    /// Consume the engine, yielding the lowered graph.
    pub fn into_new_graph(self) -> Graph<'g> {
        self.new
    }

    pub fn stats(&self) -> &LowerStats {
        &self.stats
    }

    /// Finished memo entry for an old node, if any.
    pub fn transformed(&self, old: NodeId) -> Option<NodeId> {
        match self.memo.get(&old) {
            Some(Memo::Done(n)) => Some(*n),
            _ => None,
        }
    }

    /// Record the replacement of an old node.
    pub fn set_transformed(&mut self, old: NodeId, new: NodeId) {
        self.memo.insert(old, Memo::Done(new));
    }

    /// Put all predecessors of an old node into the worklist.
    pub fn enqueue_preds(&mut self, node: NodeId) {
        for &pred in self.old.ins(node) {
            self.worklist.push_back(pred);
        }
    }

    /// Replace every operand slot and block pointer that still denotes an
    /// old-graph node by its memo entry. Walks the new graph from its
    /// anchors, visiting each node exactly once; only Phi-induced cycles
    /// (and the block/terminator copies) leave such slots behind.
    pub fn fix_graph(&mut self) -> LowerResult<()> {
        let mut visited: HashSet<NodeId> = HashSet::new();
        let mut stack = vec![self.new.end(), self.new.start(), self.new.no_mem()];
        while let Some(node) = stack.pop() {
            if !visited.insert(node) {
                continue;
            }

            let block = self.new.block(node);
            if self.new.contains(block) {
                stack.push(block);
            } else {
                let fixed = self
                    .transformed(block)
                    .ok_or(LowerError::DanglingReference { node })?;
                self.new.set_block(node, fixed);
                self.stats.stale_slots_fixed += 1;
                stack.push(fixed);
            }

            for pos in 0..self.new.ins(node).len() {
                let pred = self.new.ins(node)[pos];
                if self.new.contains(pred) {
                    stack.push(pred);
                } else {
                    let fixed = self
                        .transformed(pred)
                        .ok_or(LowerError::DanglingReference { node })?;
                    self.new.set_in(node, pos, fixed);
                    self.stats.stale_slots_fixed += 1;
                    stack.push(fixed);
                }
            }
        }
        Ok(())
    }
}

/// Host of a lowering run: owns the engine and the handler registry.
/// Target backends add their own state (calling convention, configuration,
/// node-to-stack bookkeeping) behind this seam.
pub trait TransformHost<'g>: Sized {
    fn engine(&self) -> &Engine<'g>;
    fn engine_mut(&mut self) -> &mut Engine<'g>;
    fn registry(&self) -> &Registry<Self>;
}

/// Memoized transform of one old node.
///
/// Returns the memo entry if present; otherwise marks the node as being
/// processed, runs the registered handler for its kind exactly once, and
/// records the handler's result. Fails fatally when no handler is
/// registered for the kind.
pub fn transform_node<'g, H: TransformHost<'g>>(host: &mut H, node: NodeId) -> LowerResult<NodeId> {
    match host.engine().memo.get(&node) {
        Some(Memo::Done(new)) => {
            let new = *new;
            host.engine_mut().stats.memo_hits += 1;
            return Ok(new);
        }
        Some(Memo::Pending) => return Err(LowerError::TransformCycle { node }),
        None => {}
    }

    host.engine_mut().memo.insert(node, Memo::Pending);

    let op = host.engine().old().op(node);
    let handler = host
        .registry()
        .transform_fn(op)
        .ok_or(LowerError::NoTransformer { op, node })?;

    trace!("transforming node {} ({:?})", node.raw(), op);
    host.engine_mut().stats.handlers_run += 1;
    let new = handler(host, node)?;
    host.engine_mut().memo.insert(node, Memo::Done(new));
    Ok(new)
}

/// Transform the owning block of an old node.
pub fn transform_block_of<'g, H: TransformHost<'g>>(
    host: &mut H,
    node: NodeId,
) -> LowerResult<NodeId> {
    let block = host.engine().old().block(node);
    transform_node(host, block)
}

/// Drain the worklist, transforming every queued node (a no-op for nodes
/// already memoized).
pub fn drain_worklist<'g, H: TransformHost<'g>>(host: &mut H) -> LowerResult<()> {
    while let Some(node) = host.engine_mut().worklist.pop_front() {
        transform_node(host, node)?;
    }
    Ok(())
}

/// Run a complete lowering: transform the anchors, drain the worklist,
/// then fix the forward references left by cycles. The caller releases
/// the old graph's arena afterwards, never incrementally.
pub fn lower_graph<'g, H: TransformHost<'g>>(host: &mut H) -> LowerResult<()> {
    let old = host.engine().old();
    let old_end = old.end();
    let old_start = old.start();
    let old_no_mem = old.no_mem();

    let new_end = transform_node(host, old_end)?;
    host.engine_mut().new_graph_mut().set_end(new_end);
    let new_start = transform_node(host, old_start)?;
    host.engine_mut().new_graph_mut().set_start(new_start);
    let new_no_mem = transform_node(host, old_no_mem)?;
    host.engine_mut().new_graph_mut().set_no_mem(new_no_mem);

    drain_worklist(host)?;
    host.engine_mut().fix_graph()
}

/// Query the upper-bits-clean oracle for an old-graph node.
pub fn upper_bits_clean<'g, H: TransformHost<'g>>(host: &H, node: NodeId, mode: Mode) -> bool {
    let oracle = Oracle::new(host.engine().old(), host.registry().clean_table());
    oracle.clean(node, mode)
}

/// Transform helper for blocks: copy the block with its old control
/// predecessors (rewired by the fix-up pass) and enqueue them.
pub fn transform_block<'g, H: TransformHost<'g>>(host: &mut H, node: NodeId) -> LowerResult<NodeId> {
    let (preds, nr) = {
        let old = host.engine().old();
        (old.ins(node).to_vec(), old.node(node).nr)
    };
    let new_block = host.engine_mut().new_graph_mut().add_block(&preds);
    host.engine_mut().new_graph_mut().set_nr(new_block, nr);
    host.engine_mut().enqueue_preds(node);
    Ok(new_block)
}

/// Transform helper for the graph terminator. Predecessors are enqueued
/// instead of transformed to keep the pre-transform phase from visiting
/// the whole graph.
pub fn transform_end<'g, H: TransformHost<'g>>(host: &mut H, node: NodeId) -> LowerResult<NodeId> {
    let block = transform_block_of(host, node)?;
    let (keeps, mode, nr) = {
        let old = host.engine().old();
        (old.ins(node).to_vec(), old.mode(node), old.node(node).nr)
    };
    let new_end = host
        .engine_mut()
        .new_graph_mut()
        .add(Op::End, mode, block, &keeps, crate::ir::Attr::None);
    host.engine_mut().new_graph_mut().set_nr(new_end, nr);
    host.engine_mut().enqueue_preds(node);
    Ok(new_end)
}

/// Transform helper for projections: delegate to the projection handler
/// registered for the predecessor's kind.
pub fn transform_proj<'g, H: TransformHost<'g>>(host: &mut H, node: NodeId) -> LowerResult<NodeId> {
    let pred = host.engine().old().ins(node)[0];
    let pred_op = host.engine().old().op(pred);
    let handler = host
        .registry()
        .proj_fn(pred_op)
        .ok_or(LowerError::NoProjTransformer { pred_op, node })?;
    handler(host, node)
}

/// Generic pass-through for node kinds without target-specific lowering:
/// transform all operands and the owning block, then rebuild the node
/// structurally unchanged, preserving its identity number.
pub fn duplicate_node<'g, H: TransformHost<'g>>(host: &mut H, node: NodeId) -> LowerResult<NodeId> {
    let n_ins = host.engine().old().ins(node).len();
    let mut new_ins = Vec::with_capacity(n_ins);
    for pos in 0..n_ins {
        let pred = host.engine().old().ins(node)[pos];
        new_ins.push(transform_node(host, pred)?);
    }
    let block = transform_block_of(host, node)?;

    let (op, mode, attr, nr, pinned, src_loc) = {
        let n = host.engine().old().node(node);
        (n.op, n.mode, n.attr, n.nr, n.pinned, n.src_loc)
    };
    let new_graph = host.engine_mut().new_graph_mut();
    let new_node = new_graph.add(op, mode, block, &new_ins, attr);
    new_graph.set_nr(new_node, nr);
    new_graph.set_pinned(new_node, pinned);
    new_graph.set_src_loc(new_node, src_loc);
    Ok(new_node)
}

/// Transform helper for Phi nodes. Phis allow loops, so the replacement
/// keeps the old operand list for now (the fix-up pass rewires it) and
/// only enqueues the operands instead of recursing into them.
pub fn transform_phi<'g, H: TransformHost<'g>>(
    host: &mut H,
    node: NodeId,
    mode: Mode,
    req: RegReq,
) -> LowerResult<NodeId> {
    let block = transform_block_of(host, node)?;
    let (old_ins, nr, src_loc) = {
        let n = host.engine().old().node(node);
        (n.ins().to_vec(), n.nr, n.src_loc)
    };
    let arity = old_ins.len();

    let new_graph = host.engine_mut().new_graph_mut();
    let phi = new_graph.add(Op::Phi, mode, block, &old_ins, crate::ir::Attr::None);
    new_graph.set_nr(phi, nr);
    new_graph.set_src_loc(phi, src_loc);
    new_graph.set_in_reqs(phi, vec![req; arity]);
    new_graph.set_out_req(phi, 0, req);

    host.engine_mut().enqueue_preds(node);
    Ok(phi)
}

/// Register the target-independent handlers: blocks and the terminator go
/// through the worklist, projections through two-level dispatch, and the
/// structural ops are plain duplicates.
pub fn setup_generic<'g, H: TransformHost<'g>>(registry: &mut Registry<H>) {
    registry.register(Op::Block, transform_block);
    registry.register(Op::End, transform_end);
    registry.register(Op::Proj, transform_proj);
    registry.register(Op::Sync, duplicate_node);
    registry.register(Op::NoMem, duplicate_node);
    registry.register(Op::Pin, duplicate_node);
    crate::be::clean::setup_generic_clean(&mut registry.clean);
}

/// Is `b` the arithmetic negation of `a` (or vice versa)?
fn is_negated_value(graph: &Graph<'_>, a: NodeId, b: NodeId) -> bool {
    (graph.op(a) == Op::Minus && graph.ins(a)[0] == b)
        || (graph.op(b) == Op::Minus && graph.ins(b)[0] == a)
}

/// Recognize a rotate-left pattern under an Or/Add node: a left-shift and
/// a right-shift of the same value whose amounts sum to the bit width, or
/// are exact negations of one another at runtime. Returns the rotated
/// value and the left-shift amount.
pub fn pattern_is_rotl(graph: &Graph<'_>, node: NodeId) -> Option<(NodeId, NodeId)> {
    debug_assert!(matches!(graph.op(node), Op::Add | Op::Or));

    let mode = graph.mode(node);
    if !mode.is_int() {
        return None;
    }

    let mut shl = graph.ins(node)[0];
    let mut shr = graph.ins(node)[1];
    if graph.op(shl) == Op::Shr {
        if graph.op(shr) != Op::Shl {
            return None;
        }
        std::mem::swap(&mut shl, &mut shr);
    } else if graph.op(shl) != Op::Shl || graph.op(shr) != Op::Shr {
        return None;
    }

    let value = graph.ins(shl)[0];
    if value != graph.ins(shr)[0] {
        return None;
    }

    let c1 = graph.ins(shl)[1];
    let c2 = graph.ins(shr)[1];
    if let (Some(v1), Some(v2)) = (graph.const_value(c1), graph.const_value(c2)) {
        if v1 + v2 != i64::from(mode.bits()) {
            return None;
        }
        return Some((value, c1));
    }

    // The obvious rotate formulation (a << x) | (a >> (32-x)) reaches the
    // backend as (a << x) | (a >> -x) after shift normalization.
    if !is_negated_value(graph, c1, c2) {
        return None;
    }
    Some((value, c1))
}

/// Skip integer down-conversions below `node`, so the matcher can consume
/// the wider source directly. With `single_user` set, conversions with
/// more than one user are kept (they get materialized anyway).
pub fn skip_downconv(graph: &Graph<'_>, mut node: NodeId, single_user: bool) -> NodeId {
    debug_assert!(graph.mode(node).is_int());
    loop {
        if single_user && graph.n_uses(node) > 1 {
            break;
        }
        if graph.op(node) == Op::Conv {
            let op = graph.ins(node)[0];
            let src_mode = graph.mode(op);
            if !src_mode.is_int() || graph.mode(node).bits() > src_mode.bits() {
                break;
            }
            node = op;
        } else {
            break;
        }
    }
    node
}

/// Skip single-user conversions that do not change the width.
pub fn skip_sameconv(graph: &Graph<'_>, mut node: NodeId) -> NodeId {
    debug_assert!(graph.mode(node).is_int());
    loop {
        if graph.n_uses(node) > 1 {
            break;
        }
        if graph.op(node) == Op::Conv {
            let op = graph.ins(node)[0];
            let src_mode = graph.mode(op);
            if !src_mode.is_int() || graph.mode(node).bits() != src_mode.bits() {
                break;
            }
            node = op;
        } else {
            break;
        }
    }
    node
}
