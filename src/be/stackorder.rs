// This module computes a total order over the stack-modifying nodes (calls and
// returns) of each basic block, so the calling-convention materializer can
// chain stack-pointer adjustments deterministically. Nodes are ordered by
// intra-block data dependency first; independent nodes fall back to their
// dependency depth and finally to a stable identity order, because transitive
// dependencies must be respected even between nodes with no direct order.

//! Stack-node ordering for call-site lowering.

use hashbrown::{HashMap, HashSet};

use crate::ir::{Graph, NodeId, Op};

/// Precomputed per-block total order of stack-accessing nodes.
pub struct StackOrder {
    pred: HashMap<NodeId, NodeId>,
}

impl StackOrder {
    /// Predecessor of `node` in its block's stack order, if any.
    pub fn pred(&self, node: NodeId) -> Option<NodeId> {
        self.pred.get(&node).copied()
    }
}

/// Is `n1` (transitively) data dependent on `n2`? Both nodes must be in
/// the same block; the walk stops at block boundaries.
fn dependent_on(graph: &Graph<'_>, n1: NodeId, n2: NodeId) -> bool {
    debug_assert_eq!(graph.block(n1), graph.block(n2));
    let block = graph.block(n1);
    let mut seen: HashSet<NodeId> = HashSet::new();
    let mut stack = vec![n1];
    while let Some(n) = stack.pop() {
        if n == n2 {
            return true;
        }
        if !seen.insert(n) {
            continue;
        }
        for &pred in graph.ins(n) {
            if graph.op(pred) != Op::Block && graph.block(pred) == block {
                stack.push(pred);
            }
        }
    }
    false
}

/// Dependency depth of a node within its block.
fn height(graph: &Graph<'_>, node: NodeId, memo: &mut HashMap<NodeId, u32>) -> u32 {
    if let Some(&h) = memo.get(&node) {
        return h;
    }
    // Break self-referential shapes (Phi back-edges stay at depth zero).
    memo.insert(node, 0);
    let block = graph.block(node);
    let mut h = 0;
    for &pred in graph.ins(node) {
        if graph.op(pred) != Op::Block && graph.block(pred) == block {
            h = h.max(height(graph, pred, memo) + 1);
        }
    }
    memo.insert(node, h);
    h
}

/// Collect all stack-accessing nodes and order them per block.
pub fn collect_stack_nodes(graph: &Graph<'_>) -> StackOrder {
    let mut by_block: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    for id in graph.ids() {
        match graph.op(id) {
            Op::Return | Op::Call => {
                by_block.entry(graph.block(id)).or_default().push(id);
            }
            _ => {}
        }
    }

    let mut heights: HashMap<NodeId, u32> = HashMap::new();
    let mut pred = HashMap::new();
    for (_, mut nodes) in by_block {
        nodes.sort_by(|&a, &b| {
            use std::cmp::Ordering;
            if dependent_on(graph, a, b) {
                return Ordering::Greater;
            }
            if dependent_on(graph, b, a) {
                return Ordering::Less;
            }
            let ha = height(graph, a, &mut heights);
            let hb = height(graph, b, &mut heights);
            // Deeper nodes come later; same depth falls back to identity.
            ha.cmp(&hb).then(a.raw().cmp(&b.raw()))
        });
        for w in nodes.windows(2) {
            pred.insert(w[1], w[0]);
        }
    }

    StackOrder { pred }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{pn, Attr, Mode, Signature};
    use bumpalo::Bump;

    #[test]
    fn test_dependent_call_ordered_after() {
        let arena = Bump::new();
        let mut g = Graph::new(&arena);
        let block = g.add_block(&[]);
        let sig = Signature {
            params: arena.alloc_slice_copy(&[]),
            results: arena.alloc_slice_copy(&[Mode::I32]),
        };
        let mem = g.add(Op::NoMem, Mode::Memory, block, &[], Attr::None);
        let callee = g.add(Op::Address, Mode::I32, block, &[], Attr::Address { name: "f" });
        let call1 = g.add(Op::Call, Mode::Tuple, block, &[mem, callee], Attr::Call { sig });
        let res_t = g.add_proj(call1, pn::CALL_T_RESULT, Mode::Tuple);
        let res = g.add_proj(res_t, 0, Mode::I32);
        let call_m = g.add_proj(call1, pn::CALL_M, Mode::Memory);
        let call2 = g.add(
            Op::Call,
            Mode::Tuple,
            block,
            &[call_m, callee, res],
            Attr::Call { sig },
        );

        let order = collect_stack_nodes(&g);
        assert_eq!(order.pred(call2), Some(call1));
        assert_eq!(order.pred(call1), None);
    }
}
