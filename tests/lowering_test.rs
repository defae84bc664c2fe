//! End-to-end lowering tests.
//!
//! Each test builds a small machine-independent function graph, runs the
//! ARM lowering, and inspects the resulting graph: chosen instruction
//! forms, folded operands, calling-convention registers and the absence
//! of dangling old-graph references.

use bumpalo::Bump;

use silt::arm::registers::{FLAGS, R0, R1, SP};
use silt::arm::{lower_function, pn as apn, ArmConfig, LoweredFunction};
use silt::ir::{pn, Attr, Graph, Mode, NodeId, Op, Relation, ShifterOp, Signature};
use silt::{LowerError, RegReq};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Skeleton of a function graph: start block with Start/mem/args, NoMem.
struct FuncGraph<'g> {
    g: Graph<'g>,
    start_block: NodeId,
    mem: NodeId,
    args: NodeId,
}

fn func_graph(arena: &Bump) -> FuncGraph<'_> {
    let mut g = Graph::new(arena);
    let start_block = g.add_block(&[]);
    let start = g.add(Op::Start, Mode::Tuple, start_block, &[], Attr::None);
    let mem = g.add_proj(start, pn::START_M, Mode::Memory);
    let args = g.add_proj(start, pn::START_ARGS, Mode::Tuple);
    let no_mem = g.add(Op::NoMem, Mode::Memory, start_block, &[], Attr::None);
    g.set_start(start);
    g.set_no_mem(no_mem);
    FuncGraph {
        g,
        start_block,
        mem,
        args,
    }
}

impl<'g> FuncGraph<'g> {
    fn param(&mut self, idx: u32, mode: Mode) -> NodeId {
        let args = self.args;
        self.g.add_proj(args, idx, mode)
    }

    fn finish(&mut self, rets: &[NodeId]) {
        let end_block = self.g.add_block(rets);
        let end = self.g.add(Op::End, Mode::Control, end_block, &[], Attr::None);
        self.g.set_end(end);
    }
}

fn sig<'g>(arena: &'g Bump, params: &[Mode], results: &[Mode]) -> Signature<'g> {
    Signature {
        params: arena.alloc_slice_copy(params),
        results: arena.alloc_slice_copy(results),
    }
}

fn nodes_with_op(graph: &Graph<'_>, op: Op) -> Vec<NodeId> {
    graph.ids().filter(|&id| graph.op(id) == op).collect()
}

fn assert_no_dangling(lowered: &LoweredFunction<'_>) {
    let graph = &lowered.graph;
    for id in graph.ids() {
        assert!(
            graph.contains(graph.block(id)),
            "node {} has a dangling block pointer",
            id.raw()
        );
        for &pred in graph.ins(id) {
            assert!(
                graph.contains(pred),
                "node {} has a dangling operand",
                id.raw()
            );
        }
    }
}

#[test]
fn test_add_const_load_end_to_end() {
    init_logging();
    let arena = Bump::new();
    let mut f = func_graph(&arena);
    let ptr = f.param(0, Mode::I32);
    let mem = f.mem;
    let load = f.g.add(
        Op::Load,
        Mode::Tuple,
        f.start_block,
        &[ptr, mem],
        Attr::Load {
            mode: Mode::I32,
            unaligned: false,
        },
    );
    let load_res = f.g.add_proj(load, pn::LOAD_RES, Mode::I32);
    let load_m = f.g.add_proj(load, pn::LOAD_M, Mode::Memory);
    let cnst = f.g.add(Op::Const, Mode::I32, f.start_block, &[], Attr::Int(0x100));
    let add = f.g.add(Op::Add, Mode::I32, f.start_block, &[cnst, load_res], Attr::None);
    let ret = f.g.add(
        Op::Return,
        Mode::Control,
        f.start_block,
        &[load_m, add],
        Attr::None,
    );
    f.finish(&[ret]);

    let new_arena = Bump::new();
    let s = sig(&arena, &[Mode::I32], &[Mode::I32]);
    let lowered = lower_function(&f.g, &new_arena, ArmConfig::default(), s).unwrap();
    assert_no_dangling(&lowered);

    // One immediate-form add consuming the loaded register and (0x01, 24).
    let adds = nodes_with_op(&lowered.graph, Op::ArmAdd);
    assert_eq!(adds.len(), 1);
    let add_node = adds[0];
    assert_eq!(
        lowered.graph.attr(add_node).shifter_imm(),
        Some((0x01, 24))
    );
    assert_eq!(lowered.graph.ins(add_node).len(), 1);
    let loaded = lowered.graph.ins(add_node)[0];
    assert_eq!(lowered.graph.op(loaded), Op::Proj);
    assert_eq!(lowered.graph.op(lowered.graph.ins(loaded)[0]), Op::ArmLdr);

    // No extension instructions: the load width equals the operation width.
    assert!(nodes_with_op(&lowered.graph, Op::ArmAnd).is_empty());
    assert!(nodes_with_op(&lowered.graph, Op::ArmMov)
        .iter()
        .all(|&m| !matches!(
            lowered.graph.attr(m),
            Attr::Shifter(ShifterOp::LslImm(_)) | Attr::Shifter(ShifterOp::AsrImm(_))
        )));
}

trait AttrExt {
    fn shifter_imm(&self) -> Option<(u8, u8)>;
}

impl AttrExt for Attr<'_> {
    fn shifter_imm(&self) -> Option<(u8, u8)> {
        match self {
            Attr::Shifter(ShifterOp::Imm { value, rot }) => Some((*value, *rot)),
            _ => None,
        }
    }
}

#[test]
fn test_memoized_constant_shared_by_two_users() {
    init_logging();
    let arena = Bump::new();
    let mut f = func_graph(&arena);
    let x = f.param(0, Mode::I32);
    let y = f.param(1, Mode::I32);
    // 0x12345678 is not immediate-encodable, so both adds must share the
    // materialized constant.
    let cnst = f
        .g
        .add(Op::Const, Mode::I32, f.start_block, &[], Attr::Int(0x1234_5678));
    let add1 = f.g.add(Op::Add, Mode::I32, f.start_block, &[x, cnst], Attr::None);
    let add2 = f.g.add(Op::Add, Mode::I32, f.start_block, &[y, cnst], Attr::None);
    let sum = f.g.add(Op::Add, Mode::I32, f.start_block, &[add1, add2], Attr::None);
    let ret = f.g.add(
        Op::Return,
        Mode::Control,
        f.start_block,
        &[f.mem, sum],
        Attr::None,
    );
    f.finish(&[ret]);

    let new_arena = Bump::new();
    let s = sig(&arena, &[Mode::I32, Mode::I32], &[Mode::I32]);
    let lowered = lower_function(&f.g, &new_arena, ArmConfig::default(), s).unwrap();
    assert_no_dangling(&lowered);

    // The constant builds as one Mov plus three Ors, exactly once.
    let movs: Vec<_> = nodes_with_op(&lowered.graph, Op::ArmMov)
        .into_iter()
        .filter(|&m| lowered.graph.attr(m).shifter_imm().is_some())
        .collect();
    assert_eq!(movs.len(), 1);
    assert_eq!(nodes_with_op(&lowered.graph, Op::ArmOr).len(), 3);

    // Both adds reference the identical new-node identity.
    let adds = nodes_with_op(&lowered.graph, Op::ArmAdd);
    let const_users: Vec<_> = adds
        .iter()
        .filter(|&&a| lowered.graph.ins(a).len() == 2)
        .filter(|&&a| lowered.graph.op(lowered.graph.ins(a)[1]) == Op::ArmOr)
        .map(|&a| lowered.graph.ins(a)[1])
        .collect();
    assert_eq!(const_users.len(), 2);
    assert_eq!(const_users[0], const_users[1]);
}

#[test]
fn test_phi_loop_fixed_up() {
    init_logging();
    let arena = Bump::new();
    let mut f = func_graph(&arena);
    let jmp0 = f.g.add(Op::Jmp, Mode::Control, f.start_block, &[], Attr::None);
    let loop_block = f.g.add_block(&[jmp0]);

    let c_init = f.g.add(Op::Const, Mode::I32, f.start_block, &[], Attr::Int(0));
    let c_one = f.g.add(Op::Const, Mode::I32, f.start_block, &[], Attr::Int(1));
    let c_limit = f.g.add(Op::Const, Mode::I32, f.start_block, &[], Attr::Int(10));

    let phi = f.g.add(
        Op::Phi,
        Mode::I32,
        loop_block,
        &[c_init, c_init],
        Attr::None,
    );
    let add = f.g.add(Op::Add, Mode::I32, loop_block, &[phi, c_one], Attr::None);
    // Close the cycle: the phi's second operand is the add behind the
    // back-edge.
    f.g.set_in(phi, 1, add);

    let cmp = f.g.add(
        Op::Cmp,
        Mode::Flags,
        loop_block,
        &[add, c_limit],
        Attr::Relation(Relation::Less),
    );
    let cond = f.g.add(Op::Cond, Mode::Tuple, loop_block, &[cmp], Attr::None);
    let proj_true = f.g.add_proj(cond, pn::COND_TRUE, Mode::Control);
    let proj_false = f.g.add_proj(cond, pn::COND_FALSE, Mode::Control);
    f.g.add_pred(loop_block, proj_true);

    let exit_block = f.g.add_block(&[proj_false]);
    let ret = f.g.add(
        Op::Return,
        Mode::Control,
        exit_block,
        &[f.mem, phi],
        Attr::None,
    );
    f.finish(&[ret]);

    let new_arena = Bump::new();
    let s = sig(&arena, &[], &[Mode::I32]);
    let lowered = lower_function(&f.g, &new_arena, ArmConfig::default(), s).unwrap();
    assert_no_dangling(&lowered);

    // The phi survived with rewired operands: an initial Mov #0 and the
    // loop add.
    let phis = nodes_with_op(&lowered.graph, Op::Phi);
    assert_eq!(phis.len(), 1);
    let new_phi = phis[0];
    assert_eq!(lowered.graph.ins(new_phi).len(), 2);
    let init_op = lowered.graph.ins(new_phi)[0];
    let loop_op = lowered.graph.ins(new_phi)[1];
    assert_eq!(lowered.graph.op(init_op), Op::ArmMov);
    assert_eq!(lowered.graph.op(loop_op), Op::ArmAdd);
    assert!(lowered
        .graph
        .node(new_phi)
        .in_reqs()
        .iter()
        .all(|r| matches!(r, RegReq::Class(_))));

    // The branch became a B on the compare flags.
    assert_eq!(nodes_with_op(&lowered.graph, Op::ArmB).len(), 1);
    assert_eq!(nodes_with_op(&lowered.graph, Op::ArmCmp).len(), 1);
}

#[test]
fn test_immediate_beats_shift_fold() {
    init_logging();
    let arena = Bump::new();
    let mut f = func_graph(&arena);
    let x = f.param(0, Mode::I32);
    let c_shift = f.g.add(Op::Const, Mode::I32, f.start_block, &[], Attr::Int(2));
    let shl = f.g.add(Op::Shl, Mode::I32, f.start_block, &[x, c_shift], Attr::None);
    let c3 = f.g.add(Op::Const, Mode::I32, f.start_block, &[], Attr::Int(3));
    let add = f.g.add(Op::Add, Mode::I32, f.start_block, &[c3, shl], Attr::None);
    let ret = f.g.add(
        Op::Return,
        Mode::Control,
        f.start_block,
        &[f.mem, add],
        Attr::None,
    );
    f.finish(&[ret]);

    let new_arena = Bump::new();
    let s = sig(&arena, &[Mode::I32], &[Mode::I32]);
    let lowered = lower_function(&f.g, &new_arena, ArmConfig::default(), s).unwrap();

    // The encodable constant wins over the shifter-operand fold.
    let adds = nodes_with_op(&lowered.graph, Op::ArmAdd);
    assert_eq!(adds.len(), 1);
    assert_eq!(lowered.graph.attr(adds[0]).shifter_imm(), Some((3, 0)));
    // The shift itself is materialized as a Mov with an immediate shift.
    let shift_movs: Vec<_> = nodes_with_op(&lowered.graph, Op::ArmMov)
        .into_iter()
        .filter(|&m| matches!(lowered.graph.attr(m), Attr::Shifter(ShifterOp::LslImm(2))))
        .collect();
    assert_eq!(shift_movs.len(), 1);
    assert_eq!(lowered.graph.ins(adds[0])[0], shift_movs[0]);
}

#[test]
fn test_single_use_shift_folds_into_or() {
    init_logging();
    let arena = Bump::new();
    let mut f = func_graph(&arena);
    let x = f.param(0, Mode::I32);
    let y = f.param(1, Mode::I32);
    let c5 = f.g.add(Op::Const, Mode::I32, f.start_block, &[], Attr::Int(5));
    let shr = f.g.add(Op::Shr, Mode::I32, f.start_block, &[y, c5], Attr::None);
    let or = f.g.add(Op::Or, Mode::I32, f.start_block, &[x, shr], Attr::None);
    let ret = f.g.add(
        Op::Return,
        Mode::Control,
        f.start_block,
        &[f.mem, or],
        Attr::None,
    );
    f.finish(&[ret]);

    let new_arena = Bump::new();
    let s = sig(&arena, &[Mode::I32, Mode::I32], &[Mode::I32]);
    let lowered = lower_function(&f.g, &new_arena, ArmConfig::default(), s).unwrap();

    let ors = nodes_with_op(&lowered.graph, Op::ArmOr);
    assert_eq!(ors.len(), 1);
    assert!(matches!(
        lowered.graph.attr(ors[0]),
        Attr::Shifter(ShifterOp::LsrImm(5))
    ));
    assert_eq!(lowered.graph.ins(ors[0]).len(), 2);
}

#[test]
fn test_rotate_pattern_becomes_ror() {
    init_logging();
    let arena = Bump::new();
    let mut f = func_graph(&arena);
    let x = f.param(0, Mode::I32);
    let c24 = f.g.add(Op::Const, Mode::I32, f.start_block, &[], Attr::Int(24));
    let c8 = f.g.add(Op::Const, Mode::I32, f.start_block, &[], Attr::Int(8));
    let shl = f.g.add(Op::Shl, Mode::I32, f.start_block, &[x, c24], Attr::None);
    let shr = f.g.add(Op::Shr, Mode::I32, f.start_block, &[x, c8], Attr::None);
    let or = f.g.add(Op::Or, Mode::I32, f.start_block, &[shl, shr], Attr::None);
    let ret = f.g.add(
        Op::Return,
        Mode::Control,
        f.start_block,
        &[f.mem, or],
        Attr::None,
    );
    f.finish(&[ret]);

    let new_arena = Bump::new();
    let s = sig(&arena, &[Mode::I32], &[Mode::I32]);
    let lowered = lower_function(&f.g, &new_arena, ArmConfig::default(), s).unwrap();

    // rotl by 24 is ror by 8, in a single Mov.
    let rors: Vec<_> = nodes_with_op(&lowered.graph, Op::ArmMov)
        .into_iter()
        .filter(|&m| matches!(lowered.graph.attr(m), Attr::Shifter(ShifterOp::RorImm(8))))
        .collect();
    assert_eq!(rors.len(), 1);
    assert!(nodes_with_op(&lowered.graph, Op::ArmOr).is_empty());
}

#[test]
fn test_multiply_fuses_into_mla() {
    init_logging();
    let arena = Bump::new();
    let mut f = func_graph(&arena);
    let a = f.param(0, Mode::I32);
    let b = f.param(1, Mode::I32);
    let c = f.param(2, Mode::I32);
    let mul = f.g.add(Op::Mul, Mode::I32, f.start_block, &[a, b], Attr::None);
    let add = f.g.add(Op::Add, Mode::I32, f.start_block, &[mul, c], Attr::None);
    let ret = f.g.add(
        Op::Return,
        Mode::Control,
        f.start_block,
        &[f.mem, add],
        Attr::None,
    );
    f.finish(&[ret]);

    let new_arena = Bump::new();
    let s = sig(&arena, &[Mode::I32, Mode::I32, Mode::I32], &[Mode::I32]);
    let lowered = lower_function(&f.g, &new_arena, ArmConfig::default(), s).unwrap();

    let mlas = nodes_with_op(&lowered.graph, Op::ArmMla);
    assert_eq!(mlas.len(), 1);
    assert_eq!(lowered.graph.ins(mlas[0]).len(), 3);
    // The product is not materialized separately.
    assert!(nodes_with_op(&lowered.graph, Op::ArmMul).is_empty());
    assert!(nodes_with_op(&lowered.graph, Op::ArmAdd).is_empty());
}

#[test]
fn test_call_and_entry_agree_on_registers() {
    init_logging();
    let arena = Bump::new();
    let mut f = func_graph(&arena);
    let x = f.param(0, Mode::I32);
    let callee = f.g.add(
        Op::Address,
        Mode::I32,
        f.start_block,
        &[],
        Attr::Address { name: "callee" },
    );
    let callee_sig = sig(&arena, &[Mode::I32, Mode::I32], &[Mode::I32]);
    let c5 = f.g.add(Op::Const, Mode::I32, f.start_block, &[], Attr::Int(5));
    let call = f.g.add(
        Op::Call,
        Mode::Tuple,
        f.start_block,
        &[f.mem, callee, x, c5],
        Attr::Call { sig: callee_sig },
    );
    let call_m = f.g.add_proj(call, pn::CALL_M, Mode::Memory);
    let res_tuple = f.g.add_proj(call, pn::CALL_T_RESULT, Mode::Tuple);
    let res = f.g.add_proj(res_tuple, 0, Mode::I32);
    let ret = f.g.add(
        Op::Return,
        Mode::Control,
        f.start_block,
        &[call_m, res],
        Attr::None,
    );
    f.finish(&[ret]);

    let new_arena = Bump::new();
    let s = sig(&arena, &[Mode::I32], &[Mode::I32]);
    let lowered = lower_function(&f.g, &new_arena, ArmConfig::default(), s).unwrap();
    assert_no_dangling(&lowered);

    let bls = nodes_with_op(&lowered.graph, Op::ArmBl);
    assert_eq!(bls.len(), 1);
    let bl = bls[0];

    // Argument inputs carry r0/r1 requirements after memory and stack.
    let in_reqs = lowered.graph.node(bl).in_reqs();
    assert_eq!(in_reqs[0], RegReq::NoReg);
    assert_eq!(in_reqs[1], RegReq::Fixed(SP));
    assert_eq!(in_reqs[2], RegReq::Fixed(R0));
    assert_eq!(in_reqs[3], RegReq::Fixed(R1));

    // The first argument is the entry's own r0 parameter: both sides of
    // the convention assigned the same register.
    let arg0 = lowered.graph.ins(bl)[2];
    assert_eq!(lowered.graph.op(arg0), Op::Proj);
    let start = lowered.graph.ins(arg0)[0];
    assert_eq!(lowered.graph.op(start), Op::ArmStart);
    let arg0_pos = match lowered.graph.attr(arg0) {
        Attr::Proj(p) => p as usize,
        _ => unreachable!(),
    };
    assert_eq!(lowered.graph.node(start).out_reqs()[arg0_pos], RegReq::Fixed(R0));

    // The call result is recovered by scanning the output constraints for
    // r0, never by a fixed position.
    let result_projs: Vec<_> = lowered
        .graph
        .ids()
        .filter(|&id| lowered.graph.op(id) == Op::Proj)
        .filter(|&id| lowered.graph.ins(id)[0] == bl)
        .filter(|&id| match lowered.graph.attr(id) {
            Attr::Proj(p) => {
                lowered.graph.node(bl).out_reqs()[p as usize] == RegReq::Fixed(R0)
            }
            _ => false,
        })
        .collect();
    assert_eq!(result_projs.len(), 1);

    // Stack adjustment around the call stays alive.
    let incsps = nodes_with_op(&lowered.graph, Op::IncSp);
    assert_eq!(incsps.len(), 2);
    let end = lowered.graph.end();
    assert!(lowered
        .graph
        .ins(end)
        .iter()
        .any(|&k| lowered.graph.op(k) == Op::IncSp));
}

#[test]
fn test_return_forwards_callee_saves() {
    init_logging();
    let arena = Bump::new();
    let mut f = func_graph(&arena);
    let x = f.param(0, Mode::I32);
    let ret = f.g.add(
        Op::Return,
        Mode::Control,
        f.start_block,
        &[f.mem, x],
        Attr::None,
    );
    f.finish(&[ret]);

    let new_arena = Bump::new();
    let s = sig(&arena, &[Mode::I32], &[Mode::I32]);
    let lowered = lower_function(&f.g, &new_arena, ArmConfig::default(), s).unwrap();

    let rets = nodes_with_op(&lowered.graph, Op::ArmReturn);
    assert_eq!(rets.len(), 1);
    let ret = rets[0];
    // memory + sp + one result + nine callee saves.
    assert_eq!(lowered.graph.ins(ret).len(), 2 + 1 + 9);
    let reqs = lowered.graph.node(ret).in_reqs();
    assert_eq!(reqs[1], RegReq::Fixed(SP));
    assert_eq!(reqs[2], RegReq::Fixed(R0));
    // Every callee-saved value is a Proj of the Start node.
    let start = nodes_with_op(&lowered.graph, Op::ArmStart)[0];
    for &saved in &lowered.graph.ins(ret)[3..] {
        assert_eq!(lowered.graph.op(saved), Op::Proj);
        assert_eq!(lowered.graph.ins(saved)[0], start);
    }
}

#[test]
fn test_teardown_constant_uses_mvn() {
    init_logging();
    let arena = Bump::new();
    let mut f = func_graph(&arena);
    // Complement 0x0F00 has one descriptor, the value itself has several.
    let cnst = f.g.add(
        Op::Const,
        Mode::I32,
        f.start_block,
        &[],
        Attr::Int(0xFFFF_F0FFu32 as i64),
    );
    let ret = f.g.add(
        Op::Return,
        Mode::Control,
        f.start_block,
        &[f.mem, cnst],
        Attr::None,
    );
    f.finish(&[ret]);

    let new_arena = Bump::new();
    let s = sig(&arena, &[], &[Mode::I32]);
    let lowered = lower_function(&f.g, &new_arena, ArmConfig::default(), s).unwrap();

    let mvns = nodes_with_op(&lowered.graph, Op::ArmMvn);
    assert_eq!(mvns.len(), 1);
    let imm = lowered.graph.attr(mvns[0]).shifter_imm().unwrap();
    assert_eq!((imm.0 as u32).rotate_right(imm.1 as u32), 0x0F00);
    assert!(nodes_with_op(&lowered.graph, Op::ArmBic).is_empty());
}

#[test]
fn test_conv_elided_when_load_width_matches() {
    init_logging();
    let arena = Bump::new();
    let mut f = func_graph(&arena);
    let ptr = f.param(0, Mode::I32);
    let u8_mode = Mode::int(8, false);
    let load = f.g.add(
        Op::Load,
        Mode::Tuple,
        f.start_block,
        &[ptr, f.mem],
        Attr::Load {
            mode: u8_mode,
            unaligned: false,
        },
    );
    let load_res = f.g.add_proj(load, pn::LOAD_RES, Mode::I32);
    let load_m = f.g.add_proj(load, pn::LOAD_M, Mode::Memory);
    let conv = f.g.add(Op::Conv, u8_mode, f.start_block, &[load_res], Attr::None);
    let ret = f.g.add(
        Op::Return,
        Mode::Control,
        f.start_block,
        &[load_m, conv],
        Attr::None,
    );
    f.finish(&[ret]);

    let new_arena = Bump::new();
    let s = sig(&arena, &[Mode::I32], &[Mode::I32]);
    let lowered = lower_function(&f.g, &new_arena, ArmConfig::default(), s).unwrap();

    // The oracle proves the loaded value clean at 8 bits: no And mask, no
    // shift pair.
    assert!(nodes_with_op(&lowered.graph, Op::ArmAnd).is_empty());
    assert!(nodes_with_op(&lowered.graph, Op::ArmMov)
        .iter()
        .all(|&m| matches!(lowered.graph.attr(m), Attr::Shifter(ShifterOp::Imm { .. }))
            || lowered.graph.ins(m).len() != 1));
}

#[test]
fn test_and_not_becomes_bic() {
    init_logging();
    let arena = Bump::new();
    let mut f = func_graph(&arena);
    let x = f.param(0, Mode::I32);
    let y = f.param(1, Mode::I32);
    let not = f.g.add(Op::Not, Mode::I32, f.start_block, &[y], Attr::None);
    let and = f.g.add(Op::And, Mode::I32, f.start_block, &[x, not], Attr::None);
    let ret = f.g.add(
        Op::Return,
        Mode::Control,
        f.start_block,
        &[f.mem, and],
        Attr::None,
    );
    f.finish(&[ret]);

    let new_arena = Bump::new();
    let s = sig(&arena, &[Mode::I32, Mode::I32], &[Mode::I32]);
    let lowered = lower_function(&f.g, &new_arena, ArmConfig::default(), s).unwrap();

    assert_eq!(nodes_with_op(&lowered.graph, Op::ArmBic).len(), 1);
    assert!(nodes_with_op(&lowered.graph, Op::ArmAnd).is_empty());
    assert!(nodes_with_op(&lowered.graph, Op::ArmMvn).is_empty());
}

#[test]
fn test_missing_handler_is_fatal() {
    init_logging();
    let arena = Bump::new();
    let mut f = func_graph(&arena);
    let x = f.param(0, Mode::I32);
    let y = f.param(1, Mode::I32);
    let sel = f.g.add(
        Op::Cmp,
        Mode::Flags,
        f.start_block,
        &[x, y],
        Attr::Relation(Relation::Less),
    );
    // The ARM backend registers no Mux lowering.
    let mux = f.g.add(Op::Mux, Mode::I32, f.start_block, &[sel, x, y], Attr::None);
    let ret = f.g.add(
        Op::Return,
        Mode::Control,
        f.start_block,
        &[f.mem, mux],
        Attr::None,
    );
    f.finish(&[ret]);

    let new_arena = Bump::new();
    let s = sig(&arena, &[Mode::I32, Mode::I32], &[Mode::I32]);
    let err = lower_function(&f.g, &new_arena, ArmConfig::default(), s).unwrap_err();
    assert!(matches!(err, LowerError::NoTransformer { op: Op::Mux, .. }));
}

#[test]
fn test_unaligned_load_is_fatal() {
    init_logging();
    let arena = Bump::new();
    let mut f = func_graph(&arena);
    let ptr = f.param(0, Mode::I32);
    let load = f.g.add(
        Op::Load,
        Mode::Tuple,
        f.start_block,
        &[ptr, f.mem],
        Attr::Load {
            mode: Mode::I32,
            unaligned: true,
        },
    );
    let load_res = f.g.add_proj(load, pn::LOAD_RES, Mode::I32);
    let load_m = f.g.add_proj(load, pn::LOAD_M, Mode::Memory);
    let ret = f.g.add(
        Op::Return,
        Mode::Control,
        f.start_block,
        &[load_m, load_res],
        Attr::None,
    );
    f.finish(&[ret]);

    let new_arena = Bump::new();
    let s = sig(&arena, &[Mode::I32], &[Mode::I32]);
    let err = lower_function(&f.g, &new_arena, ArmConfig::default(), s).unwrap_err();
    assert!(matches!(err, LowerError::UnalignedAccess { .. }));
}

#[test]
fn test_flag_producing_add_keeps_flags_constraint() {
    init_logging();
    let arena = Bump::new();
    let mut f = func_graph(&arena);
    let x = f.param(0, Mode::I32);
    let y = f.param(1, Mode::I32);
    let adds = f.g.add(Op::AddST, Mode::Tuple, f.start_block, &[x, y], Attr::None);
    let res = f.g.add_proj(adds, pn::FLAGOP_RES, Mode::I32);
    let ret = f.g.add(
        Op::Return,
        Mode::Control,
        f.start_block,
        &[f.mem, res],
        Attr::None,
    );
    f.finish(&[ret]);

    let new_arena = Bump::new();
    let s = sig(&arena, &[Mode::I32, Mode::I32], &[Mode::I32]);
    let lowered = lower_function(&f.g, &new_arena, ArmConfig::default(), s).unwrap();

    let adds = nodes_with_op(&lowered.graph, Op::ArmAddS);
    assert_eq!(adds.len(), 1);
    assert_eq!(
        lowered.graph.node(adds[0]).out_reqs()[apn::FLAGOP_FLAGS as usize],
        RegReq::Fixed(FLAGS)
    );
}
