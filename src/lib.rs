//! SILT - SSA Instruction-selection and Lowering Toolkit.
//!
//! SILT lowers a machine-independent, SSA-form IR into an isomorphic but
//! architecture-specific SSA graph ("instruction selection"). The generic
//! lowering engine is a memoized, worklist-driven graph rewriter; target
//! backends plug per-opcode handlers into its dispatch registry. The ARM32
//! backend serves as the reference target, with immediate-encoding search,
//! shifter-operand folding, multiply fusion and a complete calling
//! convention materializer.
//!
//! # Primary Usage
//!
//! ```
//! use bumpalo::Bump;
//! use silt::arm::{lower_function, ArmConfig};
//! use silt::ir::{Attr, Graph, Mode, Op, Signature};
//!
//! let arena = Bump::new();
//! let mut old = Graph::new(&arena);
//! let start_block = old.add_block(&[]);
//! let start = old.add(Op::Start, Mode::Tuple, start_block, &[], Attr::None);
//! let mem = old.add_proj(start, silt::ir::pn::START_M, Mode::Memory);
//! let no_mem = old.add(Op::NoMem, Mode::Memory, start_block, &[], Attr::None);
//! let ret = old.add(Op::Return, Mode::Control, start_block, &[mem], Attr::None);
//! let end_block = old.add_block(&[ret]);
//! let end = old.add(Op::End, Mode::Control, end_block, &[], Attr::None);
//! old.set_start(start);
//! old.set_end(end);
//! old.set_no_mem(no_mem);
//!
//! let sig = Signature { params: &[], results: &[] };
//! let new_arena = Bump::new();
//! let lowered = lower_function(&old, &new_arena, ArmConfig::default(), sig).unwrap();
//! assert!(lowered.graph.len() > 0);
//! ```
//!
//! # Architecture
//!
//! - [`ir`] - the SSA graph model shared by both graph generations
//! - [`be`] - target-independent engine, registry, oracle, stack order
//! - [`arm`] - the ARM32 instruction selector and calling convention

pub mod arm;
pub mod be;
pub mod ir;

pub use be::{LowerError, LowerResult, LowerStats};
pub use ir::{Graph, Mode, NodeId, Op, RegReq};
