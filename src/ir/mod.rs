//! Machine-independent SSA graph model.
//!
//! - [`graph`] - arena-backed node graphs, one per generation
//! - [`node`] - node records, attributes, register requirements
//! - [`op`] - the flat opcode space shared by both generations
//! - [`mode`] - value modes (integer width/signedness, float width)

pub mod graph;
pub mod mode;
pub mod node;
pub mod op;

pub use graph::Graph;
pub use mode::Mode;
pub use node::{Attr, Node, NodeId, Reg, RegClass, RegReq, ShifterOp, Signature, SrcLoc};
pub use op::{pn, Op, Relation};
