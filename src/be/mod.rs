//! Target-independent backend infrastructure.
//!
//! - [`transform`] - lowering engine, dispatch registry, worklist, fix-up
//! - [`clean`] - upper-bits cleanliness oracle
//! - [`stackorder`] - per-block ordering of stack-accessing nodes
//! - [`error`] - fatal lowering errors

pub mod clean;
pub mod error;
pub mod stackorder;
pub mod transform;

pub use clean::{CleanFn, CleanTable, Oracle};
pub use error::{LowerError, LowerResult};
pub use stackorder::{collect_stack_nodes, StackOrder};
pub use transform::{
    drain_worklist, duplicate_node, lower_graph, pattern_is_rotl, setup_generic, skip_downconv,
    skip_sameconv, transform_block_of, transform_node, transform_phi, upper_bits_clean, Engine,
    LowerStats, Registry, TransformFn, TransformHost,
};
