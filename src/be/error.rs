// This module defines error types for the lowering backend using the thiserror
// crate. LowerError covers the two fatal classes: dispatch configuration errors
// (no transform or projection handler registered for an encountered node kind)
// and input shapes the backend explicitly does not support yet (unaligned memory
// access, softfloat without prior lowering, unexpected projection indices). Each
// variant names the offending node and its kind so a fatal condition terminates
// lowering of the translation unit with a usable diagnostic. Failure to match a
// fused instruction form is never an error; the matcher degrades to the general
// instruction sequence instead.

//! Error types for the lowering backend.

use thiserror::Error;

use crate::ir::{NodeId, Op};

/// Fatal lowering errors. Anything recoverable degrades to a more general
/// instruction sequence instead of surfacing here.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LowerError {
    #[error("no transform handler for node {} (kind {op:?})", node.raw())]
    NoTransformer { op: Op, node: NodeId },

    #[error("no projection handler for node {} behind predecessor kind {pred_op:?}", node.raw())]
    NoProjTransformer { pred_op: Op, node: NodeId },

    #[error("unexpected projection {pn} on node {} (kind {op:?})", node.raw())]
    UnexpectedProj { op: Op, node: NodeId, pn: u32 },

    #[error("unaligned access on node {} not supported by the target", node.raw())]
    UnalignedAccess { node: NodeId },

    #[error("unsupported input shape on node {}: {reason}", node.raw())]
    Unsupported { node: NodeId, reason: &'static str },

    #[error("transform re-entered node {} while it was being processed", node.raw())]
    TransformCycle { node: NodeId },

    #[error("operand of node {} still denotes an old-graph node after lowering", node.raw())]
    DanglingReference { node: NodeId },
}

/// Result type alias for lowering operations.
pub type LowerResult<T> = Result<T, LowerError>;
