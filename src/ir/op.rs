//! Node opcodes.
//!
//! One flat opcode space covers the machine-independent ops, the generic
//! backend ops and the ARM-specific ops. Keeping a single space means the
//! old and the new graph generation are isomorphic node-for-node and the
//! dispatch registry can be keyed by opcode alone, the way the original
//! backend keys its per-op handler slots.

/// Node kind tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    // Machine-independent ops (old graph generation).
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Eor,
    Not,
    Minus,
    Shl,
    Shr,
    Shrs,
    Conv,
    Mux,
    Cmp,
    Cond,
    Switch,
    Jmp,
    Const,
    Address,
    Member,
    Load,
    Store,
    Sync,
    NoMem,
    Pin,
    Phi,
    Proj,
    Block,
    Start,
    End,
    Return,
    Call,
    Unknown,
    // Pre-lowered multi-result arithmetic placeholders (produced by the
    // doubleword lowering that runs before instruction selection).
    AddST,
    SubST,
    UMulLT,

    // Generic backend ops (new graph generation).
    IncSp,

    // ARM ops (new graph generation).
    ArmMov,
    ArmMvn,
    ArmAdd,
    ArmAddS,
    ArmSub,
    ArmSubS,
    ArmRsb,
    ArmRsbS,
    ArmAnd,
    ArmBic,
    ArmOr,
    ArmEor,
    ArmMul,
    ArmMla,
    ArmMls,
    ArmUMulL,
    ArmCmp,
    ArmCmfe,
    ArmB,
    ArmJmp,
    ArmSwitchJmp,
    ArmLdr,
    ArmStr,
    ArmAddress,
    ArmFrameAddr,
    ArmPkhbt,
    ArmPkhtb,
    ArmAdf,
    ArmMuf,
    ArmSuf,
    ArmDvf,
    ArmMvf,
    ArmFltX,
    ArmFConst,
    ArmLdf,
    ArmStf,
    ArmStart,
    ArmReturn,
    ArmBl,
    ArmLinkMovPC,
}

/// Comparison relation carried by Cmp and branch nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relation {
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

/// Projection numbers of the generic multi-result ops.
pub mod pn {
    /// Load: memory token.
    pub const LOAD_M: u32 = 0;
    /// Load: loaded value.
    pub const LOAD_RES: u32 = 1;
    /// Store: memory token.
    pub const STORE_M: u32 = 0;
    /// Div: memory token.
    pub const DIV_M: u32 = 0;
    /// Div: quotient.
    pub const DIV_RES: u32 = 1;
    /// Start: initial memory token.
    pub const START_M: u32 = 0;
    /// Start: frame base pointer.
    pub const START_FRAME: u32 = 1;
    /// Start: argument tuple.
    pub const START_ARGS: u32 = 2;
    /// Call: memory token.
    pub const CALL_M: u32 = 0;
    /// Call: result tuple.
    pub const CALL_T_RESULT: u32 = 1;
    /// Cond: control flow when the condition holds.
    pub const COND_TRUE: u32 = 0;
    /// Cond: control flow when it does not.
    pub const COND_FALSE: u32 = 1;
    /// AddST/SubST: value result.
    pub const FLAGOP_RES: u32 = 0;
    /// AddST/SubST: produced flags.
    pub const FLAGOP_FLAGS: u32 = 1;
    /// UMulLT: low word of the product.
    pub const UMULL_LOW: u32 = 0;
    /// UMulLT: high word of the product.
    pub const UMULL_HIGH: u32 = 1;
}
