//! ARM code generation configuration.
//!
//! Queried read-only during pattern matching; independent function graphs
//! may share one configuration without locking.

/// Architecture variant, ordered so feature gates can use comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ArmVariant {
    V4T,
    V5T,
    V6,
    V6T2,
    V7,
}

/// Floating point unit of the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FpuKind {
    /// No hardware float; float ops must have been lowered to calls before
    /// instruction selection.
    SoftFloat,
    /// FPA coprocessor.
    Fpa,
}

/// Read-only target configuration consulted by the pattern matcher.
#[derive(Debug, Clone, Copy)]
pub struct ArmConfig {
    pub variant: ArmVariant,
    pub fpu: FpuKind,
}

impl Default for ArmConfig {
    fn default() -> Self {
        Self {
            variant: ArmVariant::V6,
            fpu: FpuKind::Fpa,
        }
    }
}
