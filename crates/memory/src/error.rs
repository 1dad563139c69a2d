//! Error types for pattern parsing and scanning

/// Error type for memory location operations
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// No byte run in the searched range matched the pattern
    #[error("Pattern not found: {0}")]
    PatternNotFound(String),

    /// Strict scan found more than one match
    #[error("Pattern '{label}' is ambiguous: {count} matches")]
    AmbiguousMatch { label: String, count: usize },

    /// The opcode at the address is not a recognized call-family encoding
    #[error("Not a call instruction at {address:#x} (opcode {opcode:#04x})")]
    NotACallInstruction { address: usize, opcode: u8 },

    /// Pattern string could not be parsed
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    /// Host module information could not be queried
    #[error("Failed to query host module: {0}")]
    ModuleLookup(String),
}
