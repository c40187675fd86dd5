//! Allocator error type.

/// Arena allocation failure.
///
/// Exhaustion is fatal at the kernel level; the error carries the arena's
/// current pointer so the panic diagnostic can report it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "allocator exhaustion must reach the panic path"]
pub enum AllocError {
    /// The permanent arena would cross its limit.
    PermanentExhausted {
        /// The bump pointer at the time of the failing request.
        next_free: u64,
    },
    /// The temporary arena would cross into the permanent arena.
    TemporaryExhausted {
        /// The bump pointer at the time of the failing request.
        next_free: u64,
    },
}

impl AllocError {
    /// The offending pointer, for diagnostics.
    #[must_use]
    pub const fn pointer(&self) -> u64 {
        match self {
            Self::PermanentExhausted { next_free } | Self::TemporaryExhausted { next_free } => {
                *next_free
            }
        }
    }
}

impl core::fmt::Display for AllocError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::PermanentExhausted { next_free } => {
                write!(f, "permanent allocator overflow at {next_free:#x}")
            }
            Self::TemporaryExhausted { next_free } => {
                write!(f, "temporary allocator overflow at {next_free:#x}")
            }
        }
    }
}
