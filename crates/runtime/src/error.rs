//! Error types for loading and calling VM instances.
//!
//! Load errors are fatal for the named module: no partially-constructed
//! instance is ever reachable after one. Call errors abort the offending
//! entry call only; the instance stays loaded and callable.

use modtime_environ::{ImageError, Opcode};
use thiserror::Error;

/// An error produced while creating a VM instance.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The module image failed format validation.
    #[error("malformed module image")]
    Image(#[from] ImageError),

    /// Translation for the compiled backend failed and the caller demanded
    /// compiled execution rather than an interpreter fallback.
    #[error("module could not be translated for the compiled backend")]
    CompileFailed(#[source] ImageError),

    /// Storage has no image under this module name.
    #[error("no module image found for `{name}`")]
    ImageNotFound {
        /// The requested module name.
        name: String,
    },

    /// Every registry slot is occupied.
    #[error("VM registry is full ({capacity} slots)")]
    RegistryFull {
        /// The registry's fixed capacity.
        capacity: usize,
    },

    /// A previous load of this module failed fatally; the name is poisoned
    /// until the embedder clears it, so retries short-circuit without
    /// touching storage.
    #[error("module `{name}` previously failed to load")]
    PreviouslyFailed {
        /// The poisoned module name.
        name: String,
    },
}

/// An error produced by an entry call into a VM.
#[derive(Debug, Error)]
pub enum CallError {
    /// No VM with this name is loaded.
    #[error("no loaded VM named `{name}`")]
    UnknownVm {
        /// The requested name.
        name: String,
    },

    /// The instance is already executing on this thread outside of a
    /// syscall, which only happens when the single-threaded contract is
    /// violated.
    #[error("VM `{name}` is already executing")]
    Reentered {
        /// The busy instance.
        name: String,
    },

    /// More arguments than the calling convention can marshal.
    #[error("too many call arguments ({given}, the convention carries at most {max})")]
    TooManyArgs {
        /// Number supplied.
        given: usize,
        /// Fixed maximum.
        max: usize,
    },

    /// The guest call stack grew below its reserved region.
    #[error("guest stack overflow (program stack {ps:#x}, bottom {bottom:#x})")]
    StackOverflow {
        /// Program-stack value that violated the bound.
        ps: u32,
        /// The fixed lower bound.
        bottom: u32,
    },

    /// The operand stack over- or underflowed.
    #[error("operand stack fault at instruction {pc}")]
    OperandStack {
        /// Faulting instruction index.
        pc: u32,
    },

    /// A call, jump, or return targeted something that is not an
    /// instruction. Control-flow escapes are rejected, never clipped.
    #[error("control transfer to {target} outside the module's {count} instructions")]
    BadTarget {
        /// The illegal target.
        target: i32,
        /// The module's instruction count.
        count: u32,
    },

    /// A computed jump targeted an instruction absent from the image's
    /// jump-table whitelist.
    #[error("computed jump to instruction {target} is not in the jump table")]
    JumpNotInTable {
        /// The rejected target.
        target: u32,
    },

    /// Integer division or remainder by zero.
    #[error("integer division by zero at instruction {pc}")]
    DivideByZero {
        /// Faulting instruction index.
        pc: u32,
    },

    /// A block copy named a region that does not fit in the sandbox. Unlike
    /// scalar accesses these do not wrap.
    #[error("block copy out of range (dest {dest:#x}, src {src:#x}, len {len:#x})")]
    CopyOutOfRange {
        /// Destination guest address.
        dest: u32,
        /// Source guest address.
        src: u32,
        /// Byte count.
        len: u32,
    },

    /// The guest executed `Undef`, `Break`, or fell off the end of the code.
    #[error("guest executed {opcode:?} at instruction {pc}")]
    IllegalInstruction {
        /// The faulting opcode.
        opcode: Opcode,
        /// Faulting instruction index.
        pc: u32,
    },

    /// The configured per-call instruction budget ran out.
    #[error("instruction budget of {budget} exhausted")]
    FuelExhausted {
        /// The configured budget.
        budget: u64,
    },

    /// The host syscall handler returned an error.
    #[error("host syscall {number} failed")]
    Host {
        /// The syscall number the guest requested.
        number: i32,
        /// The handler's error.
        #[source]
        source: anyhow::Error,
    },
}
