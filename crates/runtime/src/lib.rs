//! Runtime support for Modtime: sandbox memory, VM instances, the two
//! sandboxed execution backends, the host↔guest call bridge, and the VM
//! registry.
//!
//! The single invariant this crate exists to enforce is that a guest module
//! can never read or write host memory: the guest's entire world is one
//! power-of-two-sized buffer, and every address the guest computes is masked
//! into that buffer before it is dereferenced. Wild address arithmetic wraps
//! inside the sandbox; only control flow is policed strictly (a jump or call
//! to anywhere but a known instruction aborts the call).
//!
//! Execution strategies:
//!
//! * **Interpreted** walks the encoded instruction stream directly.
//! * **Compiled** translates the whole stream once at load time into a dense
//!   table of decoded ops and dispatches over that; it also enforces the v2
//!   jump-target whitelist on computed jumps.
//! * **Native host** modules are trusted host code registered under a module
//!   name; they share the call contract but bypass the sandbox entirely.

#![deny(missing_docs, trivial_numeric_casts, unused_extern_crates)]
#![warn(unused_import_braces)]

mod bridge;
mod compiled;
mod error;
mod exec;
mod instance;
mod interp;
mod memory;
mod profiling;
mod registry;

pub use crate::bridge::{NativeModule, SyscallContext, SyscallHandler, MAX_CALL_ARGS};
pub use crate::error::{CallError, LoadError};
pub use crate::instance::{BackendStrategy, ExecutionMode, InstanceOptions, VmInstance, STACK_SIZE};
pub use crate::memory::SandboxMemory;
pub use crate::profiling::SymbolTable;
pub use crate::registry::{ModuleSource, VmDescription, VmRegistry, DEFAULT_REGISTRY_CAPACITY};

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
