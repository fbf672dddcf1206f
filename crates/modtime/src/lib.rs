//! Modtime embeds untrusted game-logic modules (gameplay, client
//! prediction, UI) shipped as compiled bytecode images, and runs them
//! inside a memory sandbox with a stable host↔guest calling convention.
//!
//! An [`Engine`] owns module storage, the VM registry, and any registered
//! trusted native modules. [`Engine::create_vm`] loads an image (selecting
//! the interpreted or load-time-translated backend), [`Engine::call`] issues
//! entry calls, and guests reach host services back through the
//! [`SyscallHandler`] registered at create time.
//!
//! # Example
//!
//! ```
//! use std::rc::Rc;
//! use modtime::{
//!     Config, Engine, ImageBuilder, ImageVersion, MemStorage, Opcode, SyscallContext,
//!     SyscallHandler, VmOptions,
//! };
//!
//! struct Host;
//! impl SyscallHandler for Host {
//!     fn syscall(&self, _ctx: &mut SyscallContext<'_>, args: &[i32]) -> anyhow::Result<i32> {
//!         Ok(args[1])
//!     }
//! }
//!
//! # fn main() -> anyhow::Result<()> {
//! // fn(a, b) -> a + b, hand-assembled.
//! let mut image = ImageBuilder::new(ImageVersion::V1);
//! image
//!     .op_w(Opcode::Enter, 16)
//!     .op_w(Opcode::Local, 28)
//!     .op(Opcode::Load32)
//!     .op_w(Opcode::Local, 32)
//!     .op(Opcode::Load32)
//!     .op(Opcode::Add)
//!     .op_w(Opcode::Leave, 16);
//!
//! let storage = MemStorage::new();
//! storage.insert_image("logic", image.finish());
//!
//! let engine = Engine::new(&Config::new(), storage);
//! let vm = engine.create_vm("logic", Rc::new(Host), &VmOptions::default())?;
//! assert_eq!(engine.call(&vm, 0, &[40, 2])?, 42);
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs, trivial_numeric_casts, unused_extern_crates)]
#![warn(unused_import_braces)]

mod config;
mod engine;
mod storage;

pub use crate::config::Config;
pub use crate::engine::{Engine, Vm, VmOptions};
pub use crate::storage::{DirStorage, MemStorage, ModuleStorage};

pub use modtime_environ::{ImageBuilder, ImageError, ImageVersion, ModuleImage, Opcode};
pub use modtime_runtime::{
    BackendStrategy, CallError, ExecutionMode, LoadError, NativeModule, SyscallContext,
    SyscallHandler, VmDescription, MAX_CALL_ARGS,
};

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
