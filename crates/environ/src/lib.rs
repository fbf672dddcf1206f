//! Standalone environment support for Modtime: the versioned binary image
//! format that game-logic modules ship in, the opcode set those images
//! encode, and the validation that makes an image safe to hand to the
//! runtime.
//!
//! This crate deliberately knows nothing about execution. It decodes a byte
//! blob into a canonical [`ModuleImage`] that both execution backends consume,
//! and it offers an [`ImageBuilder`] for producing images programmatically
//! (the assembler toolchain is a separate project; the builder exists for
//! tests and host-side tooling).

#![deny(missing_docs, trivial_numeric_casts, unused_extern_crates)]
#![warn(unused_import_braces)]

mod builder;
mod image;
mod op;

pub use crate::builder::ImageBuilder;
pub use crate::image::{
    ImageError, ImageHeader, ImageVersion, ModuleImage, MAGIC_V1, MAGIC_V2, MAX_MODULE_MEMORY,
};
pub use crate::op::{scan_code, DecodedInstruction, InstructionStream, Opcode, OperandKind};

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
