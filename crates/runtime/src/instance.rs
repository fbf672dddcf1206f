//! A `VmInstance` owns everything one loaded module needs to execute: its
//! sandbox memory, its guest call stack, its resolved instruction-pointer
//! table, and whichever backend was selected at load time.

use std::rc::Rc;
use std::sync::Arc;

use modtime_environ::{scan_code, ImageVersion, ModuleImage};

use crate::compiled::{self, CompiledCode};
use crate::error::LoadError;
use crate::memory::SandboxMemory;
use crate::profiling::SymbolTable;

/// Size of the guest call stack, carved out of the top of sandbox memory.
pub const STACK_SIZE: u32 = 64 * 1024;

/// How a loaded module executes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Bytecode walked one instruction at a time.
    Interpreted,
    /// Bytecode translated once at load time, then dispatched from the
    /// translated form.
    Compiled,
    /// Trusted host code registered under the module's name; no sandbox.
    NativeHost,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ExecutionMode::Interpreted => "interpreted",
            ExecutionMode::Compiled => "compiled",
            ExecutionMode::NativeHost => "native",
        })
    }
}

/// Which sandboxed backend to build at load time.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum BackendStrategy {
    /// Always interpret.
    Interpreted,
    /// Translate at load time; fall back to the interpreter (with a logged
    /// warning) if translation fails.
    #[default]
    Compiled,
    /// Translate at load time; fail the load outright if translation fails.
    /// For embedders whose platform contract requires translated execution.
    CompiledOnly,
}

/// Per-instance knobs, fixed at create time.
#[derive(Clone, Debug, Default)]
pub struct InstanceOptions {
    /// Backend selection.
    pub strategy: BackendStrategy,
    /// Optional per-call instruction budget. A guest that spins forever
    /// cannot otherwise be stopped without killing the host process.
    pub fuel: Option<u64>,
    /// Attribute guest calls to symbols for `profile_report`.
    pub profiling: bool,
    /// Entry index to invoke (with no arguments) right before the instance
    /// is destroyed, letting the guest tear down external state.
    pub teardown_entry: Option<i32>,
}

pub(crate) enum BackendCode {
    Interpreted,
    Compiled(Rc<CompiledCode>),
}

/// One loaded module: sandbox, stack, resolved code, diagnostics.
pub struct VmInstance {
    name: String,
    image: ModuleImage,
    pub(crate) memory: SandboxMemory,
    /// Current guest stack pointer. Persisted here across calls so that a
    /// nested entry (host → A → host → A) carves its frame below the frames
    /// already in flight.
    pub(crate) program_stack: u32,
    pub(crate) stack_bottom: u32,
    instruction_pointers: Arc<[u32]>,
    pub(crate) backend: BackendCode,
    mode: ExecutionMode,
    pub(crate) fuel: Option<u64>,
    pub(crate) profiling: bool,
    pub(crate) symbols: SymbolTable,
}

impl VmInstance {
    /// Builds an instance from a parsed image.
    ///
    /// Allocates and populates sandbox memory, builds the backend (running
    /// the load-time translation pass for the compiled strategy, with
    /// fallback per [`BackendStrategy`]), resolves the instruction-pointer
    /// table, and parses the optional symbol map against it.
    pub fn new(
        name: &str,
        image: ModuleImage,
        options: &InstanceOptions,
        symbol_map: Option<&str>,
    ) -> Result<VmInstance, LoadError> {
        let header = image.header();
        let mut memory = SandboxMemory::new(header.memory_len() + u64::from(STACK_SIZE));
        image.populate_memory(&mut memory);

        let (backend, instruction_pointers, mode) = match options.strategy {
            BackendStrategy::Interpreted => interpreted_backend(&image)?,
            BackendStrategy::Compiled => match compiled::translate(&image) {
                Ok(code) => compiled_backend(code),
                Err(err) => {
                    log::warn!(
                        "module `{name}`: translation failed ({err}), falling back to the interpreter"
                    );
                    interpreted_backend(&image)?
                }
            },
            BackendStrategy::CompiledOnly => match compiled::translate(&image) {
                Ok(code) => compiled_backend(code),
                Err(err) => return Err(LoadError::CompileFailed(err)),
            },
        };

        let symbols = match symbol_map {
            Some(text) => SymbolTable::parse(text, &instruction_pointers),
            None => SymbolTable::empty(),
        };

        let program_stack = memory.len();
        let stack_bottom = program_stack - STACK_SIZE;
        log::debug!(
            "loaded `{name}` ({mode}): {} instructions, {}B sandbox, {} symbols",
            header.instruction_count,
            memory.len(),
            symbols.len(),
        );

        Ok(VmInstance {
            name: name.to_owned(),
            image,
            memory,
            program_stack,
            stack_bottom,
            instruction_pointers,
            backend,
            mode,
            fuel: options.fuel,
            profiling: options.profiling,
            symbols,
        })
    }

    /// Resets guest-visible data to its freshly-loaded state without
    /// reparsing or retranslating anything.
    ///
    /// Re-zeros the data/lit/bss region and re-copies the initialized
    /// segments from the retained image. The instruction-pointer table, the
    /// translated code, the mask, and the symbol table are untouched.
    pub fn restart(&mut self) {
        let header = self.image.header();
        self.memory.zero(0, header.memory_len() as u32);
        self.image.populate_memory(&mut self.memory);
        self.program_stack = self.memory.len();
        log::debug!("restarted `{}`", self.name);
    }

    /// The instance's unique name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The effective execution mode (reflects an interpreter fallback).
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// The retained image this instance was loaded from.
    pub fn image(&self) -> &ModuleImage {
        &self.image
    }

    /// Instruction index → backend-resolved offset. Fully populated at load
    /// time, immutable afterward.
    pub fn instruction_pointers(&self) -> &Arc<[u32]> {
        &self.instruction_pointers
    }

    pub(crate) fn instruction_count(&self) -> u32 {
        self.image.header().instruction_count
    }
}

fn interpreted_backend(
    image: &ModuleImage,
) -> Result<(BackendCode, Arc<[u32]>, ExecutionMode), LoadError> {
    let offsets = scan_code(image.code(), image.header().instruction_count)?;
    Ok((
        BackendCode::Interpreted,
        Arc::from(offsets),
        ExecutionMode::Interpreted,
    ))
}

fn compiled_backend(code: CompiledCode) -> (BackendCode, Arc<[u32]>, ExecutionMode) {
    let table = code.instruction_pointers().clone();
    (
        BackendCode::Compiled(Rc::new(code)),
        table,
        ExecutionMode::Compiled,
    )
}

/// Loader-side helpers on the image: segment placement within the sandbox.
pub(crate) trait ImageMemoryExt {
    fn populate_memory(&self, memory: &mut SandboxMemory);
}

impl ImageMemoryExt for ModuleImage {
    /// Copies data words (byte-swapped to native order) and the literal pool
    /// into the bottom of the sandbox.
    fn populate_memory(&self, memory: &mut SandboxMemory) {
        let init_len = self.header().initialized_len();
        if init_len == 0 {
            return;
        }
        let region = memory
            .slice_mut(0, init_len)
            .expect("sandbox sized to cover initialized segments");
        self.populate(region);
    }
}

/// True when this image version carries a computed-jump whitelist.
pub(crate) fn has_jump_table(image: &ModuleImage) -> bool {
    image.header().version == ImageVersion::V2
}
