//! The host↔guest call bridge: one calling convention used in both
//! directions.
//!
//! Host→guest: an entry call carves a fixed-layout frame below the guest's
//! current stack pointer (return sentinel, spare word, entry index, then up
//! to [`MAX_CALL_ARGS`] argument words) and starts the backend at
//! instruction 0, where the module's dispatcher routes on the entry index.
//! The frame layout is what `Local`/`Arg` offsets in guest code are
//! assembled against, so it is part of the ABI and never changes shape.
//!
//! Guest→host: a `Call` whose popped target is negative becomes a syscall.
//! The argument words the guest marshaled with `Arg` are collected from its
//! frame into a flat host-side array, `args[0]` carrying the negative
//! syscall number, and handed to the instance's [`SyscallHandler`]. Guest
//! pointers in that array are guest addresses; the handler dereferences them
//! only through the masked accessors on [`SyscallContext`].

use std::cell::RefCell;
use std::rc::Rc;

use smallvec::SmallVec;

use crate::error::CallError;
use crate::instance::{BackendCode, VmInstance};
use crate::memory::SandboxMemory;
use crate::registry::VmRegistry;
use crate::{compiled, interp};

/// Maximum argument words an entry call can carry.
pub const MAX_CALL_ARGS: usize = 10;

/// Words marshaled for every syscall: the number plus up to fifteen
/// arguments. Handlers know their own arity; extra words are stack noise
/// they ignore.
pub(crate) const SYSCALL_ARG_WORDS: usize = 16;

/// Entry-frame size: sentinel + spare + entry index + argument words.
pub(crate) const ENTRY_FRAME: u32 = 8 + 4 * (1 + MAX_CALL_ARGS as u32);

/// Saved-return value that terminates a call when `Leave` restores it.
pub(crate) const RETURN_SENTINEL: i32 = -1;

pub(crate) type SyscallArgs = SmallVec<[i32; SYSCALL_ARG_WORDS]>;

/// Host-side syscall dispatcher for one VM instance.
///
/// Takes `&self` so a handler can be re-entered: a syscall may legitimately
/// call back into its own VM through [`SyscallContext::call`]. Handlers that
/// keep state use interior mutability.
pub trait SyscallHandler {
    /// Dispatches one syscall. `args[0]` is the negative syscall number the
    /// guest called; the rest are its marshaled argument words. The returned
    /// integer is pushed on the guest's operand stack. An `Err` aborts the
    /// guest call that issued the syscall.
    fn syscall(&self, ctx: &mut SyscallContext<'_>, args: &[i32]) -> anyhow::Result<i32>;
}

/// A trusted host-code module, registered under a module name and reached
/// through the same entry-call contract as bytecode, but with no sandbox
/// and no mask.
pub trait NativeModule {
    /// The module's entry dispatcher, the native twin of bytecode
    /// instruction 0.
    fn entry(&self, entry: i32, args: &[i32]) -> i32;
}

/// Everything a backend needs while running one entry call.
pub(crate) struct CallContext<'a> {
    pub registry: &'a VmRegistry,
    pub handler: &'a Rc<dyn SyscallHandler>,
    pub vm: &'a Rc<RefCell<VmInstance>>,
    pub name: &'a str,
}

/// The view of the world a [`SyscallHandler`] gets.
///
/// All guest-memory accessors mask the address into the calling guest's
/// sandbox; there is deliberately no way to turn a guest address into a host
/// pointer.
pub struct SyscallContext<'a> {
    registry: &'a VmRegistry,
    vm: &'a Rc<RefCell<VmInstance>>,
    name: &'a str,
}

impl SyscallContext<'_> {
    /// Name of the VM that issued the syscall.
    pub fn vm_name(&self) -> &str {
        self.name
    }

    /// The VM on top of the registry's active stack. Inside a handler this
    /// is the syscalling VM; it reverts to the outer VM the moment a nested
    /// entry call returns.
    pub fn active_vm(&self) -> Option<String> {
        self.registry.active_vm()
    }

    /// Issues an entry call to a VM through the registry, the path by which
    /// host code servicing one module calls into another (or back into this
    /// one; frames nest below the in-flight call).
    pub fn call(&self, name: &str, entry: i32, args: &[i32]) -> Result<i32, CallError> {
        self.registry.call(name, entry, args)
    }

    /// Reads a word at a masked guest address.
    pub fn read_i32(&self, addr: u32) -> i32 {
        self.vm.borrow().memory.read_i32(addr)
    }

    /// Writes a word at a masked guest address.
    pub fn write_i32(&self, addr: u32, value: i32) {
        self.vm.borrow_mut().memory.write_i32(addr, value);
    }

    /// Copies guest bytes into a host buffer, masking each address.
    pub fn read_bytes(&self, addr: u32, buf: &mut [u8]) {
        let inst = self.vm.borrow();
        for (i, slot) in buf.iter_mut().enumerate() {
            *slot = inst.memory.read_u8(addr.wrapping_add(i as u32));
        }
    }

    /// Copies host bytes into guest memory, masking each address.
    pub fn write_bytes(&self, addr: u32, bytes: &[u8]) {
        let mut inst = self.vm.borrow_mut();
        for (i, byte) in bytes.iter().enumerate() {
            inst.memory.write_u8(addr.wrapping_add(i as u32), *byte);
        }
    }

    /// Reads a NUL-terminated guest string (lossily UTF-8, at most `max`
    /// bytes), the usual shape of text arguments to print/log syscalls.
    pub fn read_cstr(&self, addr: u32, max: usize) -> String {
        let inst = self.vm.borrow();
        let mut bytes = Vec::new();
        for i in 0..max {
            let b = inst.memory.read_u8(addr.wrapping_add(i as u32));
            if b == 0 {
                break;
            }
            bytes.push(b);
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// Runs one entry call against a sandboxed instance.
///
/// Marshals the entry frame, dispatches to the instance's backend, and
/// restores the guest stack pointer on every exit path so nested and failed
/// calls unwind identically.
pub(crate) fn enter(ctx: &CallContext<'_>, entry: i32, args: &[i32]) -> Result<i32, CallError> {
    if args.len() > MAX_CALL_ARGS {
        return Err(CallError::TooManyArgs {
            given: args.len(),
            max: MAX_CALL_ARGS,
        });
    }

    let saved_ps;
    let use_compiled;
    {
        let mut inst = ctx.vm.try_borrow_mut().map_err(|_| CallError::Reentered {
            name: ctx.name.to_owned(),
        })?;
        let inst = &mut *inst;
        saved_ps = inst.program_stack;
        let bottom = inst.stack_bottom;
        let ps = saved_ps
            .checked_sub(ENTRY_FRAME)
            .filter(|ps| *ps >= bottom)
            .ok_or(CallError::StackOverflow {
                ps: saved_ps,
                bottom,
            })?;

        inst.memory.write_i32(ps, RETURN_SENTINEL);
        inst.memory.write_i32(ps + 4, 0);
        inst.memory.write_i32(ps + 8, entry);
        for i in 0..MAX_CALL_ARGS {
            let word = args.get(i).copied().unwrap_or(0);
            inst.memory.write_i32(ps + 12 + 4 * i as u32, word);
        }
        inst.program_stack = ps;

        if inst.profiling {
            let address = inst.instruction_pointers()[0];
            inst.symbols.attribute(address);
        }
        use_compiled = matches!(inst.backend, BackendCode::Compiled(_));
    }

    let result = if use_compiled {
        compiled::run(ctx)
    } else {
        interp::run(ctx)
    };

    ctx.vm.borrow_mut().program_stack = saved_ps;
    match &result {
        Ok(value) => log::trace!("`{}` entry {entry} -> {value}", ctx.name),
        Err(err) => log::trace!("`{}` entry {entry} failed: {err}", ctx.name),
    }
    result
}

/// Collects the syscall argument window from the guest frame. `args[0]` is
/// the negative target the guest called; the rest are the words its `Arg`
/// instructions stored (or stack noise beyond them, which handlers ignore).
pub(crate) fn marshal_syscall(memory: &SandboxMemory, ps: u32, target: i32) -> SyscallArgs {
    let mut args = SyscallArgs::new();
    args.push(target);
    for i in 1..SYSCALL_ARG_WORDS as u32 {
        args.push(memory.read_i32(ps.wrapping_add(4 + 4 * i)));
    }
    args
}

/// Invokes the host handler for a marshaled syscall. Called by the backends
/// with the instance borrow released, so the handler may re-enter this VM.
pub(crate) fn dispatch_syscall(ctx: &CallContext<'_>, args: &[i32]) -> Result<i32, CallError> {
    let number = args[0];
    log::trace!("`{}` syscall {number}", ctx.name);
    let mut sys_ctx = SyscallContext {
        registry: ctx.registry,
        vm: ctx.vm,
        name: ctx.name,
    };
    ctx.handler
        .syscall(&mut sys_ctx, args)
        .map_err(|source| CallError::Host { number, source })
}
