//! The VM registry: a small fixed-capacity table of named, independently
//! loaded VM instances, plus the explicit active-VM stack that makes nested
//! host↔guest call chains unwind correctly.
//!
//! The registry is deliberately single-threaded (interior mutability via
//! `RefCell`, instances shared via `Rc`): a VM call chain runs to completion
//! on one thread, and entering the same registry from two threads requires
//! external synchronization the embedder must provide. That constraint is
//! documented, not enforced.

use std::cell::RefCell;
use std::rc::Rc;

use modtime_environ::ModuleImage;

use crate::bridge::{self, CallContext, NativeModule, SyscallHandler};
use crate::error::{CallError, LoadError};
use crate::instance::{ExecutionMode, InstanceOptions, VmInstance};

/// Default number of registry slots; matches the handful of module roles a
/// host application has (gameplay, client prediction, UI).
pub const DEFAULT_REGISTRY_CAPACITY: usize = 3;

/// What a module is loaded from.
pub enum ModuleSource {
    /// A parsed bytecode image, sandboxed.
    Image(ModuleImage),
    /// Registered trusted host code; same contract, no sandbox.
    Native(Rc<dyn NativeModule>),
}

#[derive(Clone)]
enum SlotKind {
    Sandboxed(Rc<RefCell<VmInstance>>),
    Native(Rc<dyn NativeModule>),
}

struct Slot {
    name: String,
    kind: SlotKind,
    handler: Rc<dyn SyscallHandler>,
    teardown_entry: Option<i32>,
}

/// Summary of a loaded VM, for diagnostics.
#[derive(Clone, Debug)]
pub struct VmDescription {
    /// The instance's name.
    pub name: String,
    /// Effective execution mode (reflects any interpreter fallback).
    pub mode: ExecutionMode,
    /// Bytecode size in bytes; zero for native modules.
    pub code_size: u32,
    /// Guest-visible memory (data + lit + bss); zero for native modules.
    pub data_size: u64,
    /// Symbols loaded from the side-channel map.
    pub symbol_count: usize,
}

/// The fixed-capacity table of loaded VMs.
pub struct VmRegistry {
    slots: RefCell<Vec<Option<Slot>>>,
    active: RefCell<Vec<String>>,
}

impl Default for VmRegistry {
    fn default() -> VmRegistry {
        VmRegistry::new(DEFAULT_REGISTRY_CAPACITY)
    }
}

impl VmRegistry {
    /// Creates a registry with the given number of slots.
    pub fn new(capacity: usize) -> VmRegistry {
        VmRegistry {
            slots: RefCell::new((0..capacity).map(|_| None).collect()),
            active: RefCell::new(Vec::new()),
        }
    }

    /// The registry's fixed capacity.
    pub fn capacity(&self) -> usize {
        self.slots.borrow().len()
    }

    /// Whether a VM with this name is loaded.
    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// The VM currently executing on this call chain, if any.
    ///
    /// Nested calls push and pop; the value observed inside a syscall
    /// handler is always the VM that issued the syscall.
    pub fn active_vm(&self) -> Option<String> {
        self.active.borrow().last().cloned()
    }

    /// Loads a module into a free slot.
    ///
    /// Idempotent per name: if `name` is already loaded the existing
    /// instance is left untouched and its mode is returned. Fails when every
    /// slot is occupied; on failure no partially-constructed instance is
    /// reachable.
    pub fn create(
        &self,
        name: &str,
        source: ModuleSource,
        handler: Rc<dyn SyscallHandler>,
        options: &InstanceOptions,
        symbol_map: Option<&str>,
    ) -> Result<ExecutionMode, LoadError> {
        if let Some(mode) = self.mode_of(name) {
            log::debug!("`{name}` already loaded ({mode}), reusing");
            return Ok(mode);
        }

        let mut slots = self.slots.borrow_mut();
        let capacity = slots.len();
        let free = slots
            .iter_mut()
            .find(|slot| slot.is_none())
            .ok_or(LoadError::RegistryFull { capacity })?;

        let (kind, mode) = match source {
            ModuleSource::Native(module) => {
                log::debug!("`{name}` bound to native host code");
                (SlotKind::Native(module), ExecutionMode::NativeHost)
            }
            ModuleSource::Image(image) => {
                let instance = VmInstance::new(name, image, options, symbol_map)?;
                let mode = instance.mode();
                (SlotKind::Sandboxed(Rc::new(RefCell::new(instance))), mode)
            }
        };

        *free = Some(Slot {
            name: name.to_owned(),
            kind,
            handler,
            teardown_entry: options.teardown_entry,
        });
        Ok(mode)
    }

    /// Issues an entry call: up to [`MAX_CALL_ARGS`](crate::MAX_CALL_ARGS)
    /// integer words in, one integer out.
    ///
    /// The active-VM stack is pushed for the duration and popped by a drop
    /// guard, so the previous active VM is restored even when the call
    /// fails.
    pub fn call(&self, name: &str, entry: i32, args: &[i32]) -> Result<i32, CallError> {
        let (kind, handler) = {
            let slots = self.slots.borrow();
            let slot = find_in(&slots, name).ok_or_else(|| CallError::UnknownVm {
                name: name.to_owned(),
            })?;
            (slot.kind.clone(), Rc::clone(&slot.handler))
        };

        self.active.borrow_mut().push(name.to_owned());
        let _guard = ActiveGuard(&self.active);

        log::trace!("calling `{name}` entry {entry} with {} args", args.len());
        match kind {
            SlotKind::Sandboxed(vm) => {
                let ctx = CallContext {
                    registry: self,
                    handler: &handler,
                    vm: &vm,
                    name,
                };
                bridge::enter(&ctx, entry, args)
            }
            SlotKind::Native(module) => Ok(module.entry(entry, args)),
        }
    }

    /// Resets a VM to its freshly-loaded state.
    ///
    /// Bytecode instances reset in place (data re-zeroed and re-copied from
    /// the retained image; code, tables, and mask untouched). Native
    /// instances are destroyed and recreated, since host code cannot be
    /// selectively reset.
    pub fn restart(&self, name: &str) -> Result<(), CallError> {
        enum Plan {
            InPlace(Rc<RefCell<VmInstance>>),
            Recreate(Option<i32>),
        }
        let plan = {
            let slots = self.slots.borrow();
            let slot = find_in(&slots, name).ok_or_else(|| CallError::UnknownVm {
                name: name.to_owned(),
            })?;
            match &slot.kind {
                SlotKind::Sandboxed(vm) => Plan::InPlace(Rc::clone(vm)),
                SlotKind::Native(_) => Plan::Recreate(slot.teardown_entry),
            }
        };
        match plan {
            Plan::InPlace(vm) => {
                let mut inst = vm.try_borrow_mut().map_err(|_| CallError::Reentered {
                    name: name.to_owned(),
                })?;
                inst.restart();
            }
            Plan::Recreate(teardown) => {
                // Host code cannot be selectively reset, so a native restart
                // is a destroy-and-recreate around the same registered
                // module object.
                if let Some(entry) = teardown {
                    if let Err(err) = self.call(name, entry, &[]) {
                        log::warn!("`{name}` teardown entry {entry} failed: {err}");
                    }
                }
                log::debug!("recreated native module `{name}`");
            }
        }
        Ok(())
    }

    /// Unloads a VM: runs its optional teardown entry, then clears the slot.
    pub fn destroy(&self, name: &str) -> Result<(), CallError> {
        let teardown = {
            let slots = self.slots.borrow();
            let slot = find_in(&slots, name).ok_or_else(|| CallError::UnknownVm {
                name: name.to_owned(),
            })?;
            slot.teardown_entry
        };
        if let Some(entry) = teardown {
            if let Err(err) = self.call(name, entry, &[]) {
                log::warn!("`{name}` teardown entry {entry} failed: {err}");
            }
        }

        let mut slots = self.slots.borrow_mut();
        for slot in slots.iter_mut() {
            if slot.as_ref().is_some_and(|s| s.name == name) {
                *slot = None;
                log::debug!("destroyed `{name}`");
                return Ok(());
            }
        }
        Ok(())
    }

    /// Unloads everything, ignoring per-instance failures. Shutdown path.
    pub fn destroy_all(&self) {
        let names: Vec<String> = {
            let slots = self.slots.borrow();
            slots
                .iter()
                .flatten()
                .map(|slot| slot.name.clone())
                .collect()
        };
        for name in names {
            if let Err(err) = self.destroy(&name) {
                log::warn!("destroying `{name}` failed: {err}");
            }
        }
    }

    /// Diagnostics summary for a loaded VM.
    pub fn describe(&self, name: &str) -> Result<VmDescription, CallError> {
        let slots = self.slots.borrow();
        let slot = find_in(&slots, name).ok_or_else(|| CallError::UnknownVm {
            name: name.to_owned(),
        })?;
        Ok(match &slot.kind {
            SlotKind::Native(_) => VmDescription {
                name: slot.name.clone(),
                mode: ExecutionMode::NativeHost,
                code_size: 0,
                data_size: 0,
                symbol_count: 0,
            },
            SlotKind::Sandboxed(vm) => {
                let inst = vm.borrow();
                let header = inst.image().header();
                VmDescription {
                    name: slot.name.clone(),
                    mode: inst.mode(),
                    code_size: header.code_len,
                    data_size: header.memory_len(),
                    symbol_count: inst.symbols.len(),
                }
            }
        })
    }

    /// Renders and resets the per-symbol profile of a bytecode VM. Native
    /// modules have nothing to report.
    pub fn profile_report(&self, name: &str) -> Result<String, CallError> {
        let slots = self.slots.borrow();
        let slot = find_in(&slots, name).ok_or_else(|| CallError::UnknownVm {
            name: name.to_owned(),
        })?;
        Ok(match &slot.kind {
            SlotKind::Native(_) => String::from("no profile data\n"),
            SlotKind::Sandboxed(vm) => vm.borrow_mut().symbols.report(),
        })
    }

    fn find(&self, name: &str) -> Option<usize> {
        self.slots
            .borrow()
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|s| s.name == name))
    }

    fn mode_of(&self, name: &str) -> Option<ExecutionMode> {
        let slots = self.slots.borrow();
        let slot = find_in(&slots, name)?;
        Some(match &slot.kind {
            SlotKind::Native(_) => ExecutionMode::NativeHost,
            SlotKind::Sandboxed(vm) => vm.borrow().mode(),
        })
    }
}

fn find_in<'a>(slots: &'a [Option<Slot>], name: &str) -> Option<&'a Slot> {
    slots
        .iter()
        .flatten()
        .find(|slot| slot.name == name)
}

struct ActiveGuard<'a>(&'a RefCell<Vec<String>>);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.borrow_mut().pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modtime_environ::{ImageBuilder, ImageVersion, Opcode};

    struct NopHandler;
    impl SyscallHandler for NopHandler {
        fn syscall(
            &self,
            _ctx: &mut crate::bridge::SyscallContext<'_>,
            _args: &[i32],
        ) -> anyhow::Result<i32> {
            Ok(0)
        }
    }

    fn image() -> ModuleImage {
        let mut b = ImageBuilder::new(ImageVersion::V1);
        b.op_w(Opcode::Enter, 16)
            .op_w(Opcode::Const, 12)
            .op_w(Opcode::Leave, 16);
        ModuleImage::parse(&b.finish()).unwrap()
    }

    fn create(reg: &VmRegistry, name: &str) -> ExecutionMode {
        reg.create(
            name,
            ModuleSource::Image(image()),
            Rc::new(NopHandler),
            &InstanceOptions::default(),
            None,
        )
        .unwrap()
    }

    #[test]
    fn create_is_idempotent_per_name() {
        let reg = VmRegistry::new(2);
        create(&reg, "game");
        create(&reg, "game");
        create(&reg, "ui");
        assert!(reg.contains("game"));
        assert!(reg.contains("ui"));
        // Both slots used, but re-creating an existing name still succeeds.
        create(&reg, "game");
    }

    #[test]
    fn registry_full_is_fatal() {
        let reg = VmRegistry::new(1);
        create(&reg, "game");
        let err = reg
            .create(
                "ui",
                ModuleSource::Image(image()),
                Rc::new(NopHandler),
                &InstanceOptions::default(),
                None,
            )
            .unwrap_err();
        assert!(matches!(err, LoadError::RegistryFull { capacity: 1 }));
    }

    #[test]
    fn destroy_frees_the_slot() {
        let reg = VmRegistry::new(1);
        create(&reg, "game");
        reg.destroy("game").unwrap();
        assert!(!reg.contains("game"));
        create(&reg, "ui");
    }

    #[test]
    fn destroy_all_sweeps() {
        let reg = VmRegistry::new(3);
        create(&reg, "a");
        create(&reg, "b");
        reg.destroy_all();
        assert!(!reg.contains("a"));
        assert!(!reg.contains("b"));
        assert_eq!(reg.active_vm(), None);
    }

    #[test]
    fn unknown_vm_errors() {
        let reg = VmRegistry::default();
        assert!(matches!(
            reg.call("ghost", 0, &[]),
            Err(CallError::UnknownVm { .. })
        ));
        assert!(matches!(
            reg.restart("ghost"),
            Err(CallError::UnknownVm { .. })
        ));
        assert!(matches!(
            reg.destroy("ghost"),
            Err(CallError::UnknownVm { .. })
        ));
    }

    #[test]
    fn native_module_shares_the_call_contract() {
        struct Doubler;
        impl NativeModule for Doubler {
            fn entry(&self, entry: i32, args: &[i32]) -> i32 {
                assert_eq!(entry, 7);
                args[0] * 2
            }
        }
        let reg = VmRegistry::default();
        reg.create(
            "native",
            ModuleSource::Native(Rc::new(Doubler)),
            Rc::new(NopHandler),
            &InstanceOptions::default(),
            None,
        )
        .unwrap();
        assert_eq!(reg.call("native", 7, &[21]).unwrap(), 42);
        assert_eq!(
            reg.describe("native").unwrap().mode,
            ExecutionMode::NativeHost
        );
        reg.restart("native").unwrap();
        assert_eq!(reg.call("native", 7, &[5]).unwrap(), 10);
    }

    #[test]
    fn teardown_entry_runs_on_destroy() {
        use std::cell::Cell;
        // The teardown hook issues entry calls like any other caller; a
        // handler-side counter observes the guest running.
        struct Counting(Rc<Cell<u32>>);
        impl SyscallHandler for Counting {
            fn syscall(
                &self,
                _ctx: &mut crate::bridge::SyscallContext<'_>,
                _args: &[i32],
            ) -> anyhow::Result<i32> {
                Ok(0)
            }
        }
        impl NativeModule for Counting {
            fn entry(&self, entry: i32, _args: &[i32]) -> i32 {
                assert_eq!(entry, 2);
                self.0.set(self.0.get() + 1);
                0
            }
        }

        let hits = Rc::new(Cell::new(0));
        let reg = VmRegistry::default();
        reg.create(
            "native",
            ModuleSource::Native(Rc::new(Counting(Rc::clone(&hits)))),
            Rc::new(NopHandler),
            &InstanceOptions {
                teardown_entry: Some(2),
                ..Default::default()
            },
            None,
        )
        .unwrap();
        reg.destroy("native").unwrap();
        assert_eq!(hits.get(), 1);
        assert!(!reg.contains("native"));
    }
}
