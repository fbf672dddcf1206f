//! The engine: the root object an embedder holds.
//!
//! Owns module storage, the registered native-host modules, the VM registry,
//! and the set of permanently-failed module names. All VM lifecycle flows
//! through it.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use anyhow::{Context, Result};
use modtime_environ::ModuleImage;
use modtime_runtime::{
    BackendStrategy, InstanceOptions, LoadError, ModuleSource, NativeModule, SyscallHandler,
    VmDescription, VmRegistry,
};

use crate::config::Config;
use crate::storage::ModuleStorage;

/// A cheap cloneable handle to a loaded VM. Names are unique, so the name is
/// the identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Vm {
    name: String,
}

impl Vm {
    /// The VM's unique name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Per-create options for [`Engine::create_vm`].
#[derive(Clone, Debug, Default)]
pub struct VmOptions {
    /// Try registered native host code under this name before bytecode, the
    /// way a development build substitutes trusted host modules for shipped
    /// images.
    pub prefer_native: bool,
    /// Override the engine-wide backend strategy for this module.
    pub strategy: Option<BackendStrategy>,
    /// Entry index called (with no arguments) right before the VM is
    /// destroyed.
    pub teardown_entry: Option<i32>,
}

/// Global context for loading and running game-logic modules.
pub struct Engine {
    config: Config,
    storage: Box<dyn ModuleStorage>,
    natives: RefCell<HashMap<String, Rc<dyn NativeModule>>>,
    registry: VmRegistry,
    /// Names whose load failed fatally. Poisoned permanently so repeated
    /// create attempts short-circuit without re-reading storage.
    failed: RefCell<HashSet<String>>,
}

impl Engine {
    /// Creates an engine serving modules from `storage`.
    pub fn new(config: &Config, storage: impl ModuleStorage + 'static) -> Engine {
        Engine {
            config: config.clone(),
            storage: Box::new(storage),
            natives: RefCell::new(HashMap::new()),
            registry: VmRegistry::new(config.capacity),
            failed: RefCell::new(HashSet::new()),
        }
    }

    /// Registers trusted host code reachable as a module under `name`.
    ///
    /// Native modules are only used by creates that ask for them with
    /// [`VmOptions::prefer_native`]; they bypass the sandbox entirely.
    pub fn register_native(&self, name: &str, module: Rc<dyn NativeModule>) {
        self.natives.borrow_mut().insert(name.to_owned(), module);
    }

    /// Loads a module and returns its handle.
    ///
    /// Idempotent per name: creating an already-loaded name returns a handle
    /// to the existing instance. Native host code is tried first when the
    /// options request it, falling through to bytecode from storage. Fatal
    /// failures (malformed image, full registry, missing image) leave no
    /// instance behind, and malformed images poison the name.
    pub fn create_vm(
        &self,
        name: &str,
        handler: Rc<dyn SyscallHandler>,
        options: &VmOptions,
    ) -> Result<Vm> {
        if self.failed.borrow().contains(name) {
            return Err(LoadError::PreviouslyFailed {
                name: name.to_owned(),
            }
            .into());
        }
        if self.registry.contains(name) {
            log::debug!("VM `{name}` already loaded, reusing");
            return Ok(Vm {
                name: name.to_owned(),
            });
        }

        let source = self.resolve_source(name, options)?;
        let instance_options = InstanceOptions {
            strategy: options.strategy.unwrap_or(self.config.strategy),
            fuel: self.config.fuel,
            profiling: self.config.profiling,
            teardown_entry: options.teardown_entry,
        };
        let symbol_map = self.storage.read_symbol_map(name);

        let mode = self
            .registry
            .create(
                name,
                source,
                handler,
                &instance_options,
                symbol_map.as_deref(),
            )
            .inspect_err(|err| {
                // A full registry is the host's problem, not the module's;
                // only image-level failures poison the name.
                if matches!(err, LoadError::Image(_) | LoadError::CompileFailed(_)) {
                    self.failed.borrow_mut().insert(name.to_owned());
                }
            })
            .with_context(|| format!("creating VM `{name}`"))?;

        log::info!("VM `{name}` ready ({mode})");
        Ok(Vm {
            name: name.to_owned(),
        })
    }

    /// Issues an entry call: up to ten integer words in, one integer out.
    pub fn call(&self, vm: &Vm, entry: i32, args: &[i32]) -> Result<i32> {
        self.registry
            .call(&vm.name, entry, args)
            .with_context(|| format!("calling `{}` entry {entry}", vm.name))
    }

    /// Resets a VM to its freshly-loaded state without re-reading storage.
    pub fn restart(&self, vm: &Vm) -> Result<Vm> {
        self.registry
            .restart(&vm.name)
            .with_context(|| format!("restarting `{}`", vm.name))?;
        Ok(vm.clone())
    }

    /// Unloads a VM, running its teardown entry first if one was configured.
    pub fn destroy(&self, vm: &Vm) -> Result<()> {
        self.registry
            .destroy(&vm.name)
            .with_context(|| format!("destroying `{}`", vm.name))
    }

    /// Unloads everything. Shutdown path; per-instance failures are logged
    /// and ignored.
    pub fn destroy_all(&self) {
        self.registry.destroy_all();
    }

    /// Diagnostics summary: mode, sizes, symbol count.
    pub fn describe(&self, vm: &Vm) -> Result<VmDescription> {
        Ok(self.registry.describe(&vm.name)?)
    }

    /// Renders and resets the VM's per-symbol call profile.
    pub fn profile_report(&self, vm: &Vm) -> Result<String> {
        Ok(self.registry.profile_report(&vm.name)?)
    }

    /// The VM currently executing on this call chain, if any.
    pub fn active_vm(&self) -> Option<String> {
        self.registry.active_vm()
    }

    fn resolve_source(&self, name: &str, options: &VmOptions) -> Result<ModuleSource> {
        if options.prefer_native {
            if let Some(module) = self.natives.borrow().get(name) {
                return Ok(ModuleSource::Native(Rc::clone(module)));
            }
            log::debug!("no native module `{name}`, falling through to bytecode");
        }

        let bytes = self
            .storage
            .read_module_image(name)?
            .ok_or_else(|| LoadError::ImageNotFound {
                name: name.to_owned(),
            })?;
        let image = ModuleImage::parse(&bytes).map_err(|err| {
            self.failed.borrow_mut().insert(name.to_owned());
            LoadError::Image(err)
        })?;
        Ok(ModuleSource::Image(image))
    }
}
