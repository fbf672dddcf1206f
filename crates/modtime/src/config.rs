//! Global configuration options used to create an [`Engine`](crate::Engine).

use modtime_runtime::{BackendStrategy, DEFAULT_REGISTRY_CAPACITY};

/// Engine-wide configuration, consumed by [`Engine::new`](crate::Engine::new).
///
/// This structure exposes a builder-like interface: setters take and return
/// `&mut self` so options chain.
#[derive(Clone, Debug)]
pub struct Config {
    pub(crate) strategy: BackendStrategy,
    pub(crate) capacity: usize,
    pub(crate) fuel: Option<u64>,
    pub(crate) profiling: bool,
}

impl Config {
    /// Creates a configuration with the default settings: the compiled
    /// backend with interpreter fallback, three VM slots, no instruction
    /// budget, profiling off.
    pub fn new() -> Config {
        Config {
            strategy: BackendStrategy::default(),
            capacity: DEFAULT_REGISTRY_CAPACITY,
            fuel: None,
            profiling: false,
        }
    }

    /// Selects the execution backend built for bytecode modules.
    ///
    /// [`BackendStrategy::Compiled`] falls back to the interpreter when
    /// translation fails (the fallback is logged and visible in
    /// [`describe`](crate::Engine::describe)); use
    /// [`BackendStrategy::CompiledOnly`] when the embedder's platform
    /// contract forbids silently substituting the interpreter.
    pub fn strategy(&mut self, strategy: BackendStrategy) -> &mut Self {
        self.strategy = strategy;
        self
    }

    /// Number of VM registry slots. Hosts load a handful of module roles;
    /// the default is 3.
    pub fn capacity(&mut self, capacity: usize) -> &mut Self {
        self.capacity = capacity;
        self
    }

    /// Caps every entry call at `budget` executed guest instructions.
    ///
    /// Without a budget, a guest that spins forever can only be stopped by
    /// killing the host process; with one, the call aborts with a
    /// distinguishable error and the VM stays usable. Both backends charge
    /// identically.
    pub fn fuel(&mut self, budget: u64) -> &mut Self {
        self.fuel = Some(budget);
        self
    }

    /// Attributes guest calls to symbols so
    /// [`profile_report`](crate::Engine::profile_report) has data.
    /// Observation only; never changes execution results.
    pub fn profiling(&mut self, enable: bool) -> &mut Self {
        self.profiling = enable;
        self
    }
}

impl Default for Config {
    fn default() -> Config {
        Config::new()
    }
}
