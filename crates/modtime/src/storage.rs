//! Module storage: where the engine finds image bytes and symbol maps.
//!
//! Storage is a collaborator interface: the engine never touches the
//! filesystem directly, so embedders can serve images from pack files,
//! archives, or memory. Symbol maps are diagnostics-only: implementations
//! log and return `None` on any failure rather than propagate it.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;

/// Source of module images and their optional symbol maps.
pub trait ModuleStorage {
    /// Reads the image bytes for a module, `Ok(None)` when no image exists
    /// under that name. `Err` is reserved for real I/O failures.
    fn read_module_image(&self, name: &str) -> anyhow::Result<Option<Vec<u8>>>;

    /// Reads the side-channel symbol map for a module, if there is one.
    /// Never fails: a missing or unreadable map degrades diagnostics only.
    fn read_symbol_map(&self, name: &str) -> Option<String>;
}

/// Filesystem storage: `<dir>/<name>.mtm` images with `<name>.map` symbol
/// maps beside them.
pub struct DirStorage {
    root: PathBuf,
}

impl DirStorage {
    /// Serves modules from `root`.
    pub fn new(root: impl Into<PathBuf>) -> DirStorage {
        DirStorage { root: root.into() }
    }
}

impl ModuleStorage for DirStorage {
    fn read_module_image(&self, name: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let path = self.root.join(format!("{name}.mtm"));
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(anyhow::Error::new(err).context(format!("reading {}", path.display()))),
        }
    }

    fn read_symbol_map(&self, name: &str) -> Option<String> {
        let path = self.root.join(format!("{name}.map"));
        match std::fs::read_to_string(&path) {
            Ok(text) => Some(text),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => {
                log::warn!("unreadable symbol map {}: {err}", path.display());
                None
            }
        }
    }
}

/// In-memory storage, for tests and hosts that unpack their own archives.
#[derive(Default)]
pub struct MemStorage {
    images: RefCell<HashMap<String, Vec<u8>>>,
    maps: RefCell<HashMap<String, String>>,
}

impl MemStorage {
    /// An empty store.
    pub fn new() -> MemStorage {
        MemStorage::default()
    }

    /// Adds (or replaces) a module image.
    pub fn insert_image(&self, name: &str, bytes: Vec<u8>) {
        self.images.borrow_mut().insert(name.to_owned(), bytes);
    }

    /// Adds (or replaces) a symbol map.
    pub fn insert_map(&self, name: &str, text: &str) {
        self.maps.borrow_mut().insert(name.to_owned(), text.to_owned());
    }
}

impl ModuleStorage for MemStorage {
    fn read_module_image(&self, name: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.images.borrow().get(name).cloned())
    }

    fn read_symbol_map(&self, name: &str) -> Option<String> {
        self.maps.borrow().get(name).cloned()
    }
}
