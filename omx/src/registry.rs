// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Reference counted access to vendor core libraries.
//!
//! Every element instance that drives a component of a vendor library holds a
//! [`LibraryHandle`]. The first handle for a library loads it and calls `OMX_Init`,
//! dropping the last one calls `OMX_Deinit` and unloads it again. The map of loaded
//! libraries is guarded by a single mutex.

use std::{
    collections::HashMap,
    fmt,
    ops::Deref,
    sync::{Arc, LazyLock, Mutex, PoisonError},
};

use tracing::{debug, info, warn};

use crate::{Error, Result};

/// The process-level entry points of a core library.
pub trait CoreLibrary: Send + Sync + Sized + 'static {
    /// Loads the library named `name` (a file name or path).
    fn load(name: &str) -> Result<Self>;

    /// `OMX_Init`.
    fn init(&self) -> Result<()>;

    /// `OMX_Deinit`.
    fn deinit(&self) -> Result<()>;
}

impl CoreLibrary for omx_sys::OmxCoreLibrary {
    fn load(name: &str) -> Result<Self> {
        // Safety: loading a vendor library runs its initializers; the library is
        // expected to be a regular OMX IL core.
        Ok(unsafe { omx_sys::OmxCoreLibrary::new(name) }?)
    }

    fn init(&self) -> Result<()> {
        Error::from_omx(unsafe { omx_sys::OmxCoreLibrary::init(self) })
    }

    fn deinit(&self) -> Result<()> {
        Error::from_omx(unsafe { omx_sys::OmxCoreLibrary::deinit(self) })
    }
}

struct Entry<L> {
    library: Arc<L>,
    client_count: usize,
}

type Entries<L> = Arc<Mutex<HashMap<String, Entry<L>>>>;

/// Registry of loaded core libraries keyed by library name.
pub struct Registry<L: CoreLibrary = omx_sys::OmxCoreLibrary> {
    entries: Entries<L>,
}

impl<L: CoreLibrary> Clone for Registry<L> {
    fn clone(&self) -> Self {
        Registry {
            entries: self.entries.clone(),
        }
    }
}

impl<L: CoreLibrary> Default for Registry<L> {
    fn default() -> Self {
        Registry {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

static GLOBAL: LazyLock<Registry> = LazyLock::new(Registry::default);

impl Registry {
    /// The process-wide registry used by the elements.
    pub fn global() -> &'static Registry {
        &GLOBAL
    }
}

impl<L: CoreLibrary> Registry<L> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a handle on `name`, loading and initializing it for the first client.
    ///
    /// # Errors
    ///
    /// Returns an error if the library cannot be loaded, lacks one of the core entry
    /// points, or if `OMX_Init` fails. Nothing is registered in that case.
    pub fn request(&self, name: &str) -> Result<LibraryHandle<L>> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = entries.get_mut(name) {
            entry.client_count += 1;
            debug!(library = name, clients = entry.client_count, "Reusing core library");
            return Ok(LibraryHandle {
                name: name.to_string(),
                library: entry.library.clone(),
                entries: self.entries.clone(),
            });
        }

        let library = L::load(name)?;
        library.init()?;
        info!(library = name, "Initialized core library");
        let library = Arc::new(library);
        entries.insert(
            name.to_string(),
            Entry {
                library: library.clone(),
                client_count: 1,
            },
        );
        Ok(LibraryHandle {
            name: name.to_string(),
            library,
            entries: self.entries.clone(),
        })
    }

    /// Number of clients currently holding `name`, 0 when it is not loaded.
    pub fn client_count(&self, name: &str) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map_or(0, |entry| entry.client_count)
    }
}

/// A client's share of a loaded core library. Dereferences to the library.
pub struct LibraryHandle<L: CoreLibrary = omx_sys::OmxCoreLibrary> {
    name: String,
    library: Arc<L>,
    entries: Entries<L>,
}

impl<L: CoreLibrary> LibraryHandle<L> {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<L: CoreLibrary> Deref for LibraryHandle<L> {
    type Target = L;

    fn deref(&self) -> &L {
        &self.library
    }
}

impl<L: CoreLibrary> fmt::Debug for LibraryHandle<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LibraryHandle").field("name", &self.name).finish()
    }
}

impl<L: CoreLibrary> Drop for LibraryHandle<L> {
    fn drop(&mut self) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = entries.get_mut(&self.name) else {
            return;
        };
        entry.client_count -= 1;
        if entry.client_count > 0 {
            return;
        }
        if let Some(entry) = entries.remove(&self.name) {
            if let Err(error) = entry.library.deinit() {
                warn!(library = %self.name, %error, "OMX_Deinit failed");
            }
            info!(library = %self.name, "Released core library");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    static INITS: AtomicUsize = AtomicUsize::new(0);
    static DEINITS: AtomicUsize = AtomicUsize::new(0);

    struct CountingLibrary;

    impl CoreLibrary for CountingLibrary {
        fn load(name: &str) -> Result<Self> {
            if name == "missing.so" {
                return Err(Error::Config(format!("{name} not found")));
            }
            Ok(CountingLibrary)
        }

        fn init(&self) -> Result<()> {
            INITS.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn deinit(&self) -> Result<()> {
            DEINITS.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn init_on_first_client_and_deinit_on_last() {
        let registry = Registry::<CountingLibrary>::new();
        let inits = INITS.load(Ordering::SeqCst);
        let deinits = DEINITS.load(Ordering::SeqCst);

        let first = registry.request("libvendor.so").unwrap();
        let second = registry.request("libvendor.so").unwrap();
        assert_eq!(registry.client_count("libvendor.so"), 2);
        assert_eq!(INITS.load(Ordering::SeqCst), inits + 1);

        drop(first);
        assert_eq!(DEINITS.load(Ordering::SeqCst), deinits);
        drop(second);
        assert_eq!(DEINITS.load(Ordering::SeqCst), deinits + 1);
        assert_eq!(registry.client_count("libvendor.so"), 0);
    }

    #[test]
    fn failed_load_registers_nothing() {
        let registry = Registry::<CountingLibrary>::new();
        assert!(registry.request("missing.so").is_err());
        assert_eq!(registry.client_count("missing.so"), 0);
    }
}
