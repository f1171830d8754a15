//! Module use counting.
//!
//! A driver module must stay loaded while any of its channels exist. Each
//! live channel holds a [`ModuleUser`] token; the module can only be torn
//! down once the count returns to zero.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Use counter for one driver module.
#[derive(Debug, Default)]
pub struct ModuleUse {
    users: AtomicUsize,
}

impl ModuleUse {
    pub fn new() -> Arc<ModuleUse> {
        Arc::new(ModuleUse::default())
    }

    /// Take a use token. The count drops when the token is dropped.
    pub fn add_user(self: &Arc<Self>) -> ModuleUser {
        self.users.fetch_add(1, Ordering::SeqCst);
        ModuleUser {
            module: self.clone(),
        }
    }

    /// Number of outstanding tokens.
    pub fn users(&self) -> usize {
        self.users.load(Ordering::SeqCst)
    }
}

/// A single outstanding use of a module.
#[derive(Debug)]
pub struct ModuleUser {
    module: Arc<ModuleUse>,
}

impl Drop for ModuleUser {
    fn drop(&mut self) {
        self.module.users.fetch_sub(1, Ordering::SeqCst);
    }
}
