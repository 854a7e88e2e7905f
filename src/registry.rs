//! Process-wide default store for code that cannot have one passed in.
//!
//! Nothing here creates a store: the owner installs one with [`set_default`]
//! at startup and removes it with [`clear_default`] at shutdown.

use std::sync::{Arc, RwLock};

use crate::error::{Result, StoreError};
use crate::store::KvStore;

static DEFAULT_STORE: RwLock<Option<Arc<dyn KvStore>>> = RwLock::new(None);

/// Installs `store` as the default, returning the one it replaced
pub fn set_default(store: Arc<dyn KvStore>) -> Option<Arc<dyn KvStore>> {
    match DEFAULT_STORE.write() {
        Ok(mut slot) => slot.replace(store),
        Err(poisoned) => poisoned.into_inner().replace(store),
    }
}

pub fn get_default() -> Result<Arc<dyn KvStore>> {
    let slot = DEFAULT_STORE
        .read()
        .map_err(|_| StoreError::Internal("default store lock poisoned".to_string()))?;
    slot.clone().ok_or_else(|| {
        StoreError::Configuration(
            "no default store has been set; call registry::set_default first".to_string(),
        )
    })
}

pub fn has_default() -> bool {
    DEFAULT_STORE.read().map(|slot| slot.is_some()).unwrap_or(false)
}

pub fn clear_default() -> Option<Arc<dyn KvStore>> {
    match DEFAULT_STORE.write() {
        Ok(mut slot) => slot.take(),
        Err(poisoned) => poisoned.into_inner().take(),
    }
}
