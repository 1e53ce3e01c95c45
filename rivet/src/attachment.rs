use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

type Slot = Arc<dyn Any + Send + Sync>;

/// Named slots for handler-private bookkeeping on a context or pipeline.
///
/// The pipeline never inspects or cleans up what is stored here.
#[derive(Default)]
pub struct Attachments {
    slots: Mutex<HashMap<String, Slot>>,
}

impl Attachments {
    /// Stores `value` under `key`, returning whatever was there before.
    pub fn set<T: Any + Send + Sync>(&self, key: &str, value: T) -> Option<Slot> {
        self.slots.lock().insert(key.to_owned(), Arc::new(value))
    }

    /// The value under `key`, if present and of type `T`.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let slot = self.slots.lock().get(key).cloned()?;
        slot.downcast::<T>().ok()
    }

    pub fn remove(&self, key: &str) -> Option<Slot> {
        self.slots.lock().remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.slots.lock().contains_key(key)
    }
}

impl std::fmt::Debug for Attachments {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.slots.lock().keys()).finish()
    }
}
