use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

/// Typed identifier of a value in [`Properties`].
///
/// Declare keys as constants next to the behavior that owns them:
///
/// ```
/// use apikit::PropertyKey;
/// use std::time::Instant;
///
/// const STARTED_AT: PropertyKey<Instant> = PropertyKey::new("timing.started_at");
/// ```
pub struct PropertyKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> PropertyKey<T> {
    /// Create a key with a stable name.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    /// The key name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for PropertyKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for PropertyKey<T> {}

impl<T> fmt::Debug for PropertyKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PropertyKey").field(&self.name).finish()
    }
}

/// Per-call property bag shared by the behaviors of one invocation.
///
/// Entries are addressed by `(value type, key name)`, so two behaviors using
/// the same name for different types never observe each other's values.
#[derive(Default)]
pub struct Properties {
    entries: HashMap<(TypeId, &'static str), Box<dyn Any + Send + Sync>>,
}

impl Properties {
    /// Create an empty bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value, returning the previous one for the key.
    pub fn insert<T: Send + Sync + 'static>(&mut self, key: PropertyKey<T>, value: T) -> Option<T> {
        self.entries
            .insert((TypeId::of::<T>(), key.name), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    /// Borrow a value.
    #[must_use]
    pub fn get<T: Send + Sync + 'static>(&self, key: PropertyKey<T>) -> Option<&T> {
        self.entries
            .get(&(TypeId::of::<T>(), key.name))
            .and_then(|value| value.downcast_ref::<T>())
    }

    /// Mutably borrow a value.
    pub fn get_mut<T: Send + Sync + 'static>(&mut self, key: PropertyKey<T>) -> Option<&mut T> {
        self.entries
            .get_mut(&(TypeId::of::<T>(), key.name))
            .and_then(|value| value.downcast_mut::<T>())
    }

    /// Remove and return a value.
    pub fn remove<T: Send + Sync + 'static>(&mut self, key: PropertyKey<T>) -> Option<T> {
        self.entries
            .remove(&(TypeId::of::<T>(), key.name))
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }

    /// Whether a value is stored for the key.
    #[must_use]
    pub fn contains<T: Send + Sync + 'static>(&self, key: PropertyKey<T>) -> bool {
        self.entries.contains_key(&(TypeId::of::<T>(), key.name))
    }

    /// Number of stored values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the bag is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for Properties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set()
            .entries(self.entries.keys().map(|(_, name)| name))
            .finish()
    }
}
