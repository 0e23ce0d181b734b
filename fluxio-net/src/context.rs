//! Per-connection type-erased user data bag.
//!
//! Based on `zest/net/tcp_connection.h`'s inner `Context` class: `Put<ValueType>`
//! refuses on key collision, `Get<ValueType>` returns null on a missing key or a type
//! mismatch, checked there by comparing `typeid(ValueType).name()` strings against a
//! stored tag. `Any::downcast_ref` replaces that manual tag comparison outright — it is
//! what the tag check was standing in for in C++.

use std::any::Any;
use std::collections::HashMap;

/// Insertion-keyed, type-erased per-connection storage. Values are dropped along with
/// the connection.
#[derive(Default)]
pub struct Context {
    values: HashMap<String, Box<dyn Any + Send>>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context").field("keys", &self.values.keys().collect::<Vec<_>>()).finish()
    }
}

impl Context {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `value` under `key`. Returns `false` without modifying anything if
    /// `key` is already occupied, mirroring the original's refusal on collision.
    pub fn put<T: Any + Send>(&mut self, key: impl Into<String>, value: T) -> bool {
        let key = key.into();
        if self.values.contains_key(&key) {
            return false;
        }
        self.values.insert(key, Box::new(value));
        true
    }

    /// Returns a typed reference for `key`, or `None` if the key is missing or holds a
    /// value of a different type.
    #[must_use]
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.values.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    #[must_use]
    pub fn get_mut<T: Any>(&mut self, key: &str) -> Option<&mut T> {
        self.values.get_mut(key).and_then(|v| v.downcast_mut::<T>())
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.values.remove(key).is_some()
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::Context;

    #[test]
    fn put_then_get_round_trips() {
        let mut ctx = Context::new();
        assert!(ctx.put("count", 42i32));
        assert_eq!(ctx.get::<i32>("count"), Some(&42));
    }

    #[test]
    fn put_refuses_on_collision() {
        let mut ctx = Context::new();
        assert!(ctx.put("k", 1i32));
        assert!(!ctx.put("k", 2i32));
        assert_eq!(ctx.get::<i32>("k"), Some(&1));
    }

    #[test]
    fn get_returns_none_on_type_mismatch_or_missing_key() {
        let mut ctx = Context::new();
        ctx.put("k", 1i32);
        assert_eq!(ctx.get::<String>("k"), None);
        assert_eq!(ctx.get::<i32>("missing"), None);
    }
}
