//! Shader Define Sets
//!
//! Capability keys are lowered into a [`ShaderDefines`] set before template
//! rendering. Keys and values are interned [`Symbol`]s kept sorted by symbol
//! id, so two sets with the same content compare and hash identically no
//! matter the insertion order.

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use xxhash_rust::xxh3::Xxh3;

use crate::utils::interner::{self, Symbol};

/// Sorted collection of `NAME = value` shader defines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderDefines {
    defines: Vec<(Symbol, Symbol)>,
}

impl ShaderDefines {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key` to `value`, replacing any previous value.
    pub fn set(&mut self, key: &str, value: &str) {
        self.set_symbol(interner::intern(key), interner::intern(value));
    }

    /// Sets `key` to `"1"`. Templates test flags with `{$ if KEY $}`.
    pub fn enable(&mut self, key: &str) {
        self.set(key, "1");
    }

    /// Enables `key` only when `condition` holds.
    pub fn enable_if(&mut self, key: &str, condition: bool) {
        if condition {
            self.enable(key);
        }
    }

    #[inline]
    pub fn set_symbol(&mut self, key: Symbol, value: Symbol) {
        match self.defines.binary_search_by_key(&key, |&(k, _)| k) {
            Ok(idx) => self.defines[idx].1 = value,
            Err(idx) => self.defines.insert(idx, (key, value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> bool {
        let Some(key) = interner::get(key) else {
            return false;
        };
        match self.defines.binary_search_by_key(&key, |&(k, _)| k) {
            Ok(idx) => {
                self.defines.remove(idx);
                true
            }
            Err(_) => false,
        }
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        interner::get(key).is_some_and(|key| {
            self.defines.binary_search_by_key(&key, |&(k, _)| k).is_ok()
        })
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        let key = interner::get(key)?;
        self.defines
            .binary_search_by_key(&key, |&(k, _)| k)
            .ok()
            .map(|idx| interner::resolve(self.defines[idx].1).to_string())
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.defines.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.defines.is_empty()
    }

    /// Overlays `other` onto `self`; values from `other` win.
    pub fn merge(&mut self, other: &ShaderDefines) {
        for &(key, value) in &other.defines {
            self.set_symbol(key, value);
        }
    }

    /// Resolved string map, the form consumed by the template engine.
    #[must_use]
    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.defines
            .iter()
            .map(|&(k, v)| {
                (
                    interner::resolve(k).to_string(),
                    interner::resolve(v).to_string(),
                )
            })
            .collect()
    }

    /// Content hash over the resolved strings.
    ///
    /// Hashes strings rather than symbols so the value is stable across
    /// processes with different interning order.
    #[must_use]
    pub fn content_hash(&self) -> u64 {
        let mut hasher = Xxh3::new();
        for (key, value) in self.to_map() {
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(b";");
        }
        hasher.digest()
    }
}

impl Hash for ShaderDefines {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.defines.hash(state);
    }
}

impl From<&[(&str, &str)]> for ShaderDefines {
    fn from(defines: &[(&str, &str)]) -> Self {
        let mut result = Self::new();
        for (k, v) in defines {
            result.set(k, v);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_and_flags() {
        let mut defines = ShaderDefines::new();
        defines.set("LIGHTING_MODEL", "BLINN");
        defines.enable("HAS_NORMAL_MAP");
        defines.enable_if("HAS_AO_MAP", false);

        assert_eq!(defines.get("LIGHTING_MODEL"), Some("BLINN".to_string()));
        assert!(defines.contains("HAS_NORMAL_MAP"));
        assert!(!defines.contains("HAS_AO_MAP"));
        assert_eq!(defines.len(), 2);
    }

    #[test]
    fn test_insertion_order_does_not_matter() {
        let a = ShaderDefines::from(&[("X_ONE", "1"), ("X_TWO", "2")][..]);
        let b = ShaderDefines::from(&[("X_TWO", "2"), ("X_ONE", "1")][..]);

        assert_eq!(a, b);
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn test_merge_overrides() {
        let mut base = ShaderDefines::from(&[("A", "1"), ("B", "2")][..]);
        let overlay = ShaderDefines::from(&[("B", "3"), ("C", "4")][..]);
        base.merge(&overlay);

        assert_eq!(base.get("B"), Some("3".to_string()));
        assert_eq!(base.get("C"), Some("4".to_string()));
        assert!(base.remove("A"));
        assert!(!base.remove("A"));
    }
}
