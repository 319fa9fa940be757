//! Global String Interner
//!
//! Converts shader define names and values into integer [`Symbol`]s so that
//! define sets can be compared and hashed without touching string data.

use std::sync::LazyLock;

use lasso::{Spur, ThreadedRodeo};

static INTERNER: LazyLock<ThreadedRodeo> = LazyLock::new(ThreadedRodeo::new);

/// Compact integer identifier of an interned string.
pub type Symbol = Spur;

/// Interns a string, returning its existing symbol when already present.
#[inline]
pub fn intern(s: &str) -> Symbol {
    INTERNER.get_or_intern(s)
}

/// Looks up the symbol of an already interned string without allocating.
#[inline]
pub fn get(s: &str) -> Option<Symbol> {
    INTERNER.get(s)
}

/// Resolves a symbol back to its string.
#[inline]
pub fn resolve(sym: Symbol) -> &'static str {
    INTERNER.resolve(&sym)
}

/// Interns the define names the built-in templates test, so the first
/// program of a session resolves them with lookups only.
pub fn preload_shader_defines() {
    const TEMPLATE_DEFINES: &[&str] = &[
        "LIGHTING_MODEL",
        "DIFFUSE_TEXTURE",
        "USE_LIGHTING",
        "HDR",
        "BLOOM_OUTPUT",
        "TONE_MAPPING_MASK",
        "MASK_LOCATION",
        "TONE_MAPPING_METHOD",
        "USE_MASK",
        "HORIZONTAL",
        "TAP_COUNT",
        "EFFECT",
        "1",
    ];
    for name in TEMPLATE_DEFINES {
        intern(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_and_resolve() {
        let s1 = intern("hello");
        let s2 = intern("hello");
        let s3 = intern("world");

        assert_eq!(s1, s2);
        assert_ne!(s1, s3);

        assert_eq!(resolve(s1), "hello");
        assert_eq!(resolve(s3), "world");
    }

    #[test]
    fn test_preload_makes_template_defines_resolvable() {
        preload_shader_defines();
        assert!(get("TONE_MAPPING_MASK").is_some());
        assert!(get("BLOOM_OUTPUT").is_some());
    }

    #[test]
    fn test_get() {
        let _ = intern("existing");

        assert!(get("existing").is_some());
        assert!(get("never_interned_name").is_none());
    }
}
