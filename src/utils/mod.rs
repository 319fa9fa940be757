//! Utility Module
//!
//! - [`interner`]: String interning for shader define names and values
//!
//! ```rust,ignore
//! use mirage::utils::interner;
//!
//! let a = interner::intern("HAS_NORMAL_MAP");
//! let b = interner::intern("HAS_NORMAL_MAP");
//! assert_eq!(a, b);
//! ```

pub mod interner;

pub use interner::Symbol;
