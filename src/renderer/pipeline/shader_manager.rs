//! Shader Template Environment
//!
//! WGSL programs are rendered from minijinja templates embedded with
//! `rust-embed`. The syntax is adjusted so it does not collide with WGSL:
//!
//! | Construct        | Syntax              |
//! |------------------|---------------------|
//! | Block statement  | `{$ if HDR $}`      |
//! | Variable         | `{{ binding_code }}`|
//! | Line statement   | `$$ if HDR`         |
//!
//! Includes resolve relative to `chunks/`, so `{$ include "lighting_block" $}`
//! loads `chunks/lighting_block.wgsl`.

use std::borrow::Cow;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use minijinja::value::{Object, Value};
use minijinja::{Environment, Error, ErrorKind, syntax::SyntaxConfig};
use rust_embed::RustEmbed;
use serde::Serialize;

use crate::errors::Result;

#[derive(RustEmbed)]
#[folder = "src/renderer/pipeline/shaders"]
struct ShaderAssets;

/// Builds the template environment. One environment is owned by each
/// [`ShaderFactory`](super::factory::ShaderFactory).
pub fn build_env() -> Result<Environment<'static>> {
    let mut env = Environment::new();

    let syntax = SyntaxConfig::builder()
        .block_delimiters("{$", "$}")
        .variable_delimiters("{{", "}}")
        .line_statement_prefix("$$")
        .build()?;

    env.set_syntax(syntax);
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env.set_undefined_behavior(minijinja::UndefinedBehavior::SemiStrict);

    env.set_loader(shader_loader);

    env.set_path_join_callback(|name, _parent| format!("chunks/{name}").into());

    Ok(env)
}

fn shader_loader(name: &str) -> std::result::Result<Option<String>, Error> {
    let filename = if std::path::Path::new(name)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("wgsl"))
    {
        Cow::Borrowed(name)
    } else {
        Cow::Owned(format!("{name}.wgsl"))
    };

    #[cfg(debug_assertions)]
    {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("src/renderer/pipeline/shaders")
            .join(filename.as_ref());
        if path.exists() {
            return std::fs::read_to_string(&path).map(Some).map_err(|e| {
                Error::new(
                    ErrorKind::TemplateNotFound,
                    format!("Failed to read {}: {e}", path.display()),
                )
            });
        }
    }

    if let Some(file) = ShaderAssets::get(&filename)
        && let Ok(source) = std::str::from_utf8(file.data.as_ref())
    {
        return Ok(Some(source.to_string()));
    }

    Ok(None)
}

/// Hands out consecutive `@location` indices to a template (`loc.next()`).
#[derive(Debug, Serialize)]
pub struct LocationAllocator {
    #[serde(skip)]
    counter: AtomicU32,
}

impl Default for LocationAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl LocationAllocator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            counter: AtomicU32::new(0),
        }
    }

    pub fn next(&self) -> u32 {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }
}

impl Object for LocationAllocator {
    fn call_method(
        self: &Arc<Self>,
        _state: &minijinja::State,
        name: &str,
        _args: &[Value],
    ) -> std::result::Result<Value, Error> {
        if name == "next" {
            Ok(Value::from(self.next()))
        } else {
            Err(Error::new(
                ErrorKind::UnknownMethod,
                format!("method {name} not found"),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_templates_resolve() {
        let env = build_env().unwrap();
        for name in ["surface", "blit", "gaussian_blur", "tone_mapping", "brdf_lut"] {
            assert!(env.get_template(name).is_ok(), "template {name} should load");
        }
    }

    #[test]
    fn test_location_allocator_counts_up() {
        let allocator = LocationAllocator::new();
        assert_eq!(allocator.next(), 0);
        assert_eq!(allocator.next(), 1);
    }
}
