//! Resource Data
//!
//! Host-side data the pipeline consumes, independent of any backend:
//! - [`Material`] and [`Texture`]
//! - [`ShaderDefines`]
//! - Bloom, tone mapping and post-process effect configuration

pub mod bloom;
pub mod material;
pub mod post_process;
pub mod shader_defines;
pub mod texture;
pub mod tone_mapping;

pub use bloom::BloomSettings;
pub use material::{Material, MaterialTextureSlot};
pub use post_process::PostProcessEffect;
pub use shader_defines::ShaderDefines;
pub use texture::{Texture, TextureContent};
pub use tone_mapping::{ToneMappingMethod, ToneMappingSettings};
