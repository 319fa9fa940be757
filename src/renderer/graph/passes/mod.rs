//! Render Pass Implementations
//!
//! Concrete passes of the frame: scene rasterization through the portal
//! tree, shadow maps, the IBL convolution chain, bloom blur, tone mapping and
//! the user effect chain.

pub mod gaussian_blur;
pub mod ibl;
pub mod portal_tree;
pub mod post_process;
pub mod shadow;
pub mod tone_mapping;

pub use gaussian_blur::{GaussianBlurRenderPass, GaussianKernel};
pub use ibl::{BrdfRenderPass, EquirectangularToCubeRenderPass, IrradianceRenderPass, PrefilterRenderPass};
pub use portal_tree::PortalTreeRenderPass;
pub use post_process::PostProcessEffectFactory;
pub use shadow::ShadowMapRenderPass;
pub use tone_mapping::ToneMappingRenderPass;
