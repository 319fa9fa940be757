//! Scene Model
//!
//! The part of the scene the render pipeline consumes:
//! - Portal tree with renderables and lights per portal
//! - Camera of the eye being rendered
//! - The read-only [`Scene`] interface

pub mod camera;
pub mod light;
pub mod node;
pub mod portal;
pub mod scene;

pub use camera::Camera;
pub use light::{Light, LightKind};
pub use node::{Geometry, Renderable};
pub use portal::{Portal, PortalTree};
pub use scene::{BasicScene, Scene};
