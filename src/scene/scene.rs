//! Scene Interface
//!
//! The renderer reads a scene once per frame and never mutates it. Shadow
//! and portal state that passes write back lives in `Cell`s on the lights.

use std::rc::Rc;

use super::light::Light;
use super::node::Renderable;
use super::portal::{Portal, PortalTree};
use crate::resources::texture::Texture;

pub trait Scene {
    fn portal_tree(&self) -> &PortalTree;

    /// The portal the viewer is standing in.
    fn active_portal(&self) -> &Portal {
        self.portal_tree().root()
    }

    /// Every light of every portal, in tree order.
    fn lights(&self) -> Vec<Rc<Light>> {
        let mut lights = Vec::new();
        self.portal_tree()
            .walk(&mut |portal, _| lights.extend(portal.lights.iter().cloned()));
        lights
    }

    /// Environment lighting the active portal.
    fn lighting_environment(&self) -> Option<Rc<Texture>> {
        self.active_portal().lighting_environment.clone()
    }

    /// Every renderable in the tree that casts shadows.
    fn shadow_casters(&self) -> Vec<&Renderable> {
        let mut casters = Vec::new();
        self.portal_tree().walk(&mut |portal, _| {
            casters.extend(portal.renderables().filter(|r| r.casts_shadow));
        });
        casters
    }
}

/// A scene that is a plain portal tree.
#[derive(Debug)]
pub struct BasicScene {
    tree: PortalTree,
    active: Vec<usize>,
}

impl BasicScene {
    #[must_use]
    pub fn new(root: Portal) -> Self {
        Self {
            tree: PortalTree::new(root),
            active: Vec::new(),
        }
    }

    /// Selects the active portal by child indices from the root. An invalid
    /// path keeps the current selection and returns `false`.
    pub fn set_active_portal(&mut self, path: Vec<usize>) -> bool {
        if self.tree.find(&path).is_none() {
            return false;
        }
        self.active = path;
        true
    }

    pub fn portal_tree_mut(&mut self) -> &mut PortalTree {
        &mut self.tree
    }
}

impl Scene for BasicScene {
    fn portal_tree(&self) -> &PortalTree {
        &self.tree
    }

    fn active_portal(&self) -> &Portal {
        self.tree.find(&self.active).unwrap_or(self.tree.root())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn test_lights_are_collected_from_every_portal() {
        let sun = Rc::new(Light::directional(Vec3::NEG_Y));
        let lamp = Rc::new(Light::omni(Vec3::ZERO));
        let scene = BasicScene::new(
            Portal::new("root")
                .with_light(sun.clone())
                .with_child(Portal::new("room").with_light(lamp.clone())),
        );
        let ids: Vec<u64> = scene.lights().iter().map(|l| l.id()).collect();
        assert_eq!(ids, vec![sun.id(), lamp.id()]);
    }

    #[test]
    fn test_active_portal_selection() {
        let mut scene = BasicScene::new(Portal::new("root").with_child(Portal::new("room")));
        assert_eq!(scene.active_portal().name, "root");
        assert!(scene.set_active_portal(vec![0]));
        assert_eq!(scene.active_portal().name, "room");
        assert!(!scene.set_active_portal(vec![3]));
        assert_eq!(scene.active_portal().name, "room");
    }
}
