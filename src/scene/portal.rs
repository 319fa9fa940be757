//! Portal Tree
//!
//! A portal is a stencil-scoped region showing another space. The root
//! portal is the space the viewer stands in; every child is seen through its
//! `silhouette` and framed by its `frame` geometry.

use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::light::Light;
use super::node::Renderable;
use crate::resources::texture::Texture;

static NEXT_PORTAL_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
pub struct Portal {
    id: u64,
    pub name: String,
    /// Stencil mask shape; alpha-tested against its material's diffuse map.
    pub silhouette: Option<Renderable>,
    /// The visible doorway surface drawn around the opening.
    pub frame: Option<Renderable>,
    pub background: Option<Renderable>,
    pub content: Vec<Renderable>,
    pub lights: Vec<Rc<Light>>,
    pub children: Vec<Portal>,
    /// Distance from the viewer, used to order siblings front to back.
    pub distance: f32,
    /// Equirectangular or cube texture lighting this space.
    pub lighting_environment: Option<Rc<Texture>>,
}

impl Portal {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: NEXT_PORTAL_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            silhouette: None,
            frame: None,
            background: None,
            content: Vec::new(),
            lights: Vec::new(),
            children: Vec::new(),
            distance: 0.0,
            lighting_environment: None,
        }
    }

    #[must_use]
    pub fn with_silhouette(mut self, silhouette: Renderable) -> Self {
        self.silhouette = Some(silhouette);
        self
    }

    #[must_use]
    pub fn with_frame(mut self, frame: Renderable) -> Self {
        self.frame = Some(frame);
        self
    }

    #[must_use]
    pub fn with_background(mut self, background: Renderable) -> Self {
        self.background = Some(background);
        self
    }

    #[must_use]
    pub fn with_content(mut self, renderable: Renderable) -> Self {
        self.content.push(renderable);
        self
    }

    #[must_use]
    pub fn with_light(mut self, light: Rc<Light>) -> Self {
        self.lights.push(light);
        self
    }

    #[must_use]
    pub fn with_child(mut self, child: Portal) -> Self {
        self.children.push(child);
        self
    }

    #[must_use]
    pub fn with_distance(mut self, distance: f32) -> Self {
        self.distance = distance;
        self
    }

    #[must_use]
    pub fn with_lighting_environment(mut self, texture: Rc<Texture>) -> Self {
        self.lighting_environment = Some(texture);
        self
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Children ordered nearest first.
    #[must_use]
    pub fn children_front_to_back(&self) -> Vec<&Portal> {
        let mut children: Vec<&Portal> = self.children.iter().collect();
        children.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        children
    }

    /// Every renderable of this portal that draws into the color buffer.
    pub fn renderables(&self) -> impl Iterator<Item = &Renderable> {
        self.background
            .iter()
            .chain(self.content.iter())
            .chain(self.frame.iter())
    }
}

#[derive(Debug)]
pub struct PortalTree {
    root: Portal,
}

impl PortalTree {
    #[must_use]
    pub fn new(root: Portal) -> Self {
        Self { root }
    }

    #[inline]
    #[must_use]
    pub fn root(&self) -> &Portal {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Portal {
        &mut self.root
    }

    /// Depth-first pre-order visit with each portal's recursion level.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Portal, u32)) {
        fn recurse<'a>(portal: &'a Portal, level: u32, visit: &mut dyn FnMut(&'a Portal, u32)) {
            visit(portal, level);
            for child in &portal.children {
                recurse(child, level + 1, visit);
            }
        }
        recurse(&self.root, 0, visit);
    }

    /// Number of levels, 1 for a tree without children.
    #[must_use]
    pub fn depth(&self) -> u32 {
        let mut depth = 0;
        self.walk(&mut |_, level| depth = depth.max(level + 1));
        depth
    }

    /// The portal reached by following child indices from the root.
    #[must_use]
    pub fn find(&self, path: &[usize]) -> Option<&Portal> {
        path.iter()
            .try_fold(&self.root, |portal, &index| portal.children.get(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_children_sorted_front_to_back() {
        let root = Portal::new("root")
            .with_child(Portal::new("far").with_distance(9.0))
            .with_child(Portal::new("near").with_distance(1.0));
        let names: Vec<&str> = root
            .children_front_to_back()
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(names, ["near", "far"]);
    }

    #[test]
    fn test_walk_reports_levels() {
        let tree = PortalTree::new(
            Portal::new("root").with_child(Portal::new("a").with_child(Portal::new("a1"))),
        );
        let mut seen = Vec::new();
        tree.walk(&mut |portal, level| seen.push((portal.name.clone(), level)));
        assert_eq!(
            seen,
            vec![("root".to_string(), 0), ("a".to_string(), 1), ("a1".to_string(), 2)]
        );
        assert_eq!(tree.depth(), 3);
        assert_eq!(tree.find(&[0, 0]).map(|p| p.name.as_str()), Some("a1"));
        assert!(tree.find(&[1]).is_none());
    }
}
