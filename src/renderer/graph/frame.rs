//! Draw Ordering
//!
//! [`SortKey`] orders the draws of one portal level. Fields are compared in
//! declaration order, the same result a byte comparison of
//! [`SortKey::to_bytes`] gives:
//!
//! | Priority | Field             | Groups draws by                   |
//! |----------|-------------------|-----------------------------------|
//! | 1        | `rendering_order` | explicit material ordering        |
//! | 2        | `hierarchy_depth` | portal recursion level            |
//! | 3        | `hierarchy_id`    | portal within the level           |
//! | 4        | `shader`          | program, minimising rebinds       |
//! | 5        | `textures`        | texture set                       |
//! | 6        | `lights`          | lighting block                    |
//! | 7        | `material`        | material uniforms                 |
//! | 8        | `node`            | renderable                        |
//! | 9        | `element`         | element within the renderable     |

use std::rc::Rc;

use xxhash_rust::xxh3::xxh3_64;

use crate::errors::Result;
use crate::renderer::core::Driver;
use crate::renderer::graph::context::RenderContext;
use crate::renderer::pipeline::binding::resolve_program;
use crate::scene::light::Light;
use crate::scene::node::Renderable;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SortKey {
    pub rendering_order: u32,
    pub hierarchy_depth: u32,
    pub hierarchy_id: u32,
    pub shader: u32,
    pub textures: u32,
    pub lights: u32,
    pub material: u32,
    pub node: u64,
    pub element: u32,
}

const _: () = assert!(std::mem::size_of::<SortKey>() == SortKey::BYTES);

impl SortKey {
    pub const BYTES: usize = 40;

    /// Big-endian encoding in priority order; byte-wise comparison of two
    /// encodings agrees with [`Ord`].
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::BYTES] {
        let mut out = [0u8; Self::BYTES];
        let fields: [&[u8]; 9] = [
            &self.rendering_order.to_be_bytes(),
            &self.hierarchy_depth.to_be_bytes(),
            &self.hierarchy_id.to_be_bytes(),
            &self.shader.to_be_bytes(),
            &self.textures.to_be_bytes(),
            &self.lights.to_be_bytes(),
            &self.material.to_be_bytes(),
            &self.node.to_be_bytes(),
            &self.element.to_be_bytes(),
        ];
        let mut offset = 0;
        for field in fields {
            out[offset..offset + field.len()].copy_from_slice(field);
            offset += field.len();
        }
        out
    }

    /// The key of `renderable` drawn at portal level `hierarchy_depth`.
    /// Resolves (and caches) the material's program for the current lights.
    pub fn for_renderable(
        renderable: &Renderable,
        lights: &[Rc<Light>],
        hierarchy_depth: u32,
        hierarchy_id: u32,
        ctx: &RenderContext,
        driver: &mut dyn Driver,
    ) -> Result<Self> {
        let material = &renderable.material;
        let program = resolve_program(material, lights, ctx, driver)?;

        let texture_ids: Vec<u8> = material
            .textures()
            .flat_map(|t| t.id().to_le_bytes())
            .collect();
        let light_ids: Vec<u8> = lights.iter().flat_map(|l| l.id().to_le_bytes()).collect();

        Ok(Self {
            rendering_order: material.rendering_order,
            hierarchy_depth,
            hierarchy_id,
            shader: program.id() as u32,
            textures: xxh3_64(&texture_ids) as u32,
            lights: xxh3_64(&light_ids) as u32,
            material: material.id() as u32,
            node: renderable.id(),
            element: renderable.element_index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields_compare_in_priority_order() {
        let base = SortKey {
            rendering_order: 1,
            shader: 5,
            node: 10,
            ..Default::default()
        };

        let later_order = SortKey {
            rendering_order: 2,
            ..Default::default()
        };
        assert!(base < later_order, "rendering order dominates every other field");

        let other_shader = SortKey { shader: 4, node: 99, ..base };
        assert!(other_shader < base, "shader outranks node");

        let next_element = SortKey { element: 1, ..base };
        assert!(base < next_element);
    }

    #[test]
    fn test_byte_order_matches_ord() {
        let keys = [
            SortKey { rendering_order: 1, ..Default::default() },
            SortKey { hierarchy_depth: 300, ..Default::default() },
            SortKey { material: 7, node: u64::MAX, ..Default::default() },
            SortKey { node: 1 << 40, ..Default::default() },
            SortKey { element: 2, ..Default::default() },
        ];
        for a in &keys {
            for b in &keys {
                assert_eq!(a.cmp(b), a.to_bytes().cmp(&b.to_bytes()), "{a:?} vs {b:?}");
            }
        }
    }

    #[test]
    fn test_sorting_groups_by_shader() {
        let mut keys = vec![
            SortKey { shader: 2, node: 1, ..Default::default() },
            SortKey { shader: 1, node: 2, ..Default::default() },
            SortKey { shader: 2, node: 0, ..Default::default() },
        ];
        keys.sort();
        let order: Vec<(u32, u64)> = keys.iter().map(|k| (k.shader, k.node)).collect();
        assert_eq!(order, vec![(1, 2), (2, 0), (2, 1)]);
    }
}
