//! Lighting Uniform Blocks
//!
//! Lit programs read every active light from one uniform block bound at
//! `@group(0) @binding(1)`. Blocks are shared between all draws lit by the
//! same set of lights, so the cache is keyed by the light ids. Light
//! properties may change between frames while the set stays the same; each
//! entry therefore remembers the hash of the data it was written with, and a
//! mismatch replaces the entry instead of reusing stale contents.

use std::rc::Rc;

use bytemuck::{Pod, Zeroable};
use log::{debug, warn};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use xxhash_rust::xxh3::xxh3_64;

use crate::renderer::core::{BufferHandle, ContextRef, Driver, GpuResource};
use crate::scene::light::{Light, LightKind};

/// Lights beyond this count are ignored by surface programs.
pub const MAX_LIGHTS: usize = 8;

/// Frames an unused block survives before eviction.
pub const UBO_EVICTION_FRAMES: u64 = 60;

/// GPU layout of one light (`LightData` in `lighting_block.wgsl`).
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct LightData {
    /// rgb = color × intensity, w = kind
    pub color: [f32; 4],
    /// xyz = position, w = attenuation start
    pub position: [f32; 4],
    /// xyz = direction, w = attenuation end
    pub direction: [f32; 4],
    /// cos inner, cos outer, shadow layer (-1 = none), shadow bias
    pub params: [f32; 4],
    pub shadow_view_projection: [[f32; 4]; 4],
}

impl LightData {
    #[must_use]
    pub fn from_light(light: &Light) -> Self {
        let color = light.color * light.intensity;
        let kind = match light.kind() {
            LightKind::Ambient => 0.0,
            LightKind::Directional => 1.0,
            LightKind::Omni => 2.0,
            LightKind::Spot => 3.0,
        };
        let layer = light.shadow_map_index().map_or(-1.0, |i| i as f32);
        Self {
            color: [color.x, color.y, color.z, kind],
            position: [
                light.position.x,
                light.position.y,
                light.position.z,
                light.attenuation_start,
            ],
            direction: [
                light.direction.x,
                light.direction.y,
                light.direction.z,
                light.attenuation_end,
            ],
            params: [
                light.inner_angle.cos(),
                light.outer_angle.cos(),
                layer,
                light.shadow_bias,
            ],
            shadow_view_projection: light.shadow_view_projection().to_cols_array_2d(),
        }
    }
}

/// GPU layout of the whole block (`LightingBlock` in `lighting_block.wgsl`).
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct LightingBlock {
    pub ambient: [f32; 4],
    /// x = number of lights in use
    pub counts: [u32; 4],
    pub lights: [LightData; MAX_LIGHTS],
}

impl LightingBlock {
    /// Packs `lights`. Ambient lights are summed into `ambient`.
    #[must_use]
    pub fn from_lights(lights: &[Rc<Light>]) -> Self {
        let mut block = Self::zeroed();
        let mut count = 0usize;
        for light in lights {
            if light.kind() == LightKind::Ambient {
                let c = light.color * light.intensity;
                block.ambient[0] += c.x;
                block.ambient[1] += c.y;
                block.ambient[2] += c.z;
                continue;
            }
            if count == MAX_LIGHTS {
                warn!("More than {MAX_LIGHTS} lights; light {} ignored", light.id());
                continue;
            }
            block.lights[count] = LightData::from_light(light);
            count += 1;
        }
        block.ambient[3] = 1.0;
        block.counts[0] = count as u32;
        block
    }

    #[must_use]
    pub fn content_hash(&self) -> u64 {
        xxh3_64(bytemuck::bytes_of(self))
    }
}

#[derive(Debug)]
struct UboEntry {
    buffer: BufferHandle,
    context: ContextRef,
    hash: u64,
    last_used: u64,
}

impl UboEntry {
    fn release(&self) {
        self.context.release(GpuResource::Buffer(self.buffer));
    }
}

type LightSetKey = SmallVec<[u64; MAX_LIGHTS]>;

/// Shared lighting blocks keyed by light set.
#[derive(Debug, Default)]
pub struct LightingUboCache {
    entries: FxHashMap<LightSetKey, UboEntry>,
    created: u64,
}

impl LightingUboCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the block for `lights`, creating or replacing it when no
    /// matching entry exists.
    pub fn bind(&mut self, lights: &[Rc<Light>], driver: &mut dyn Driver, frame: u64) -> BufferHandle {
        let key: LightSetKey = lights.iter().map(|l| l.id()).collect();
        let block = LightingBlock::from_lights(lights);
        let hash = block.content_hash();

        if let Some(entry) = self.entries.get_mut(&key) {
            if entry.hash == hash && entry.context.is_valid() {
                entry.last_used = frame;
                return entry.buffer;
            }
            debug!("Lighting block for {key:?} is stale, replacing");
            entry.release();
        }

        let bytes = bytemuck::bytes_of(&block);
        let buffer = driver.new_uniform_buffer(bytes.len() as u64);
        driver.write_uniform_buffer(buffer, bytes);
        self.created += 1;
        self.entries.insert(
            key,
            UboEntry {
                buffer,
                context: driver.context().downgrade(),
                hash,
                last_used: frame,
            },
        );
        buffer
    }

    /// Drops blocks not used during the last [`UBO_EVICTION_FRAMES`] frames.
    pub fn evict_unused(&mut self, frame: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            let keep = entry.last_used + UBO_EVICTION_FRAMES >= frame;
            if !keep {
                entry.release();
            }
            keep
        });
        before - self.entries.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of blocks written since creation.
    #[must_use]
    pub fn created(&self) -> u64 {
        self.created
    }

    pub fn clear(&mut self) {
        for entry in self.entries.values() {
            entry.release();
        }
        self.entries.clear();
    }
}

impl Drop for LightingUboCache {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::core::HeadlessDriver;
    use glam::Vec3;

    #[test]
    fn test_block_layout_matches_wgsl() {
        assert_eq!(std::mem::size_of::<LightData>(), 128);
        assert_eq!(std::mem::size_of::<LightingBlock>(), 32 + MAX_LIGHTS * 128);
    }

    #[test]
    fn test_ambient_is_accumulated() {
        let lights = vec![
            Rc::new(Light::ambient(Vec3::new(0.1, 0.2, 0.3))),
            Rc::new(Light::directional(Vec3::NEG_Y)),
        ];
        let block = LightingBlock::from_lights(&lights);
        assert_eq!(block.counts[0], 1);
        assert!((block.ambient[2] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_same_lights_share_a_block() {
        let mut driver = HeadlessDriver::new(4, 4).unwrap();
        let mut cache = LightingUboCache::new();
        let lights = vec![Rc::new(Light::directional(Vec3::NEG_Y))];

        let a = cache.bind(&lights, &mut driver, 1);
        let b = cache.bind(&lights, &mut driver, 2);
        assert_eq!(a, b);
        assert_eq!(cache.created(), 1);
    }

    #[test]
    fn test_changed_contents_replace_the_entry() {
        let mut driver = HeadlessDriver::new(4, 4).unwrap();
        let mut cache = LightingUboCache::new();
        let light = Rc::new(Light::directional(Vec3::NEG_Y));
        cache.bind(&[light.clone()], &mut driver, 1);

        light.set_shadow_map_index(Some(0));
        cache.bind(&[light], &mut driver, 2);
        assert_eq!(cache.created(), 2, "hash mismatch must create a new block");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_unused_entries_are_evicted() {
        let mut driver = HeadlessDriver::new(4, 4).unwrap();
        let mut cache = LightingUboCache::new();
        cache.bind(&[Rc::new(Light::directional(Vec3::NEG_Y))], &mut driver, 1);

        assert_eq!(cache.evict_unused(1 + UBO_EVICTION_FRAMES), 0);
        assert_eq!(cache.evict_unused(2 + UBO_EVICTION_FRAMES), 1);
        assert!(cache.is_empty());
    }
}
