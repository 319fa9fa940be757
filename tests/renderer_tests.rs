//! Renderer Tests
//!
//! Tests for:
//! - Frame sequence bracketing and listener order
//! - Preprocess results visible through the renderer
//! - Recovery after a lost GPU context
//! - Settings loaded from JSON

use std::cell::RefCell;
use std::rc::Rc;

use glam::Vec3;

use mirage::preprocess::IblPhase;
use mirage::renderer::core::{DriverCommand, GeometryData, TextureKind};
use mirage::renderer::pipeline::LightingModel;
use mirage::resources::TextureContent;
use mirage::scene::Geometry;
use mirage::{
    BasicScene, Camera, FrameListener, HeadlessDriver, Light, Material, MirageError, Portal,
    RenderContext, Renderable, Renderer, RendererSettings, Texture,
};

const WALL_TAG: u32 = 3;

fn wall(model: LightingModel) -> Renderable {
    Renderable::new(
        "wall",
        Rc::new(Geometry::new(GeometryData::default())),
        Rc::new(Material::new(model)),
    )
    .with_tag(WALL_TAG)
}

#[derive(Default)]
struct Recorder {
    events: Vec<(&'static str, u64)>,
}

impl FrameListener for Recorder {
    fn on_frame_will_render(&mut self, ctx: &RenderContext) {
        self.events.push(("will", ctx.frame()));
    }

    fn on_frame_did_render(&mut self, ctx: &RenderContext) {
        self.events.push(("did", ctx.frame()));
    }
}

// ============================================================================
// Frame Sequence
// ============================================================================

#[test]
fn frame_is_bracketed_by_begin_and_end() {
    let mut driver = HeadlessDriver::new(32, 32).unwrap();
    let mut renderer = Renderer::new(&RendererSettings::default(), &driver).unwrap();
    let scene = BasicScene::new(Portal::new("root").with_content(wall(LightingModel::Constant)));

    renderer
        .render_frame(&scene, None, Camera::default(), &mut driver)
        .unwrap();

    assert_eq!(renderer.frame(), 1);
    assert_eq!(driver.commands().first(), Some(&DriverCommand::BeginFrame(1)));
    assert_eq!(driver.commands().last(), Some(&DriverCommand::EndFrame));
    assert_eq!(driver.draws().last().unwrap().target_label, "display");
}

#[test]
fn listeners_observe_every_frame_in_order() {
    let mut driver = HeadlessDriver::new(32, 32).unwrap();
    let mut renderer = Renderer::new(&RendererSettings::default(), &driver).unwrap();
    let recorder = Rc::new(RefCell::new(Recorder::default()));
    renderer.add_listener(recorder.clone());
    let scene = BasicScene::new(Portal::new("root"));

    for _ in 0..2 {
        renderer
            .render_frame(&scene, None, Camera::default(), &mut driver)
            .unwrap();
    }

    assert_eq!(
        recorder.borrow().events,
        vec![("will", 1), ("did", 1), ("will", 2), ("did", 2)]
    );
}

#[test]
fn removed_listener_is_not_called() {
    let mut driver = HeadlessDriver::new(32, 32).unwrap();
    let mut renderer = Renderer::new(&RendererSettings::default(), &driver).unwrap();
    let recorder = Rc::new(RefCell::new(Recorder::default()));
    let listener: Rc<RefCell<dyn FrameListener>> = recorder.clone();
    renderer.add_listener(listener.clone());
    renderer.remove_listener(&listener);

    renderer
        .render_frame(&BasicScene::new(Portal::new("root")), None, Camera::default(), &mut driver)
        .unwrap();

    assert!(recorder.borrow().events.is_empty());
}

// ============================================================================
// Preprocessing
// ============================================================================

#[test]
fn lighting_maps_publish_after_four_frames() {
    let mut driver = HeadlessDriver::new(32, 32).unwrap();
    let mut renderer = Renderer::new(&RendererSettings::default(), &driver).unwrap();
    let sky = Rc::new(Texture::new("sky", TextureKind::Texture2D, TextureContent::Image));
    let scene = BasicScene::new(
        Portal::new("root")
            .with_lighting_environment(sky)
            .with_content(wall(LightingModel::PhysicallyBased)),
    );

    for _ in 0..4 {
        renderer
            .render_frame(&scene, None, Camera::default(), &mut driver)
            .unwrap();
    }

    assert_eq!(renderer.ibl().phase(), IblPhase::Idle);
    assert_eq!(renderer.ibl().brdf_computations(), 1);
    assert!(renderer.context().irradiance_map().is_some());
}

#[test]
fn shadow_casters_get_a_layer() {
    let mut driver = HeadlessDriver::new(32, 32).unwrap();
    let mut renderer = Renderer::new(&RendererSettings::default(), &driver).unwrap();
    let sun = Rc::new(Light::directional(Vec3::new(0.0, -1.0, -1.0)).with_shadows(1024));
    let scene = BasicScene::new(
        Portal::new("root")
            .with_light(sun.clone())
            .with_content(wall(LightingModel::Blinn)),
    );

    renderer
        .render_frame(&scene, None, Camera::default(), &mut driver)
        .unwrap();

    assert_eq!(sun.shadow_map_index(), Some(0));
    assert!(renderer.shadows().target().is_some());
    assert!(renderer.context().shadow_map().is_some());
}

#[test]
fn invalid_shadow_caster_aborts_the_frame() {
    let mut driver = HeadlessDriver::new(32, 32).unwrap();
    let mut renderer = Renderer::new(&RendererSettings::default(), &driver).unwrap();
    let bulb = Rc::new(Light::omni(Vec3::Y).with_shadows(512));
    let scene = BasicScene::new(Portal::new("root").with_light(bulb));

    let result = renderer.render_frame(&scene, None, Camera::default(), &mut driver);

    assert!(matches!(result, Err(MirageError::InvariantViolation(_))));
    assert!(driver.draws().is_empty(), "the aborted frame draws nothing");
    assert_eq!(
        driver.commands().last(),
        Some(&DriverCommand::EndFrame),
        "the driver frame is closed even when the frame aborts"
    );
}

#[test]
fn unallocatable_lighting_maps_do_not_block_the_display() {
    let mut driver = HeadlessDriver::new(32, 32).unwrap();
    driver.set_max_render_target_size(Some(256));
    let mut renderer = Renderer::new(&RendererSettings::default(), &driver).unwrap();
    let sky = Rc::new(Texture::new("sky", TextureKind::Texture2D, TextureContent::Image));
    let scene = BasicScene::new(
        Portal::new("root")
            .with_lighting_environment(sky)
            .with_content(wall(LightingModel::PhysicallyBased)),
    );

    for frame in 1..=5 {
        driver.clear_log();
        renderer
            .render_frame(&scene, None, Camera::default(), &mut driver)
            .unwrap_or_else(|e| panic!("frame {frame} failed: {e}"));
        assert!(driver.draws().iter().any(|d| d.tag == WALL_TAG));
        assert_eq!(driver.draws().last().unwrap().target_label, "display");
        assert_eq!(driver.commands().last(), Some(&DriverCommand::EndFrame));
    }
    assert_eq!(renderer.ibl().phase(), IblPhase::Idle);
    assert!(renderer.context().irradiance_map().is_none());
}

// ============================================================================
// Context Loss
// ============================================================================

#[test]
fn renders_again_after_context_loss() {
    let mut driver = HeadlessDriver::new(32, 32).unwrap();
    let mut renderer = Renderer::new(&RendererSettings::default(), &driver).unwrap();
    let scene = BasicScene::new(Portal::new("root").with_content(wall(LightingModel::Blinn)));

    renderer
        .render_frame(&scene, None, Camera::default(), &mut driver)
        .unwrap();
    driver.lose_context();
    driver.clear_log();
    renderer
        .render_frame(&scene, None, Camera::default(), &mut driver)
        .unwrap();

    assert!(driver.draws().iter().any(|d| d.tag == WALL_TAG));
    assert_eq!(driver.draws().last().unwrap().target_label, "display");
    assert!(driver.live_render_targets() > 1, "pipeline targets are recreated");
}

#[test]
fn dropped_targets_are_collected_next_frame() {
    let mut driver = HeadlessDriver::new(32, 32).unwrap();
    let mut renderer = Renderer::new(&RendererSettings::default(), &driver).unwrap();
    let scene = BasicScene::new(Portal::new("root"));

    renderer
        .render_frame(&scene, None, Camera::default(), &mut driver)
        .unwrap();
    let allocated = driver.live_render_targets();

    renderer.set_viewport_size(16, 16);
    renderer
        .render_frame(&scene, None, Camera::default(), &mut driver)
        .unwrap();
    renderer
        .render_frame(&scene, None, Camera::default(), &mut driver)
        .unwrap();

    assert_eq!(
        driver.live_render_targets(),
        allocated,
        "replaced targets are released, not leaked"
    );
}

// ============================================================================
// Settings
// ============================================================================

#[test]
fn settings_from_json_drive_the_pipeline() {
    let settings = RendererSettings::from_json_str(r#"{ "hdr_enabled": false, "bloom_enabled": false }"#).unwrap();
    assert!(settings.shadows_enabled, "missing fields take defaults");

    let mut driver = HeadlessDriver::new(32, 32).unwrap();
    let mut renderer = Renderer::new(&settings, &driver).unwrap();
    let scene = BasicScene::new(Portal::new("root").with_content(wall(LightingModel::Constant)));
    renderer
        .render_frame(&scene, None, Camera::default(), &mut driver)
        .unwrap();

    assert!(driver.draws().iter().all(|d| d.target_label == "display"));
}

#[test]
fn malformed_settings_are_rejected() {
    assert!(RendererSettings::from_json_str("{ \"hdr_enabled\": 3 }").is_err());
}
