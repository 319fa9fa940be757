//! Preprocess Tests
//!
//! Tests for:
//! - Image-based lighting stage machine (one stage per frame)
//! - BRDF LUT computed once per context
//! - Shadow array allocation, halving and the session ceiling
//! - Shadow caster validation
//! - Shadow map binding only for receiving materials

use std::rc::Rc;

use glam::Vec3;

use mirage::preprocess::IblPhase;
use mirage::renderer::core::{DriverCommand, GeometryData, TextureKind};
use mirage::renderer::graph::passes::PortalTreeRenderPass;
use mirage::renderer::graph::{Channel, run_pass};
use mirage::renderer::pipeline::LightingModel;
use mirage::renderer::settings::{IblSettings, ShadowSettings};
use mirage::resources::TextureContent;
use mirage::scene::Geometry;
use mirage::{
    BasicScene, Camera, Driver, HeadlessDriver, IblPreprocess, Light, Material, MirageError,
    Portal, Preprocess, RenderContext, RenderPassIo, Renderable, ShadowPreprocess, Texture,
};

fn context() -> RenderContext {
    let mut ctx = RenderContext::new();
    ctx.begin_frame(1, Camera::default());
    ctx.set_shadows_enabled(true);
    ctx
}

fn environment(label: &str, kind: TextureKind) -> Rc<Texture> {
    Rc::new(Texture::new(label, kind, TextureContent::Image))
}

fn lit_scene(environment: Rc<Texture>) -> BasicScene {
    BasicScene::new(Portal::new("root").with_lighting_environment(environment))
}

fn allocated_labels(driver: &HeadlessDriver) -> Vec<String> {
    driver
        .commands()
        .iter()
        .filter_map(|c| match c {
            DriverCommand::NewRenderTarget { label, .. } => Some(label.clone()),
            _ => None,
        })
        .collect()
}

fn caster() -> Renderable {
    Renderable::new(
        "crate",
        Rc::new(Geometry::new(GeometryData::default())),
        Rc::new(Material::new(LightingModel::Blinn)),
    )
}

// ============================================================================
// Image-Based Lighting
// ============================================================================

#[test]
fn ibl_reaches_idle_after_four_frames() {
    let mut driver = HeadlessDriver::new(8, 8).unwrap();
    let mut ctx = context();
    let mut ibl = IblPreprocess::new(IblSettings::default());
    let scene = lit_scene(environment("sky", TextureKind::Texture2D));

    let expected = [
        IblPhase::IrradianceConvolution,
        IblPhase::PrefilterConvolution,
        IblPhase::BrdfConvolution,
        IblPhase::Idle,
    ];
    for (frame, phase) in expected.into_iter().enumerate() {
        assert!(ctx.brdf_map().is_none(), "maps published early at frame {frame}");
        ibl.execute(&scene, &mut ctx, &mut driver).unwrap();
        assert_eq!(ibl.phase(), phase, "after execute #{}", frame + 1);
    }

    assert!(ctx.irradiance_map().is_some());
    assert!(ctx.prefiltered_map().is_some());
    assert!(ctx.brdf_map().is_some());
    assert!((ctx.prefilter_max_lod() - 4.0).abs() < f32::EPSILON);
}

#[test]
fn ibl_fifth_execute_is_a_no_op() {
    let mut driver = HeadlessDriver::new(8, 8).unwrap();
    let mut ctx = context();
    let mut ibl = IblPreprocess::new(IblSettings::default());
    let scene = lit_scene(environment("sky", TextureKind::Texture2D));

    for _ in 0..4 {
        ibl.execute(&scene, &mut ctx, &mut driver).unwrap();
    }
    driver.clear_log();
    ibl.execute(&scene, &mut ctx, &mut driver).unwrap();

    assert!(driver.draws().is_empty());
    assert!(allocated_labels(&driver).is_empty());
    assert_eq!(ibl.phase(), IblPhase::Idle);
    assert!(ctx.brdf_map().is_some(), "idle frames keep the maps published");
}

#[test]
fn ibl_brdf_lut_is_computed_once() {
    let mut driver = HeadlessDriver::new(8, 8).unwrap();
    let mut ctx = context();
    let mut ibl = IblPreprocess::new(IblSettings::default());

    let first = lit_scene(environment("noon", TextureKind::Texture2D));
    for _ in 0..4 {
        ibl.execute(&first, &mut ctx, &mut driver).unwrap();
    }
    assert_eq!(ibl.brdf_computations(), 1);

    let second = lit_scene(environment("dusk", TextureKind::Texture2D));
    ibl.execute(&second, &mut ctx, &mut driver).unwrap();
    assert!(ctx.brdf_map().is_none(), "a new environment unpublishes the maps");
    for _ in 0..3 {
        ibl.execute(&second, &mut ctx, &mut driver).unwrap();
    }

    assert_eq!(ibl.phase(), IblPhase::Idle);
    assert_eq!(ibl.brdf_computations(), 1);
    assert!(ctx.brdf_map().is_some());
}

#[test]
fn ibl_cube_environment_skips_conversion() {
    let mut driver = HeadlessDriver::new(8, 8).unwrap();
    let mut ctx = context();
    let mut ibl = IblPreprocess::new(IblSettings::default());
    let scene = lit_scene(environment("studio", TextureKind::Cube));

    ibl.execute(&scene, &mut ctx, &mut driver).unwrap();

    assert_eq!(ibl.phase(), IblPhase::IrradianceConvolution);
    assert!(driver.draws().is_empty(), "cube sources need no reprojection");
    assert!(!allocated_labels(&driver).contains(&"ibl_environment".to_string()));
}

#[test]
fn ibl_environment_removal_unpublishes() {
    let mut driver = HeadlessDriver::new(8, 8).unwrap();
    let mut ctx = context();
    let mut ibl = IblPreprocess::new(IblSettings::default());

    let scene = lit_scene(environment("sky", TextureKind::Texture2D));
    for _ in 0..4 {
        ibl.execute(&scene, &mut ctx, &mut driver).unwrap();
    }
    assert!(ctx.irradiance_map().is_some());

    let dark = BasicScene::new(Portal::new("root"));
    ibl.execute(&dark, &mut ctx, &mut driver).unwrap();

    assert_eq!(ibl.phase(), IblPhase::Idle);
    assert!(ctx.irradiance_map().is_none());
    assert!(ctx.prefiltered_map().is_none());
    assert!(ctx.brdf_map().is_none());
}

#[test]
fn ibl_restarts_after_context_loss() {
    let mut driver = HeadlessDriver::new(8, 8).unwrap();
    let mut ctx = context();
    let mut ibl = IblPreprocess::new(IblSettings::default());
    let scene = lit_scene(environment("sky", TextureKind::Texture2D));
    for _ in 0..4 {
        ibl.execute(&scene, &mut ctx, &mut driver).unwrap();
    }

    driver.lose_context();
    ibl.execute(&scene, &mut ctx, &mut driver).unwrap();

    assert_eq!(ibl.phase(), IblPhase::IrradianceConvolution);
    assert!(ctx.brdf_map().is_none());
}

#[test]
fn ibl_allocation_failure_waits_for_a_new_environment() {
    let mut driver = HeadlessDriver::new(8, 8).unwrap();
    driver.set_max_render_target_size(Some(256));
    let mut ctx = context();
    let mut ibl = IblPreprocess::new(IblSettings::default());
    let scene = lit_scene(environment("sky", TextureKind::Texture2D));

    for frame in 0..5 {
        ibl.execute(&scene, &mut ctx, &mut driver)
            .unwrap_or_else(|e| panic!("frame {frame} surfaced {e}"));
        assert_eq!(ibl.phase(), IblPhase::Idle);
        assert!(ctx.irradiance_map().is_none());
    }
    assert!(driver.draws().is_empty());

    driver.set_max_render_target_size(None);
    let retry = lit_scene(environment("dusk", TextureKind::Texture2D));
    for _ in 0..4 {
        ibl.execute(&retry, &mut ctx, &mut driver).unwrap();
    }

    assert_eq!(ibl.phase(), IblPhase::Idle);
    assert!(ctx.irradiance_map().is_some(), "a new environment retries the chain");
    assert!(ctx.brdf_map().is_some());
}

// ============================================================================
// Shadow Allocation
// ============================================================================

#[test]
fn shadow_allocation_halves_until_it_fits() {
    let mut driver = HeadlessDriver::new(8, 8).unwrap();
    driver.set_max_render_target_size(Some(600));
    let mut ctx = context();
    let mut shadows = ShadowPreprocess::new(ShadowSettings::default());

    let sun = Rc::new(Light::directional(Vec3::NEG_Y).with_shadows(2048));
    let scene = BasicScene::new(Portal::new("root").with_light(sun.clone()).with_content(caster()));

    shadows.execute(&scene, &mut ctx, &mut driver).unwrap();

    let target = shadows.target().expect("a smaller size must succeed");
    assert_eq!(target.width(), 512);
    assert_eq!(shadows.max_supported_size(), Some(512));
    assert_eq!(sun.shadow_map_index(), Some(0));
    assert!(ctx.shadow_map().is_some());
}

#[test]
fn shadow_ceiling_persists_for_the_session() {
    let mut driver = HeadlessDriver::new(8, 8).unwrap();
    driver.set_max_render_target_size(Some(600));
    let mut ctx = context();
    let mut shadows = ShadowPreprocess::new(ShadowSettings::default());

    let sun = Rc::new(Light::directional(Vec3::NEG_Y).with_shadows(2048));
    let scene = BasicScene::new(Portal::new("root").with_light(sun));
    shadows.execute(&scene, &mut ctx, &mut driver).unwrap();

    // The device limit is lifted, but refused sizes are not retried.
    driver.set_max_render_target_size(None);
    driver.clear_log();
    shadows.execute(&scene, &mut ctx, &mut driver).unwrap();

    assert_eq!(shadows.target().map(|t| t.width()), Some(512));
    assert!(allocated_labels(&driver).is_empty(), "the existing array is reused");
}

#[test]
fn shadows_skipped_when_minimum_size_fails() {
    let mut driver = HeadlessDriver::new(8, 8).unwrap();
    driver.set_max_render_target_size(Some(100));
    let mut ctx = context();
    let mut shadows = ShadowPreprocess::new(ShadowSettings::default());

    let sun = Rc::new(Light::directional(Vec3::NEG_Y).with_shadows(1024));
    let scene = BasicScene::new(Portal::new("root").with_light(sun));

    shadows.execute(&scene, &mut ctx, &mut driver).unwrap();

    assert!(shadows.target().is_none());
    assert!(ctx.shadow_map().is_none());
}

#[test]
fn shadow_layers_follow_scene_order() {
    let mut driver = HeadlessDriver::new(8, 8).unwrap();
    let mut ctx = context();
    let mut shadows = ShadowPreprocess::new(ShadowSettings::default());

    let sun = Rc::new(Light::directional(Vec3::NEG_Y).with_shadows(256));
    let lamp = Rc::new(Light::omni(Vec3::ZERO));
    let spot = Rc::new(Light::spot(Vec3::Y, Vec3::NEG_Y, 0.2, 0.4).with_shadows(512));
    let scene = BasicScene::new(
        Portal::new("root")
            .with_light(sun.clone())
            .with_light(lamp.clone())
            .with_light(spot.clone()),
    );

    shadows.execute(&scene, &mut ctx, &mut driver).unwrap();

    assert_eq!(sun.shadow_map_index(), Some(0));
    assert_eq!(lamp.shadow_map_index(), None);
    assert_eq!(spot.shadow_map_index(), Some(1));
    let target = shadows.target().unwrap();
    assert_eq!(target.width(), 512, "sized for the largest request");
    assert_eq!(target.desc().slices, 2);
}

#[test]
fn shadows_disabled_allocates_nothing() {
    let mut driver = HeadlessDriver::new(8, 8).unwrap();
    let mut ctx = context();
    ctx.set_shadows_enabled(false);
    let mut shadows = ShadowPreprocess::new(ShadowSettings::default());

    let sun = Rc::new(Light::directional(Vec3::NEG_Y).with_shadows(512));
    let scene = BasicScene::new(Portal::new("root").with_light(sun.clone()));
    shadows.execute(&scene, &mut ctx, &mut driver).unwrap();

    assert!(allocated_labels(&driver).is_empty());
    assert_eq!(sun.shadow_map_index(), None);
}

// ============================================================================
// Caster Validation
// ============================================================================

#[test]
fn ambient_caster_is_an_invariant_violation() {
    let mut driver = HeadlessDriver::new(8, 8).unwrap();
    let mut ctx = context();
    let mut shadows = ShadowPreprocess::new(ShadowSettings::default());

    let ambient = Rc::new(Light::ambient(Vec3::splat(0.2)).with_shadows(512));
    let scene = BasicScene::new(Portal::new("root").with_light(ambient));

    let result = shadows.execute(&scene, &mut ctx, &mut driver);
    assert!(matches!(result, Err(MirageError::InvariantViolation(_))));
}

#[test]
fn omni_caster_is_an_invariant_violation() {
    let mut driver = HeadlessDriver::new(8, 8).unwrap();
    let mut ctx = context();
    let mut shadows = ShadowPreprocess::new(ShadowSettings::default());

    let bulb = Rc::new(Light::omni(Vec3::Y).with_shadows(512));
    let scene = BasicScene::new(Portal::new("root").with_light(bulb));

    let result = shadows.execute(&scene, &mut ctx, &mut driver);
    assert!(matches!(result, Err(MirageError::InvariantViolation(_))));
}

// ============================================================================
// Shadow Receivers
// ============================================================================

#[test]
fn shadow_map_bound_only_for_receivers() {
    const RECEIVER: u32 = 1;
    const IGNORER: u32 = 2;

    let mut driver = HeadlessDriver::new(8, 8).unwrap();
    let mut ctx = context();
    let mut shadows = ShadowPreprocess::new(ShadowSettings::default());

    let mut ignoring = Material::new(LightingModel::Blinn);
    ignoring.set_receives_shadows(false);
    let quad = Rc::new(Geometry::new(GeometryData::default()));
    let sun = Rc::new(Light::directional(Vec3::NEG_Y).with_shadows(512));
    let scene = BasicScene::new(
        Portal::new("root")
            .with_light(sun)
            .with_content(
                Renderable::new("floor", quad.clone(), Rc::new(Material::new(LightingModel::Blinn)))
                    .with_tag(RECEIVER),
            )
            .with_content(Renderable::new("sky_card", quad, Rc::new(ignoring)).with_tag(IGNORER)),
    );

    shadows.execute(&scene, &mut ctx, &mut driver).unwrap();
    let display = driver.display();
    let mut io = RenderPassIo::new();
    io.set_target(Channel::Output, display);
    let mut pass = PortalTreeRenderPass::new([0.0; 4]);
    run_pass(&mut pass, &scene, None, &mut io, &ctx, &mut driver).unwrap();

    let binds_shadow_map = |tag: u32| {
        driver
            .draws()
            .iter()
            .filter(|d| d.tag == tag && d.shader_name.as_deref().is_some_and(|n| n.starts_with("surface_")))
            .flat_map(|d| d.textures.iter().flatten())
            .any(|&t| driver.texture_label(t) == Some("shadow_map#depth"))
    };
    assert!(binds_shadow_map(RECEIVER), "receivers sample the shadow array");
    assert!(!binds_shadow_map(IGNORER), "non-receivers never see the shadow array");
}
