//! Choreographer Tests
//!
//! Tests for:
//! - Viewport resizing and target reuse
//! - HDR + bloom stage order
//! - LDR and HDR-unsupported paths writing the display directly
//! - Post-process effects, blit mode and render-to-texture capture
//! - Draws skipped when a surface program fails to compile

use std::cell::RefCell;
use std::rc::Rc;

use mirage::renderer::core::{DriverCapabilities, DriverCommand, GeometryData, RenderTargetType};
use mirage::renderer::pipeline::LightingModel;
use mirage::scene::Geometry;
use mirage::{
    BasicScene, Camera, Choreographer, HeadlessDriver, Material, Portal, PostProcessEffect,
    RenderContext, Renderable, RendererSettings,
};

const WALL_TAG: u32 = 7;

fn scene() -> BasicScene {
    let wall = Renderable::new(
        "wall",
        Rc::new(Geometry::new(GeometryData::default())),
        Rc::new(Material::new(LightingModel::Constant)),
    )
    .with_tag(WALL_TAG);
    BasicScene::new(Portal::new("root").with_content(wall))
}

fn ldr_settings() -> RendererSettings {
    RendererSettings {
        hdr_enabled: false,
        bloom_enabled: false,
        ..RendererSettings::default()
    }
}

fn render(choreographer: &mut Choreographer, scene: &BasicScene, driver: &mut HeadlessDriver) {
    let mut ctx = RenderContext::new();
    ctx.begin_frame(1, Camera::default());
    choreographer.configure_context(&mut ctx, &*driver);
    choreographer.render(scene, None, &ctx, driver).unwrap();
}

fn draw_targets(driver: &HeadlessDriver) -> Vec<&str> {
    driver.draws().iter().map(|d| d.target_label.as_str()).collect()
}

fn allocations(driver: &HeadlessDriver) -> Vec<String> {
    driver
        .commands()
        .iter()
        .filter_map(|c| match c {
            DriverCommand::NewRenderTarget { label, .. } => Some(label.clone()),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Viewport
// ============================================================================

#[test]
fn same_viewport_size_does_not_reallocate() {
    let mut driver = HeadlessDriver::new(640, 480).unwrap();
    let mut choreographer = Choreographer::new(&RendererSettings::default(), 640, 480).unwrap();
    let scene = scene();
    render(&mut choreographer, &scene, &mut driver);

    assert!(choreographer.set_viewport_size(800, 600));
    render(&mut choreographer, &scene, &mut driver);
    let count = choreographer.allocation_count();

    driver.clear_log();
    assert!(!choreographer.set_viewport_size(800, 600));
    render(&mut choreographer, &scene, &mut driver);

    assert_eq!(choreographer.allocation_count(), count);
    assert!(allocations(&driver).is_empty(), "no target may be recreated");
    assert_eq!(choreographer.viewport_size(), (800, 600));
}

#[test]
fn resize_recreates_targets_at_new_size() {
    let mut driver = HeadlessDriver::new(64, 64).unwrap();
    let mut choreographer = Choreographer::new(&RendererSettings::default(), 64, 64).unwrap();
    let scene = scene();
    render(&mut choreographer, &scene, &mut driver);

    driver.clear_log();
    choreographer.set_viewport_size(32, 16);
    render(&mut choreographer, &scene, &mut driver);

    let resized = driver.commands().iter().any(|c| {
        matches!(c, DriverCommand::NewRenderTarget { label, width: 32, height: 16 } if label == "scene_hdr")
    });
    assert!(resized);
}

// ============================================================================
// HDR Pipeline
// ============================================================================

#[test]
fn hdr_bloom_runs_stages_in_order() {
    let mut driver = HeadlessDriver::new(64, 64).unwrap();
    let mut choreographer = Choreographer::new(&RendererSettings::default(), 64, 64).unwrap();
    render(&mut choreographer, &scene(), &mut driver);

    let targets = draw_targets(&driver);
    let first = |label: &str| targets.iter().position(|t| *t == label);
    let last = |label: &str| targets.iter().rposition(|t| *t == label);

    let scene_end = last("scene_hdr").expect("scene drawn into the HDR target");
    let blur = first("blur_a").expect("bloom blurs the bright pass");
    let combine = first("bloom_composite").expect("bloom is added back");
    let tone = last("display").expect("tone mapping writes the display");

    assert!(scene_end < blur);
    assert!(blur < combine);
    assert!(combine < tone);
    assert_eq!(tone, targets.len() - 1);
}

#[test]
fn disabling_bloom_reallocates_only_the_scene_target() {
    let mut driver = HeadlessDriver::new(64, 64).unwrap();
    let mut choreographer = Choreographer::new(&RendererSettings::default(), 64, 64).unwrap();
    let scene = scene();
    render(&mut choreographer, &scene, &mut driver);
    let before = choreographer.allocation_count();

    driver.clear_log();
    choreographer.set_bloom_enabled(false);
    render(&mut choreographer, &scene, &mut driver);

    assert_eq!(choreographer.allocation_count(), before + 1);
    assert_eq!(allocations(&driver), vec!["scene_hdr".to_string()]);
    assert!(!draw_targets(&driver).contains(&"blur_a"));
}

// ============================================================================
// LDR Pipeline
// ============================================================================

#[test]
fn ldr_renders_straight_to_display() {
    let mut driver = HeadlessDriver::new(64, 64).unwrap();
    let mut choreographer = Choreographer::new(&ldr_settings(), 64, 64).unwrap();
    render(&mut choreographer, &scene(), &mut driver);

    assert!(allocations(&driver).is_empty());
    assert!(draw_targets(&driver).iter().all(|t| *t == "display"));
    assert!(driver.draws().iter().any(|d| d.tag == WALL_TAG));
}

#[test]
fn hdr_request_without_device_support_uses_ldr_path() {
    let capabilities = DriverCapabilities {
        hdr: false,
        ..DriverCapabilities::default()
    };
    let mut driver = HeadlessDriver::with_capabilities(64, 64, capabilities).unwrap();
    let mut choreographer = Choreographer::new(&RendererSettings::default(), 64, 64).unwrap();
    render(&mut choreographer, &scene(), &mut driver);

    assert!(allocations(&driver).is_empty());
    assert!(draw_targets(&driver).iter().all(|t| *t == "display"));
}

#[test]
fn effects_ping_pong_then_blit() {
    let settings = RendererSettings {
        post_process_effects: vec![PostProcessEffect::Grayscale, PostProcessEffect::Sepia],
        ..ldr_settings()
    };
    let mut driver = HeadlessDriver::new(64, 64).unwrap();
    let mut choreographer = Choreographer::new(&settings, 64, 64).unwrap();
    render(&mut choreographer, &scene(), &mut driver);

    let targets = draw_targets(&driver);
    let effects: Vec<&str> = targets
        .iter()
        .copied()
        .filter(|t| t.starts_with("effect_"))
        .collect();
    assert_eq!(effects, vec!["effect_a", "effect_b"]);

    let last = driver.draws().last().unwrap();
    assert_eq!(last.target_label, "display");
    assert_eq!(last.shader_name.as_deref(), Some("blit"));
}

#[test]
fn blit_mode_copies_scene_target() {
    let settings = RendererSettings {
        use_blit: true,
        ..ldr_settings()
    };
    let mut driver = HeadlessDriver::new(64, 64).unwrap();
    let mut choreographer = Choreographer::new(&settings, 64, 64).unwrap();
    render(&mut choreographer, &scene(), &mut driver);

    assert_eq!(allocations(&driver), vec!["scene_ldr".to_string()]);
    let wall = driver.draws().iter().find(|d| d.tag == WALL_TAG).unwrap();
    assert_eq!(wall.target_label, "scene_ldr");
    assert_eq!(driver.draws().last().unwrap().target_label, "display");
}

#[test]
fn render_to_texture_receives_flipped_capture() {
    let mut driver = HeadlessDriver::new(64, 64).unwrap();
    let mut choreographer = Choreographer::new(&ldr_settings(), 64, 64).unwrap();
    let captured = Rc::new(RefCell::new(Vec::new()));
    let sink = captured.clone();
    choreographer.set_render_to_texture_callback(Some(Box::new(move |target| {
        sink.borrow_mut().push(target.label().to_string());
    })));

    render(&mut choreographer, &scene(), &mut driver);

    assert_eq!(*captured.borrow(), vec!["capture".to_string()]);
    let flipped = driver
        .draws()
        .iter()
        .find(|d| d.target_label == "capture")
        .expect("capture written before the callback");
    assert_eq!(flipped.shader_name.as_deref(), Some("blit_flipped"));
    assert_eq!(driver.draws().last().unwrap().target_label, "display");
}

#[test]
fn captured_texture_matches_the_display_encoding() {
    for (srgb_framebuffer, expected) in [
        (true, RenderTargetType::ColorTextureSrgb),
        (false, RenderTargetType::ColorTexture),
    ] {
        let capabilities = DriverCapabilities {
            srgb_framebuffer,
            ..DriverCapabilities::default()
        };
        let mut driver = HeadlessDriver::with_capabilities(64, 64, capabilities).unwrap();
        let settings = RendererSettings {
            use_blit: true,
            ..ldr_settings()
        };
        let mut choreographer = Choreographer::new(&settings, 64, 64).unwrap();
        let captured = Rc::new(RefCell::new(Vec::new()));
        let sink = captured.clone();
        choreographer.set_render_to_texture_callback(Some(Box::new(move |target| {
            sink.borrow_mut().push(target.desc().ty);
        })));

        render(&mut choreographer, &scene(), &mut driver);

        assert_eq!(
            *captured.borrow(),
            vec![expected],
            "srgb framebuffer {srgb_framebuffer}: capture storage"
        );
        let scene_target = driver
            .draws()
            .iter()
            .find(|d| d.tag == WALL_TAG)
            .map(|d| d.target_label.clone());
        assert_eq!(scene_target.as_deref(), Some("scene_ldr"));
    }
}

// ============================================================================
// Program Failures
// ============================================================================

#[test]
fn failed_surface_program_skips_its_draw() {
    let mut driver = HeadlessDriver::new(64, 64).unwrap();
    driver.fail_shaders_named("surface_");
    let mut choreographer = Choreographer::new(&ldr_settings(), 64, 64).unwrap();
    let scene = scene();

    render(&mut choreographer, &scene, &mut driver);
    render(&mut choreographer, &scene, &mut driver);

    assert!(driver.draws().iter().all(|d| d.tag != WALL_TAG));
    let compiles = driver
        .commands()
        .iter()
        .filter(|c| matches!(c, DriverCommand::CompileShader(name) if name.starts_with("surface_")))
        .count();
    assert_eq!(compiles, 0, "failed programs never reach the device");
}
