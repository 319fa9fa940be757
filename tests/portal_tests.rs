//! Portal Tree Tests
//!
//! Tests for:
//! - Stencil buffer returns to zero after the portal pass
//! - Sibling portals never draw into each other
//! - Nested portals are clipped by their parent
//! - Seal depth occludes parent content behind an opening

use std::rc::Rc;

use mirage::renderer::core::{GeometryData, ScreenRect};
use mirage::renderer::graph::passes::PortalTreeRenderPass;
use mirage::renderer::graph::{Channel, run_pass};
use mirage::renderer::pipeline::LightingModel;
use mirage::scene::Geometry;
use mirage::{
    BasicScene, Camera, Driver, HeadlessDriver, Material, Portal, RenderContext, RenderPassIo,
    Renderable,
};

const SIZE: u32 = 16;

const ROOT_TAG: u32 = 1;
const LEFT_TAG: u32 = 10;
const RIGHT_TAG: u32 = 20;
const INNER_TAG: u32 = 30;

fn unlit() -> Rc<Material> {
    Rc::new(Material::new(LightingModel::Constant))
}

fn quad() -> Rc<Geometry> {
    Rc::new(Geometry::new(GeometryData::default()))
}

fn silhouette(name: &str, rect: ScreenRect) -> Renderable {
    Renderable::new(name, quad(), unlit()).with_coverage(rect)
}

fn content(name: &str, tag: u32, depth: f32) -> Renderable {
    Renderable::new(name, quad(), unlit()).with_tag(tag).with_depth(depth)
}

/// Root with full-screen content behind two side-by-side portals.
fn two_rooms() -> BasicScene {
    let left = Portal::new("left")
        .with_silhouette(silhouette("left_door", ScreenRect::new(0, 0, 6, 8)))
        .with_content(content("left_wall", LEFT_TAG, 0.5));
    let right = Portal::new("right")
        .with_silhouette(silhouette("right_door", ScreenRect::new(10, 0, 16, 8)))
        .with_content(content("right_wall", RIGHT_TAG, 0.5));

    BasicScene::new(
        Portal::new("root")
            .with_content(content("root_wall", ROOT_TAG, 0.9))
            .with_child(left)
            .with_child(right),
    )
}

fn render(scene: &BasicScene, driver: &mut HeadlessDriver) -> Rc<mirage::RenderTarget> {
    let display = driver.display();
    let mut ctx = RenderContext::new();
    ctx.begin_frame(1, Camera::default());

    let mut io = RenderPassIo::new();
    io.set_target(Channel::Output, display.clone());
    let mut pass = PortalTreeRenderPass::new([0.0; 4]);
    run_pass(&mut pass, scene, None, &mut io, &ctx, driver).unwrap();
    display
}

// ============================================================================
// Stencil Balance
// ============================================================================

#[test]
fn stencil_is_zero_after_siblings() {
    let mut driver = HeadlessDriver::new(SIZE, SIZE).unwrap();
    let display = render(&two_rooms(), &mut driver);

    let stencil = driver.stencil_buffer(&display).expect("display surface was touched");
    assert!(
        stencil.iter().all(|&s| s == 0),
        "every increment must be matched by an erase"
    );
}

#[test]
fn stencil_is_zero_after_nested_portals() {
    let inner = Portal::new("closet")
        .with_silhouette(silhouette("closet_door", ScreenRect::new(2, 2, 4, 4)))
        .with_content(content("closet_wall", INNER_TAG, 0.5));
    let left = Portal::new("left")
        .with_silhouette(silhouette("left_door", ScreenRect::new(0, 0, 6, 8)))
        .with_content(content("left_wall", LEFT_TAG, 0.5))
        .with_child(inner);
    let scene = BasicScene::new(Portal::new("root").with_child(left));

    let mut driver = HeadlessDriver::new(SIZE, SIZE).unwrap();
    let display = render(&scene, &mut driver);

    let stencil = driver.stencil_buffer(&display).unwrap();
    assert!(stencil.iter().all(|&s| s == 0));
    assert_eq!(driver.color_tag_at(&display, 3, 3), Some(INNER_TAG));
    assert_eq!(driver.color_tag_at(&display, 1, 6), Some(LEFT_TAG));
}

// ============================================================================
// Isolation
// ============================================================================

#[test]
fn siblings_only_draw_inside_their_opening() {
    let mut driver = HeadlessDriver::new(SIZE, SIZE).unwrap();
    let display = render(&two_rooms(), &mut driver);

    assert_eq!(driver.color_tag_at(&display, 2, 2), Some(LEFT_TAG));
    assert_eq!(driver.color_tag_at(&display, 12, 2), Some(RIGHT_TAG));
    // Between the openings only the root shows through.
    assert_eq!(driver.color_tag_at(&display, 8, 2), Some(ROOT_TAG));
    assert_eq!(driver.color_tag_at(&display, 8, 12), Some(ROOT_TAG));
}

#[test]
fn nested_portal_is_clipped_by_parent() {
    // The closet silhouette reaches past the left opening.
    let inner = Portal::new("closet")
        .with_silhouette(silhouette("closet_door", ScreenRect::new(4, 4, 12, 12)))
        .with_content(content("closet_wall", INNER_TAG, 0.5));
    let left = Portal::new("left")
        .with_silhouette(silhouette("left_door", ScreenRect::new(0, 0, 6, 8)))
        .with_child(inner);
    let scene = BasicScene::new(Portal::new("root").with_child(left));

    let mut driver = HeadlessDriver::new(SIZE, SIZE).unwrap();
    let display = render(&scene, &mut driver);

    assert_eq!(driver.color_tag_at(&display, 5, 5), Some(INNER_TAG));
    assert_eq!(
        driver.color_tag_at(&display, 10, 10),
        Some(0),
        "child content must not leak outside the parent opening"
    );
}

#[test]
fn sealed_opening_hides_parent_content_behind_it() {
    let mut driver = HeadlessDriver::new(SIZE, SIZE).unwrap();
    let display = render(&two_rooms(), &mut driver);

    // The root wall is drawn after the children and sits behind them.
    assert_ne!(driver.color_tag_at(&display, 3, 3), Some(ROOT_TAG));
    assert_ne!(driver.color_tag_at(&display, 14, 6), Some(ROOT_TAG));
}

// ============================================================================
// Degradation
// ============================================================================

#[test]
fn unavailable_silhouette_program_skips_children_only() {
    let mut driver = HeadlessDriver::new(SIZE, SIZE).unwrap();
    driver.fail_shaders_named("portal_silhouette");
    let display = render(&two_rooms(), &mut driver);

    assert!(driver.draws().iter().all(|d| d.tag != LEFT_TAG && d.tag != RIGHT_TAG));
    assert_eq!(driver.color_tag_at(&display, 3, 3), Some(ROOT_TAG));
    assert!(driver.stencil_buffer(&display).unwrap().iter().all(|&s| s == 0));
}

#[test]
fn pass_clears_color_depth_and_stencil() {
    let mut driver = HeadlessDriver::new(SIZE, SIZE).unwrap();
    render(&BasicScene::new(Portal::new("empty")), &mut driver);

    let cleared = driver.commands().iter().any(|c| {
        matches!(
            c,
            mirage::renderer::core::DriverCommand::Clear(flags)
                if flags.contains(mirage::renderer::core::ClearFlags::STENCIL)
        )
    });
    assert!(cleared);
    assert!(driver.draws().is_empty());
}
