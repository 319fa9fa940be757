//! Portal Gallery
//!
//! Renders a room with two doorways into nested rooms for a few frames and
//! logs the resulting resource statistics.
//!
//! ```text
//! RUST_LOG=debug cargo run --example portal_gallery            # headless
//! RUST_LOG=debug cargo run --example portal_gallery -- --wgpu  # GPU, offscreen
//! ```

use std::rc::Rc;

use glam::{Mat4, Vec3};
use log::info;

use mirage::renderer::core::{GeometryData, ScreenRect, Vertex};
use mirage::renderer::pipeline::LightingModel;
use mirage::scene::Geometry;
use mirage::{
    BasicScene, Camera, Driver, HeadlessDriver, Light, Material, Portal, Renderable, Renderer,
    RendererSettings, WgpuDriver,
};

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;
const FRAMES: u32 = 6;

fn quad() -> Rc<Geometry> {
    let corner = |x: f32, y: f32, u: f32, v: f32| Vertex {
        position: [x, y, 0.0],
        normal: [0.0, 0.0, 1.0],
        uv: [u, v],
    };
    Rc::new(Geometry::new(GeometryData {
        vertices: vec![
            corner(-1.0, -1.0, 0.0, 1.0),
            corner(1.0, -1.0, 1.0, 1.0),
            corner(1.0, 1.0, 1.0, 0.0),
            corner(-1.0, 1.0, 0.0, 0.0),
        ],
        indices: vec![0, 1, 2, 0, 2, 3],
    }))
}

fn doorway(name: &str, x: f32, rect: ScreenRect, model: LightingModel) -> Portal {
    let geometry = quad();
    let at = Mat4::from_translation(Vec3::new(x, 0.0, -4.0));
    let silhouette = Renderable::new(format!("{name}_silhouette"), geometry.clone(), Rc::new(Material::default()))
        .with_transform(at)
        .with_coverage(rect);
    let wall = Renderable::new(format!("{name}_wall"), geometry, Rc::new(Material::new(model)))
        .with_transform(Mat4::from_translation(Vec3::new(x, 0.0, -8.0)));

    Portal::new(name)
        .with_silhouette(silhouette)
        .with_content(wall)
        .with_distance(4.0)
        .with_light(Rc::new(Light::omni(Vec3::new(x, 1.0, -6.0)).with_color(Vec3::new(1.0, 0.8, 0.6), 2.0)))
}

fn gallery() -> BasicScene {
    let sun = Light::directional(Vec3::new(-0.3, -1.0, -0.5)).with_shadows(2048);
    let floor = Renderable::new("floor", quad(), Rc::new(Material::new(LightingModel::PhysicallyBased)))
        .with_transform(Mat4::from_rotation_x(-std::f32::consts::FRAC_PI_2) * Mat4::from_scale(Vec3::splat(10.0)));

    let study = doorway("study", 2.0, ScreenRect::new(800, 160, 1100, 560), LightingModel::Phong)
        .with_child(doorway("closet", 2.5, ScreenRect::new(900, 260, 1000, 460), LightingModel::Lambert));

    BasicScene::new(
        Portal::new("hall")
            .with_light(Rc::new(Light::ambient(Vec3::splat(0.15))))
            .with_light(Rc::new(sun))
            .with_content(floor)
            .with_child(doorway("gallery", -2.0, ScreenRect::new(180, 160, 480, 560), LightingModel::Blinn))
            .with_child(study),
    )
}

fn run(driver: &mut dyn Driver) -> anyhow::Result<()> {
    let mut renderer = Renderer::new(&RendererSettings::default(), &*driver)?;
    let scene = gallery();
    let camera = Camera::look_at(
        Vec3::new(0.0, 1.6, 2.0),
        Vec3::new(0.0, 1.0, -4.0),
        Vec3::Y,
        70f32.to_radians(),
        WIDTH as f32 / HEIGHT as f32,
        0.05,
        100.0,
    );

    for _ in 0..FRAMES {
        renderer.render_frame(&scene, None, camera, driver)?;
    }

    let stats = driver.context().stats();
    info!(
        "{} frames: {} render targets ({} allocations), {} shaders ({} compilations), {} buffers",
        renderer.frame(),
        stats.render_targets,
        stats.render_target_allocations,
        stats.shaders,
        stats.shader_compilations,
        stats.buffers,
    );
    info!("IBL phase {:?}, shadow ceiling {:?}", renderer.ibl().phase(), renderer.shadows().max_supported_size());
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    if std::env::args().any(|arg| arg == "--wgpu") {
        let mut driver = WgpuDriver::new(WIDTH, HEIGHT)?;
        run(&mut driver)?;
        info!("{} cached render pipelines", driver.pipeline_count());
    } else {
        let mut driver = HeadlessDriver::new(WIDTH, HEIGHT)?;
        run(&mut driver)?;
        info!("{} draws recorded", driver.draws().len());
    }
    Ok(())
}
