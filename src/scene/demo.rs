//! Built-in demo scenes
//!
//! Used by the CLI `bake` command and by the benchmarks.

use std::sync::Arc;

use glam::{Mat4, Quat, Vec2, Vec3};

use super::{Material, Mesh, SceneLight, StaticScene};

/// Cornell box of edge `size` centred at the origin
///
/// White floor, ceiling and back wall, red left wall, green right wall, one
/// tall white block, an emissive ceiling panel and a point light under the
/// ceiling. The front (+Z) side is open.
pub fn cornell_box(size: f32) -> StaticScene {
    let h = size * 0.5;
    let mut scene = StaticScene::new("CornellBox");

    let quad = Arc::new(Mesh::quad("wall", Vec2::splat(size)));
    let white = Arc::new(Material::diffuse("white", Vec3::splat(0.73)));
    let red = Arc::new(Material::diffuse("red", Vec3::new(0.65, 0.05, 0.05)));
    let green = Arc::new(Material::diffuse("green", Vec3::new(0.12, 0.45, 0.15)));
    let lamp = Arc::new(Material::emissive("lamp", Vec3::splat(0.78), Vec3::splat(8.0)));

    // quads face +Y; rotate each so it faces the box interior
    let walls = [
        ("floor", Mat4::from_translation(Vec3::new(0.0, -h, 0.0)), &white),
        (
            "ceiling",
            Mat4::from_translation(Vec3::new(0.0, h, 0.0))
                * Mat4::from_quat(Quat::from_rotation_x(std::f32::consts::PI)),
            &white,
        ),
        (
            "back",
            Mat4::from_translation(Vec3::new(0.0, 0.0, -h))
                * Mat4::from_quat(Quat::from_rotation_x(std::f32::consts::FRAC_PI_2)),
            &white,
        ),
        (
            "left",
            Mat4::from_translation(Vec3::new(-h, 0.0, 0.0))
                * Mat4::from_quat(Quat::from_rotation_z(-std::f32::consts::FRAC_PI_2)),
            &red,
        ),
        (
            "right",
            Mat4::from_translation(Vec3::new(h, 0.0, 0.0))
                * Mat4::from_quat(Quat::from_rotation_z(std::f32::consts::FRAC_PI_2)),
            &green,
        ),
    ];
    for (name, transform, material) in walls {
        scene.add_surface(name, quad.clone(), vec![(*material).clone()], transform);
    }

    let block = Arc::new(Mesh::cuboid("block", Vec3::new(0.3, 0.6, 0.3) * size));
    scene.add_surface(
        "tall_block",
        block,
        vec![white.clone()],
        Mat4::from_translation(Vec3::new(-0.15 * size, -h + 0.3 * size, -0.1 * size))
            * Mat4::from_quat(Quat::from_rotation_y(0.3)),
    );

    let panel = Arc::new(Mesh::quad("panel", Vec2::splat(size * 0.25)));
    scene.add_surface(
        "lamp_panel",
        panel,
        vec![lamp],
        Mat4::from_translation(Vec3::new(0.0, h - 0.01 * size, 0.0))
            * Mat4::from_quat(Quat::from_rotation_x(std::f32::consts::PI)),
    );

    scene.add_light(SceneLight::Point {
        position: Vec3::new(0.0, h * 0.8, 0.0),
        color: Vec3::new(1.0, 0.95, 0.85),
        intensity: 2.0,
        range: size * 1.5,
        shadow_softness: size * 0.05,
    });

    scene
}
