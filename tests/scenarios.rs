use blockyard::{
    cgmath::Vector3,
    config::{EngineConfig, GridConfig, PhysicsConfig},
    data_structures::{block::BlockType, terrain::Terrain},
    physics::{PhysicsWorld, build_body},
    pick::{PickTarget, Ray},
    placement::{PlaceOptions, PlacementController},
    pool::BlockPool,
    render::HeadlessSurface,
    scene::Scene,
    terrain_editor::{TerrainBrush, TerrainEditor, TerrainMode},
    Engine,
};
use instant::Duration;

fn flat_scene() -> (PlacementController, Scene, BlockPool) {
    let world = PhysicsWorld::new(PhysicsConfig::default().gravity);
    (
        PlacementController::new(GridConfig::default()),
        Scene::new(world, Terrain::flat(64.0, 64)),
        BlockPool::new(8),
    )
}

fn straight_down(x: f32, z: f32) -> Ray {
    Ray::new(Vector3::new(x, 30.0, z), Vector3::new(0.0, -1.0, 0.0))
}

#[test]
fn cube_on_flat_ground_rests_at_half_height() {
    let (mut controller, mut scene, pool) = flat_scene();
    let hit = controller.pick(&straight_down(0.2, -0.3), &scene).unwrap();
    assert_eq!(hit.target, PickTarget::Terrain);
    let position = controller
        .calculate_position(&hit, BlockType::Cube, &scene)
        .unwrap();
    assert_eq!(position, Vector3::new(0.0, 0.5, 0.0));

    let id = controller
        .place(&mut scene, &pool, BlockType::Cube, position, PlaceOptions::default())
        .unwrap();
    assert_eq!(scene.block(id).unwrap().position(), Vector3::new(0.0, 0.5, 0.0));
}

#[test]
fn fully_overlapping_cube_is_rejected() {
    let (mut controller, mut scene, pool) = flat_scene();
    let at = Vector3::new(0.0, 0.5, 0.0);
    controller
        .place(&mut scene, &pool, BlockType::Cube, at, PlaceOptions::default())
        .unwrap();
    assert!(controller
        .place(&mut scene, &pool, BlockType::Cube, at, PlaceOptions::default())
        .is_none());
    assert_eq!(scene.len(), 1);
    assert_eq!(scene.renderer().live_count(BlockType::Cube), 1);
}

#[test]
fn sphere_stacks_one_unit_above_cube() {
    let (mut controller, mut scene, pool) = flat_scene();
    let cube = controller
        .place(&mut scene, &pool, BlockType::Cube, Vector3::new(0.0, 0.5, 0.0), PlaceOptions::default())
        .unwrap();

    let hit = controller.pick(&straight_down(0.1, 0.1), &scene).unwrap();
    assert_eq!(hit.target, PickTarget::Block(cube));
    let position = controller
        .calculate_position(&hit, BlockType::Sphere, &scene)
        .unwrap();
    let cube_y = scene.block(cube).unwrap().position().y;
    assert!((position.y - (cube_y + 1.0)).abs() < 1e-5);
    assert!(controller
        .place(&mut scene, &pool, BlockType::Sphere, position, PlaceOptions::default())
        .is_some());
}

#[test]
fn pool_hands_back_the_released_pair() {
    let pool = BlockPool::new(4);
    let mut world = PhysicsWorld::new(PhysicsConfig::default().gravity);

    let first = pool.acquire(BlockType::Cylinder, &mut world, build_body);
    let id = first.id();
    pool.release(first, &mut world);
    let second = pool.acquire(BlockType::Cylinder, &mut world, |_| panic!("pool should not construct"));
    assert_eq!(second.id(), id);

    pool.release(second, &mut world);
    let third = pool.acquire(BlockType::Cylinder, &mut world, |_| panic!("pool should not construct"));
    assert_eq!(third.id(), id);
    assert_eq!(pool.stats().constructed, 1);
    assert_eq!(pool.stats().reused, 2);
}

#[test]
fn lower_brush_leaves_terrain_beyond_radius_untouched() {
    let (_, mut scene, _) = flat_scene();
    let mut editor = TerrainEditor::new(Duration::from_millis(16));
    let brush = TerrainBrush::new(TerrainMode::Lower, 2.0, 0.5);
    editor
        .apply_brush(&mut scene, Vector3::new(0.0, 0.0, 0.0), &brush)
        .unwrap();

    assert!(scene.terrain().height_at(0.0, 0.0).unwrap() < 0.0);
    assert_eq!(scene.terrain().height_at(3.0, 0.0), Some(0.0));
    assert_eq!(scene.terrain().height_at(0.0, -3.0), Some(0.0));
}

#[test]
fn second_pooled_session_starts_without_bodies() {
    let mut engine = Engine::new(EngineConfig::default());
    engine.set_target_fps(0.0);
    engine
        .mount(Box::new(HeadlessSurface::default()), 640, 480)
        .unwrap();
    for x in [-2.0, 0.0, 2.0] {
        engine
            .place(BlockType::Crate, Vector3::new(x, 4.0, 0.0), PlaceOptions::default())
            .unwrap();
    }
    for _ in 0..100 {
        engine.tick(1.0 / 60.0);
    }
    assert!(engine.session().unwrap().scene().world().body_count() >= 3);
    engine.unmount().unwrap();

    engine
        .mount(Box::new(HeadlessSurface::default()), 640, 480)
        .unwrap();
    assert_eq!(engine.world_pool().created(), 1);
    assert_eq!(engine.world_pool().reused(), 1);
    let session = engine.session().unwrap();
    assert_eq!(session.scene().world().body_count(), 0);
    assert!(session.scene().is_empty());
}
