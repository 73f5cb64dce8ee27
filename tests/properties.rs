use blockyard::{
    cgmath::Vector3,
    config::{GridConfig, PhysicsConfig},
    data_structures::{
        block::{BlockSpec, BlockType},
        terrain::Terrain,
    },
    physics::PhysicsWorld,
    placement::{BrushKind, PlaceOptions, PlacementController, check_collision},
    pool::BlockPool,
    scene::Scene,
};
use proptest::prelude::*;

fn block_type() -> impl Strategy<Value = BlockType> {
    prop::sample::select(BlockType::ALL.to_vec())
}

fn placement() -> impl Strategy<Value = (BlockType, Vector3<f32>, f32, f32)> {
    (
        block_type(),
        (-4.0f32..4.0, -2.0f32..2.0, -4.0f32..4.0),
        0.0f32..std::f32::consts::TAU,
        0.25f32..3.0,
    )
        .prop_map(|(ty, (x, y, z), rot, scale)| (ty, Vector3::new(x, y, z), rot, scale))
}

fn spec_of((ty, position, rot, scale): (BlockType, Vector3<f32>, f32, f32)) -> BlockSpec {
    let mut spec = BlockSpec::new(ty, position);
    spec.rotation.y = rot;
    spec.scale = scale;
    spec
}

fn collides(candidate: &BlockSpec, existing: &BlockSpec) -> bool {
    check_collision(
        candidate.position,
        candidate.block_type,
        candidate.rotation.y,
        candidate.scale,
        std::iter::once(existing),
    )
}

proptest! {
    #[test]
    fn collision_is_symmetric(a in placement(), b in placement()) {
        let (a, b) = (spec_of(a), spec_of(b));
        prop_assert_eq!(collides(&a, &b), collides(&b, &a));
    }

    #[test]
    fn snapping_rounds_to_the_nearest_cell_and_is_idempotent(
        x in -500.0f32..500.0,
        z in -500.0f32..500.0,
        cell_size in 0.25f32..4.0,
    ) {
        let controller = PlacementController::new(GridConfig { cell_size, ..Default::default() });
        let snapped = controller.snap(Vector3::new(x, 1.5, z));
        prop_assert!((snapped.x - (x / cell_size).round() * cell_size).abs() < 1e-3);
        prop_assert!((snapped.z - (z / cell_size).round() * cell_size).abs() < 1e-3);
        prop_assert_eq!(snapped.y, 1.5);
        prop_assert_eq!(controller.snap(snapped), snapped);
    }
}

fn scene() -> (PlacementController, Scene, BlockPool) {
    let world = PhysicsWorld::new(PhysicsConfig::default().gravity);
    (
        PlacementController::new(GridConfig::default()),
        Scene::new(world, Terrain::flat(64.0, 64)),
        BlockPool::new(64),
    )
}

#[test]
fn fill_brush_places_every_cell_with_one_dirty_event_per_type() {
    let (mut controller, mut scene, pool) = scene();
    let before = scene.renderer().dirty_events();

    let cubes = controller.place_brush(
        &mut scene,
        &pool,
        BlockType::Cube,
        BrushKind::Fill,
        Vector3::new(0.0, 0.5, 0.0),
        Vector3::new(3.0, 0.5, 2.0),
        PlaceOptions::default(),
    );
    let spheres = controller.place_brush(
        &mut scene,
        &pool,
        BlockType::Sphere,
        BrushKind::Line,
        Vector3::new(-5.0, 0.5, -5.0),
        Vector3::new(-5.0, 0.5, 0.0),
        PlaceOptions::default(),
    );

    assert_eq!(cubes.len(), 12);
    assert_eq!(spheres.len(), 6);
    assert_eq!(scene.len(), 18);
    assert_eq!(scene.count_of(BlockType::Cube), 12);
    assert_eq!(scene.renderer().dirty_events() - before, 2);

    let mut types = scene.renderer().dirty_types();
    types.sort_by_key(|t| format!("{:?}", t));
    assert_eq!(types, vec![BlockType::Cube, BlockType::Sphere]);
}

#[test]
fn rect_brush_only_places_the_outline() {
    let (mut controller, mut scene, pool) = scene();
    let placed = controller.place_brush(
        &mut scene,
        &pool,
        BlockType::Cube,
        BrushKind::Rect,
        Vector3::new(0.0, 0.5, 0.0),
        Vector3::new(4.0, 0.5, 4.0),
        PlaceOptions::default(),
    );
    assert_eq!(placed.len(), 16);
    assert!(scene
        .specs()
        .all(|(_, spec)| spec.position != Vector3::new(2.0, 0.5, 2.0)));
}
