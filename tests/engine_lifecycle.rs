use blockyard::{
    cgmath::Vector3,
    config::{EngineConfig, QualityTier},
    data_structures::block::BlockType,
    placement::PlaceOptions,
    render::HeadlessSurface,
    scene::SceneSnapshot,
    terrain_editor::{TerrainBrush, TerrainMode},
    Engine, Mode,
};

const DT: f32 = 1.0 / 60.0;

fn engine_with(config: EngineConfig, surface: HeadlessSurface) -> Engine {
    let mut engine = Engine::new(config);
    engine.set_target_fps(0.0);
    engine.mount(Box::new(surface), 800, 600).unwrap();
    engine
}

fn engine() -> Engine {
    engine_with(EngineConfig::default(), HeadlessSurface::default())
}

#[test]
fn failing_physics_still_renders_every_frame() {
    let mut config = EngineConfig::default();
    config.physics.fixed_dt = 0.0;
    let mut engine = engine_with(config, HeadlessSurface::default());

    let first = engine.tick(DT).unwrap();
    let second = engine.tick(DT).unwrap();
    assert!(first.physics_error && first.rendered);
    assert!(second.physics_error && second.rendered);

    let stats = engine.frame_stats();
    assert_eq!(stats.physics_errors, 2);
    assert_eq!(stats.renders, 2);
}

#[test]
fn hidden_surface_skips_simulation_and_rendering() {
    let mut surface = HeadlessSurface::default();
    surface.visible = false;
    let mut engine = engine_with(EngineConfig::default(), surface);
    engine
        .place(BlockType::Crate, Vector3::new(0.0, 5.0, 0.0), PlaceOptions::default())
        .unwrap();

    let report = engine.tick(DT).unwrap();
    assert!(report.hidden);
    assert!(!report.rendered);
    assert_eq!(report.sub_steps, 0);
    assert_eq!(engine.frame_stats().hidden_ticks, 1);
}

#[test]
fn edits_are_refused_while_playing() {
    let mut engine = engine();
    engine.enter_play();
    assert_eq!(engine.mode(), Mode::Play);
    assert!(engine
        .place(BlockType::Cube, Vector3::new(0.0, 0.5, 0.0), PlaceOptions::default())
        .is_none());
    assert!(engine.begin_preview(BlockType::Cube).is_err());
    assert!(engine
        .apply_terrain_brush(Vector3::new(0.0, 0.0, 0.0), &TerrainBrush::new(TerrainMode::Raise, 2.0, 1.0))
        .is_err());

    engine.enter_edit();
    assert!(engine
        .place(BlockType::Cube, Vector3::new(0.0, 0.5, 0.0), PlaceOptions::default())
        .is_some());
}

#[test]
fn snapshot_survives_json_and_a_remount() {
    let mut engine = engine();
    engine
        .place(
            BlockType::Ramp,
            Vector3::new(3.0, 0.5, -2.0),
            PlaceOptions {
                color: Some(0x336699),
                ..Default::default()
            },
        )
        .unwrap();
    engine
        .place(BlockType::Finish, Vector3::new(-6.0, 0.1, 4.0), PlaceOptions::default())
        .unwrap();
    engine
        .apply_terrain_brush(Vector3::new(10.0, 0.0, 10.0), &TerrainBrush::new(TerrainMode::Raise, 3.0, 2.0))
        .unwrap();

    let json = engine.snapshot().unwrap().to_json().unwrap();
    engine.unmount().unwrap();
    engine.mount(Box::new(HeadlessSurface::default()), 800, 600).unwrap();

    let loaded = engine.load(SceneSnapshot::from_json(&json).unwrap()).unwrap();
    assert_eq!(loaded, 2);
    let scene = engine.session().unwrap().scene();
    assert_eq!(scene.count_of(BlockType::Ramp), 1);
    assert_eq!(scene.count_of(BlockType::Finish), 1);
    assert!((scene.terrain().height_at(10.0, 10.0).unwrap() - 2.0).abs() < 1e-4);
    assert_eq!(engine.snapshot().unwrap().to_json().unwrap(), json);
}

#[test]
fn thumbnail_needs_a_rendered_frame_and_matches_the_surface_size() {
    let mut engine = engine();
    assert!(engine.capture_thumbnail().is_err());
    engine.resize(320, 200);
    engine.tick(DT);
    let image = engine.capture_thumbnail().unwrap();
    assert_eq!(image.dimensions(), (320, 200));
}

#[test]
fn quality_tier_reaches_the_surface() {
    let mut engine = engine();
    engine.set_quality(QualityTier::Quality);
    assert_eq!(engine.config().quality, QualityTier::Quality);
    assert!(engine.tick(DT).unwrap().rendered);
}

#[test]
fn shutdown_empties_both_pools() {
    let mut engine = engine();
    engine
        .place(BlockType::Cube, Vector3::new(0.0, 0.5, 0.0), PlaceOptions::default())
        .unwrap();
    engine.tick(DT);
    engine.shutdown().unwrap();
    assert!(!engine.is_mounted());
    assert_eq!(engine.world_pool().available(), 0);
    assert_eq!(engine.block_pool().available(BlockType::Cube), 0);
    assert!(engine.tick(DT).is_none());
}

#[test]
fn placement_outside_the_grid_bounds_is_refused() {
    let mut engine = engine();
    let half_extent = engine.config().grid.half_extent;
    assert!(engine
        .place(BlockType::Cube, Vector3::new(half_extent * 10.0, 0.5, 0.0), PlaceOptions::default())
        .is_none());
    assert!(engine.session().unwrap().scene().is_empty());
}

#[test]
fn hostile_snapshot_fails_without_touching_the_scene() {
    let mut engine = engine();
    engine
        .place(BlockType::Cube, Vector3::new(0.0, 0.5, 0.0), PlaceOptions::default())
        .unwrap();
    let json = r#"{
        "blocks": [],
        "terrain": { "size": 16.0, "resolution": 18446744073709551615, "heights": [0.0] }
    }"#;
    assert!(engine.load(SceneSnapshot::from_json(json).unwrap()).is_err());
    assert_eq!(engine.session().unwrap().scene().len(), 1);
}
