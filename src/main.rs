use blockyard::{
    cgmath::Vector3,
    config::EngineConfig,
    data_structures::block::BlockType,
    flow,
    placement::PlaceOptions,
    scene::SceneSnapshot,
};

/// `blockyard [config.json] [scene.json]`
fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => EngineConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => EngineConfig::default(),
    };
    let scene = match args.next() {
        Some(path) => Some(SceneSnapshot::from_json(&std::fs::read_to_string(path)?)?),
        None => None,
    };

    flow::run(
        config,
        Box::new(move |engine| match scene {
            Some(snapshot) => {
                if let Err(e) = engine.load(snapshot) {
                    log::error!("Cannot load scene: {:#}", e);
                }
            }
            None => {
                engine.place(BlockType::Start, Vector3::new(0.0, 0.1, 0.0), PlaceOptions::default());
                engine.place(BlockType::Finish, Vector3::new(8.0, 0.1, 0.0), PlaceOptions::default());
            }
        }),
    )
}
