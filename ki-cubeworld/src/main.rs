use anyhow::{Context, Result};
use ki_cubeworld::CubeRenderer;
use ki_engine::{
    simulator::{HeadlessHost, SimulatedRuntime},
    EngineBuilder, RenderConfig,
};
use log::info;

/// Around ten seconds at 90Hz
const DEFAULT_FRAMES: usize = 900;

pub fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => RenderConfig::from_path(&path)
            .with_context(|| format!("Unable to load config from {path}"))?,
        None => RenderConfig::default(),
    };
    let frames = args
        .next()
        .map(|frames| frames.parse::<usize>())
        .transpose()
        .context("The frame count must be a number")?
        .unwrap_or(DEFAULT_FRAMES);

    let mut engine = EngineBuilder::new()
        .config(config)
        .handle_ctrl_c(true)
        .build(SimulatedRuntime::default(), CubeRenderer::new())?;
    engine.run(&mut HeadlessHost::with_frame_limit(frames))?;

    let stats = engine.render_context.graphics.stats;
    info!(
        "[CUBEWORLD] {} frames submitted, {} draws ({:?} per eye), {} triangles, {} corners visible",
        engine.xr_context.submitted_frames(),
        stats.draws,
        stats.draws_per_layer,
        stats.triangles,
        stats.visible_vertices
    );
    engine.shutdown()?;
    Ok(())
}
