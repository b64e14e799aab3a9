use std::{env::args, rc::Rc, time::Instant};

use anyhow::anyhow;
use lumen::{HeadlessHost, Preload, RuntimeController};
use tokio::time::MissedTickBehavior;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::HostConfig;

mod config;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let path = args()
        .nth(1)
        .ok_or_else(|| anyhow!("usage: lumen-host <config.yaml>"))?;
    let config = HostConfig::load(&path)?;
    let preload = config
        .preload
        .iter()
        .map(Preload::from_file)
        .collect::<lumen::Result<Vec<_>>>()?;

    let mut controller = RuntimeController::builder()
        .config(config.runtime.clone().with_env_overrides())
        .globals(config.globals.clone())
        .build(HeadlessHost::default())?;
    controller.start(
        config.script.clone(),
        preload,
        Some(Rc::new(|| info!("Script ready"))),
    )?;

    let mut frames = tokio::time::interval(config.frame());
    frames.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = frames.tick() => controller.tick(Instant::now())?,
            res = &mut shutdown => {
                res?;
                break;
            }
        }
    }

    controller.stop();
    Ok(())
}
