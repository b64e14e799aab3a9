use std::{
    cell::RefCell,
    rc::Rc,
    sync::atomic::{AtomicUsize, Ordering},
    time::{Duration, Instant},
};

use anyhow::{Result, bail};
use async_trait::async_trait;
use lumen::{
    ConsoleLevel, ConsoleSink, HeadlessHost, Host, RuntimeConfig, RuntimeController,
    fetch::Fetcher,
};

/// Console sink that keeps every line for assertions.
#[derive(Clone, Default)]
pub struct RecordingConsole {
    lines: Rc<RefCell<Vec<String>>>,
}

impl RecordingConsole {
    pub fn lines(&self) -> Vec<String> {
        self.lines.borrow().clone()
    }

    pub fn contains(&self, line: &str) -> bool {
        self.lines.borrow().iter().any(|l| l == line)
    }
}

impl ConsoleSink for RecordingConsole {
    fn write(&self, _level: ConsoleLevel, message: &str) {
        self.lines.borrow_mut().push(message.to_string());
    }
}

/// Fetcher that is never reachable and counts its attempts.
#[derive(Default)]
pub struct UnreachableFetcher {
    pub calls: AtomicUsize,
}

impl UnreachableFetcher {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for UnreachableFetcher {
    async fn fetch_text(&self, url: &str) -> lumen::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(lumen::Error::Network {
            url: url.to_string(),
            message: "connection refused".to_string(),
        })
    }
}

pub fn fast_config() -> RuntimeConfig {
    RuntimeConfig {
        debounce_ms: 30,
        dev_server_poll_ms: 20,
        ..RuntimeConfig::default()
    }
}

pub fn controller(console: &RecordingConsole) -> Result<RuntimeController<HeadlessHost>> {
    Ok(RuntimeController::builder()
        .config(fast_config())
        .console(Rc::new(console.clone()))
        .build(HeadlessHost::default())?)
}

/// Ticks the controller until `done` holds, yielding to background tasks in between.
pub async fn tick_until<H, F>(controller: &mut RuntimeController<H>, mut done: F) -> Result<()>
where
    H: Host,
    F: FnMut(&RuntimeController<H>) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        controller.tick(Instant::now())?;
        if done(controller) {
            return Ok(());
        }
        if Instant::now() > deadline {
            bail!("condition not reached within 10s: {controller:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
