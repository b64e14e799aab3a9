use std::time::{Duration, Instant};

use anyhow::Result;
use lumen::{ResolvedSource, RuntimeState, SourceDescriptor, dispatch::HostEvent};

use super::common::{RecordingConsole, controller, tick_until};

#[tokio::test]
async fn integration_rapid_changes_coalesce_into_one_restart() -> Result<()> {
    let console = RecordingConsole::default();
    let mut controller = controller(&console)?;
    controller.start(SourceDescriptor::inline("console.log('v0');"), Vec::new(), None)?;
    let started = controller.generation();

    let dispatcher = controller.dispatcher().clone();
    for version in 1..=3 {
        dispatcher.post(
            started,
            HostEvent::Changed(ResolvedSource::local(format!("console.log('v{version}');"))),
        );
    }

    let now = Instant::now();
    controller.tick(now)?;
    assert_eq!(controller.generation(), started, "restart must wait for the quiet period");

    controller.tick(now + Duration::from_millis(10))?;
    assert_eq!(controller.generation(), started);

    controller.tick(now + Duration::from_secs(1))?;
    assert_eq!(controller.state(), RuntimeState::Running);
    assert_eq!(controller.generation().get(), started.get() + 1);
    assert_eq!(
        console.lines(),
        vec!["v0".to_string(), "v3".to_string()]
    );

    controller.tick(now + Duration::from_secs(2))?;
    assert_eq!(controller.generation().get(), started.get() + 1);
    Ok(())
}

#[tokio::test]
async fn integration_changes_for_old_generations_are_ignored() -> Result<()> {
    let console = RecordingConsole::default();
    let mut controller = controller(&console)?;
    controller.start(SourceDescriptor::inline("console.log('first');"), Vec::new(), None)?;
    let stale = controller.generation();

    controller.reload()?;
    controller.dispatcher().post(
        stale,
        HostEvent::Changed(ResolvedSource::local("console.log('stale');")),
    );

    let now = Instant::now();
    controller.tick(now)?;
    controller.tick(now + Duration::from_secs(1))?;
    assert!(!console.contains("stale"));
    assert_eq!(console.lines(), vec!["first".to_string(), "first".to_string()]);
    Ok(())
}

#[tokio::test]
async fn integration_failed_generation_recovers_on_change() -> Result<()> {
    let console = RecordingConsole::default();
    let mut controller = controller(&console)?;
    controller.start(SourceDescriptor::inline("function ("), Vec::new(), None)?;
    assert_eq!(controller.state(), RuntimeState::Failed);

    controller.dispatcher().post(
        controller.generation(),
        HostEvent::Changed(ResolvedSource::local("console.log('fixed');")),
    );
    let now = Instant::now();
    controller.tick(now)?;
    controller.tick(now + Duration::from_secs(1))?;

    assert_eq!(controller.state(), RuntimeState::Running);
    assert!(console.contains("fixed"));
    Ok(())
}

#[tokio::test]
async fn integration_blank_change_aborts_without_an_engine() -> Result<()> {
    let console = RecordingConsole::default();
    let mut controller = controller(&console)?;
    controller.start(SourceDescriptor::inline("console.log('v0');"), Vec::new(), None)?;
    let started = controller.generation();

    controller.dispatcher().post(started, HostEvent::Changed(ResolvedSource::local("   \n")));
    let now = Instant::now();
    controller.tick(now)?;
    controller.tick(now + Duration::from_secs(1))?;

    assert!(controller.generation() > started);
    assert_eq!(controller.state(), RuntimeState::Idle);
    assert!(controller.engine().is_none());
    assert_eq!(controller.host().clear_count(), 1);

    controller.dispatcher().post(
        controller.generation(),
        HostEvent::Changed(ResolvedSource::local("console.log('v1');")),
    );
    controller.tick(now + Duration::from_secs(2))?;
    controller.tick(now + Duration::from_secs(3))?;
    assert_eq!(controller.state(), RuntimeState::Running);
    assert_eq!(console.lines(), vec!["v0".to_string(), "v1".to_string()]);
    Ok(())
}

#[cfg(feature = "watch")]
#[tokio::test]
async fn integration_file_edit_restarts_with_new_text() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("app.js");
    std::fs::write(&path, "console.log('v1');")?;

    let console = RecordingConsole::default();
    let mut controller = controller(&console)?;
    controller.start(
        SourceDescriptor::file(path.display().to_string()).with_watch(true),
        Vec::new(),
        None,
    )?;
    assert_eq!(console.lines(), vec!["v1".to_string()]);
    let first = controller.generation();

    std::fs::write(&path, "console.log('v2');")?;
    tick_until(&mut controller, |_| console.contains("v2")).await?;

    assert!(controller.generation() > first);
    assert_eq!(controller.state(), RuntimeState::Running);
    assert!(controller.watch_handle().is_some_and(|h| !h.is_disposed()));
    Ok(())
}
