use std::time::Instant;

use anyhow::{Context, Result};
use lumen::{ErrorKind, Preload, RuntimeState, SourceDescriptor};

use super::common::{RecordingConsole, controller};

#[tokio::test]
async fn integration_set_timeout_fires_on_next_tick() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("app.js");
    std::fs::write(&path, r#"setTimeout(() => console.log("hi"), 0);"#)?;

    let console = RecordingConsole::default();
    let mut controller = controller(&console)?;
    controller.start(
        SourceDescriptor::file(path.display().to_string()),
        Vec::new(),
        None,
    )?;
    assert_eq!(controller.state(), RuntimeState::Running);
    assert!(console.lines().is_empty(), "timeout must not fire synchronously");
    assert_eq!(controller.active_timer_count(), 1);

    controller.tick(Instant::now())?;
    assert_eq!(console.lines(), vec!["hi".to_string()]);

    controller.tick(Instant::now())?;
    assert_eq!(console.lines().len(), 1);
    assert_eq!(controller.active_timer_count(), 0);
    Ok(())
}

#[tokio::test]
async fn integration_preloads_run_in_order_before_main() -> Result<()> {
    let console = RecordingConsole::default();
    let mut controller = controller(&console)?;
    controller.start(
        SourceDescriptor::inline("console.log('main sees ' + x);"),
        vec![
            Preload::new("a.js", "x = 1;"),
            Preload::new("b.js", "if (x !== 1) { throw new Error('out of order'); } x = 2;"),
        ],
        None,
    )?;

    assert_eq!(controller.state(), RuntimeState::Running);
    assert_eq!(console.lines(), vec!["main sees 2".to_string()]);
    Ok(())
}

#[tokio::test]
async fn integration_parse_error_does_not_poison_later_starts() -> Result<()> {
    let console = RecordingConsole::default();
    let mut controller = controller(&console)?;

    controller.start(SourceDescriptor::inline("let = ;"), Vec::new(), None)?;
    assert_eq!(controller.state(), RuntimeState::Failed);
    let failure = controller.last_error().context("expected a recorded failure")?;
    assert_eq!(failure.kind, ErrorKind::Parse);

    controller.start(
        SourceDescriptor::inline("console.log('recovered');"),
        Vec::new(),
        None,
    )?;
    assert_eq!(controller.state(), RuntimeState::Running);
    assert!(controller.last_error().is_none());
    assert!(console.contains("recovered"));
    Ok(())
}

#[tokio::test]
async fn integration_missing_file_aborts_silently() -> Result<()> {
    let console = RecordingConsole::default();
    let mut controller = controller(&console)?;
    controller.start(
        SourceDescriptor::file("/definitely/not/here/app.js"),
        Vec::new(),
        None,
    )?;

    assert_eq!(controller.state(), RuntimeState::Idle);
    assert!(controller.engine().is_none());
    assert!(controller.last_error().is_none());
    Ok(())
}

#[tokio::test]
async fn integration_reload_tears_down_previous_generation() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("app.js");
    std::fs::write(
        &path,
        "setInterval(function () {}, 1000); setTimeout(function () {}, 1000); requestAnimationFrame(function () {});",
    )?;

    let console = RecordingConsole::default();
    let mut controller = controller(&console)?;
    controller.start(
        SourceDescriptor::file(path.display().to_string()).with_watch(true),
        Vec::new(),
        None,
    )?;
    let old_scheduler = controller.scheduler().context("engine should be running")?;
    let old_watch = controller
        .watch_handle()
        .cloned()
        .context("file source should be watched")?;
    let old_generation = controller.generation();
    assert_eq!(old_scheduler.borrow().active_count(), 3);

    controller.reload()?;

    assert_eq!(old_scheduler.borrow().active_count(), 0);
    assert!(old_watch.is_disposed());
    assert!(controller.generation() > old_generation);
    assert_eq!(controller.active_timer_count(), 3);
    let new_watch = controller.watch_handle().context("new generation is watched")?;
    assert!(!new_watch.is_disposed());
    assert_eq!(controller.host().clear_count(), 1);
    Ok(())
}

#[tokio::test]
async fn integration_storage_survives_reload() -> Result<()> {
    let console = RecordingConsole::default();
    let mut controller = controller(&console)?;
    controller.start(
        SourceDescriptor::inline(
            "var visits = Number(localStorage.getItem('visits') || '0') + 1;\
             localStorage.setItem('visits', visits);\
             console.log('visits ' + visits);",
        ),
        Vec::new(),
        None,
    )?;
    controller.reload()?;

    assert_eq!(
        console.lines(),
        vec!["visits 1".to_string(), "visits 2".to_string()]
    );
    Ok(())
}

#[tokio::test]
async fn integration_execute_runs_in_current_engine() -> Result<()> {
    let console = RecordingConsole::default();
    let mut controller = controller(&console)?;
    controller.start(SourceDescriptor::inline("var greeting = 'hello';"), Vec::new(), None)?;

    assert!(controller.execute("console.log(greeting + ' again');")?);
    assert_eq!(console.lines(), vec!["hello again".to_string()]);

    let err = controller
        .execute("undefinedFunction();")
        .expect_err("reference errors surface to the caller");
    assert_eq!(err.kind(), ErrorKind::GuestRuntime);
    Ok(())
}

#[tokio::test]
async fn integration_guest_can_wrap_callbacks() -> Result<()> {
    let console = RecordingConsole::default();
    let mut controller = controller(&console)?;
    controller.start(
        SourceDescriptor::inline(
            "console.log(typeof Callback);\
             var onPress = Callback(function (label) { console.log('pressed ' + label); });",
        ),
        Vec::new(),
        None,
    )?;
    assert_eq!(controller.state(), RuntimeState::Running);

    assert!(controller.execute("onPress.call('ok');")?);
    assert!(controller.execute("console.log(onPress.generation === Lumen.generation);")?);
    assert_eq!(
        console.lines(),
        vec![
            "function".to_string(),
            "pressed ok".to_string(),
            "true".to_string()
        ]
    );
    Ok(())
}
