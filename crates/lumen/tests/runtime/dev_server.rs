use std::{rc::Rc, sync::Arc};

use anyhow::{Context, Result};
use lumen::{
    DevServer, ErrorKind, HeadlessHost, RuntimeController, RuntimeState, SourceDescriptor,
    source::ResourceStore,
};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

use super::common::{RecordingConsole, UnreachableFetcher, controller, fast_config, tick_until};

fn dev_descriptor(base_url: String) -> SourceDescriptor {
    SourceDescriptor::resource("app/index.js").with_dev_server(DevServer {
        base_url,
        entry: "/index.js".to_string(),
        ..DevServer::default()
    })
}

#[tokio::test]
async fn integration_unreachable_dev_server_is_tried_once_per_start() -> Result<()> {
    let console = RecordingConsole::default();
    let fetcher = Arc::new(UnreachableFetcher::default());
    let mut controller = RuntimeController::builder()
        .config(fast_config())
        .console(Rc::new(console.clone()))
        .fetcher(fetcher.clone())
        .resources(ResourceStore::default().with_entry("app/index.js", "console.log('bundled');"))
        .build(HeadlessHost::default())?;

    controller.start(dev_descriptor("http://127.0.0.1:9".to_string()), Vec::new(), None)?;
    tick_until(&mut controller, |c| c.state() == RuntimeState::Running).await?;
    assert_eq!(fetcher.calls(), 1);
    assert_eq!(console.lines(), vec!["bundled".to_string()]);
    assert!(!controller.prefers_dev_server());

    controller.reload()?;
    tick_until(&mut controller, |c| c.state() == RuntimeState::Running).await?;
    assert_eq!(fetcher.calls(), 2, "every reload tries the dev server again");
    assert_eq!(console.lines().len(), 2);
    assert!(!controller.prefers_dev_server());
    Ok(())
}

#[tokio::test]
async fn integration_reload_picks_up_a_dev_server_that_came_back() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/index.js"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let console = RecordingConsole::default();
    let mut controller = RuntimeController::builder()
        .config(fast_config())
        .console(Rc::new(console.clone()))
        .resources(ResourceStore::default().with_entry("app/index.js", "console.log('bundled');"))
        .build(HeadlessHost::default())?;
    controller.start(dev_descriptor(server.uri()), Vec::new(), None)?;
    tick_until(&mut controller, |c| c.state() == RuntimeState::Running).await?;
    assert_eq!(console.lines(), vec!["bundled".to_string()]);

    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/index.js"))
        .respond_with(ResponseTemplate::new(200).set_body_string("console.log('dev');"))
        .mount(&server)
        .await;

    controller.reload()?;
    tick_until(&mut controller, |_| console.contains("dev")).await?;
    assert!(controller.prefers_dev_server());
    assert!(
        controller
            .watch_handle()
            .is_some_and(|h| h.location().ends_with("/index.js"))
    );
    Ok(())
}

#[tokio::test]
async fn integration_dev_server_script_is_preferred_and_polled() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/index.js"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("console.log('dev ' + location.origin);"),
        )
        .mount(&server)
        .await;

    let console = RecordingConsole::default();
    let mut controller = controller(&console)?;
    controller.start(dev_descriptor(server.uri()), Vec::new(), None)?;
    tick_until(&mut controller, |c| c.state() == RuntimeState::Running).await?;

    assert_eq!(console.lines(), vec![format!("dev {}", server.uri())]);
    let watch = controller
        .watch_handle()
        .context("dev-server scripts are polled")?;
    assert_eq!(watch.location(), format!("{}/index.js", server.uri()));
    let first = controller.generation();

    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/index.js"))
        .respond_with(ResponseTemplate::new(200).set_body_string("console.log('dev v2');"))
        .mount(&server)
        .await;

    tick_until(&mut controller, |_| console.contains("dev v2")).await?;
    assert!(controller.generation() > first);
    assert!(controller.prefers_dev_server());
    Ok(())
}

#[tokio::test]
async fn integration_url_source_network_failure_is_recorded() -> Result<()> {
    let console = RecordingConsole::default();
    let mut controller = controller(&console)?;
    controller.start(
        SourceDescriptor::url("http://127.0.0.1:9/app.js"),
        Vec::new(),
        None,
    )?;
    tick_until(&mut controller, |c| c.state() == RuntimeState::Failed).await?;

    let failure = controller.last_error().context("network failure is recorded")?;
    assert_eq!(failure.kind, ErrorKind::Network);
    assert!(controller.engine().is_none());
    Ok(())
}
