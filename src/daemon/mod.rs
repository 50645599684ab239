use std::path::PathBuf;

use anyhow::Result;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracker::{Notification, SessionTracker, TrackerHandle};

use crate::{
    app::App,
    config::Config,
    utils::clock::{Clock, DefaultClock},
};

pub mod args;
pub mod collection;
pub mod shutdown;
pub mod tracker;

/// Represents the starting point for the daemon
pub async fn start_daemon(dir: PathBuf, snapshot: bool) -> Result<()> {
    let dir = dir.canonicalize()?;
    std::env::set_current_dir("/")?;

    let config = Config::load_or_create(&dir)?;
    info!("Starting daemon in {dir:?} with {config:?}");
    let app = App::open(&dir, snapshot || config.snapshot)?;

    let shutdown_token = CancellationToken::new();
    let (tracker, handle) = create_tracker(&app, &config, DefaultClock, &shutdown_token);
    let app = app.with_tracker(handle.clone());

    let _events = collection::spawn_event_source(
        handle.events(),
        config.poll_interval(),
        shutdown_token.clone(),
    )?;

    let (_, tracker_result, _) = tokio::join!(
        shutdown::detect_shutdown(shutdown_token.clone()),
        tracker.run(),
        log_notifications(app.subscribe(), shutdown_token.clone()),
    );

    if let Err(tracker_result) = tracker_result {
        error!("Tracker got an error {:?}", tracker_result);
    }

    Ok(())
}

fn create_tracker(
    app: &App,
    config: &Config,
    clock: impl Clock,
    shutdown_token: &CancellationToken,
) -> (SessionTracker, TrackerHandle) {
    SessionTracker::new(
        app.store().clone(),
        Box::new(clock),
        config.tracker(),
        shutdown_token.clone(),
    )
}

async fn log_notifications(
    notifications: Option<broadcast::Receiver<Notification>>,
    shutdown_token: CancellationToken,
) {
    let Some(mut notifications) = notifications else {
        return;
    };
    loop {
        tokio::select! {
            _ = shutdown_token.cancelled() => return,
            notification = notifications.recv() => match notification {
                Ok(notification) => debug!("Tracker notification {notification:?}"),
                Err(RecvError::Lagged(skipped)) => warn!("Skipped {skipped} tracker notifications"),
                Err(RecvError::Closed) => return,
            }
        }
    }
}

#[cfg(test)]
mod daemon_tests {
    use std::{sync::Arc, time::Duration};

    use anyhow::Result;
    use tempfile::tempdir;
    use tokio_util::sync::CancellationToken;

    use crate::{
        app::App,
        config::Config,
        daemon::{
            collection::{
                afk::AfkEvaluator,
                collector::{spawn_event_pump, EventPump},
            },
            create_tracker, log_notifications,
        },
        store::RecordType,
        utils::{clock::DefaultClock, logging::TEST_LOGGING},
        window_api::{MockWindowManager, WindowHandle},
    };

    const DEMO: &str = "/usr/bin/demo";

    fn mock_manager() -> MockWindowManager {
        let mut manager = MockWindowManager::new();
        manager
            .expect_get_active_window()
            .returning(|| Ok(WindowHandle(42)));
        manager.expect_get_idle_time().returning(|| Ok(0));
        manager
            .expect_resolve_process_path()
            .returning(|_| Ok(Arc::from(DEMO)));
        manager
    }

    /// Very simple smoke test wiring the event thread, the tracker and an on-disk store together.
    #[tokio::test]
    async fn smoke_test_daemon() -> Result<()> {
        *TEST_LOGGING;
        let dir = tempdir()?;
        let config = Config::load_or_create(dir.path())?;
        let app = App::open(dir.path(), false)?;
        let record = app.create_record("demo", RecordType::Auto, DEMO)?;
        let ignored = app.create_record("manual", RecordType::Manual, "/usr/bin/manual")?;

        let shutdown_token = CancellationToken::new();
        let (tracker, handle) = create_tracker(&app, &config, DefaultClock, &shutdown_token);
        let app = app.with_tracker(handle.clone());

        let pump = EventPump::new(
            Box::new(mock_manager()),
            handle.events(),
            AfkEvaluator::from_seconds(1),
        );
        let events = spawn_event_pump(pump, Duration::from_millis(10), shutdown_token.clone())?;

        let (_, tracker_result, _) = tokio::join!(
            async {
                tokio::time::sleep(Duration::from_millis(300)).await;
                shutdown_token.cancel()
            },
            tracker.run(),
            log_notifications(app.subscribe(), shutdown_token.clone()),
        );
        tracker_result?;
        events.join().expect("event thread panicked");

        let times = app.list_times(record, None)?;
        assert_eq!(times.len(), 1);
        assert!(times[0].end >= times[0].start);
        assert_eq!(app.record(record)?.total_time_ms, times[0].duration_ms());
        assert!(app.list_times(ignored, None)?.is_empty());

        drop(app);
        let reopened = App::open(dir.path(), false)?;
        assert_eq!(reopened.list_times(record, None)?.len(), 1);
        Ok(())
    }
}
