//! Event source feeding the tracker. A dedicated thread watches the foreground window and sends
//! [crate::daemon::tracker::SessionEvent::Activity] for the program owning it.

use std::{thread::JoinHandle, time::Duration};

use anyhow::Result;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::tracker::SessionEvent;

pub mod afk;
pub mod collector;
pub mod event;

pub const EVENT_THREAD_NAME: &str = "window-events";

/// Starts the platform event source. Windows installs an event hook, everything else polls the
/// foreground window every `poll_interval`.
pub fn spawn_event_source(
    events: mpsc::Sender<SessionEvent>,
    poll_interval: Duration,
    shutdown: CancellationToken,
) -> Result<JoinHandle<()>> {
    cfg_if::cfg_if! {
        if #[cfg(feature = "win")] {
            let _ = poll_interval;
            crate::window_api::win::spawn_event_hook(events, shutdown)
        } else {
            use crate::window_api::GenericWindowManager;
            use afk::AfkEvaluator;
            use collector::{spawn_event_pump, EventPump};

            let manager = GenericWindowManager::new()?;
            let pump = EventPump::new(
                Box::new(manager),
                events,
                AfkEvaluator::from_duration(poll_interval),
            );
            spawn_event_pump(pump, poll_interval, shutdown)
        }
    }
}
