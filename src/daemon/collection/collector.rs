use std::{
    thread::JoinHandle,
    time::{Duration, Instant},
};

use anyhow::Result;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::{daemon::tracker::SessionEvent, window_api::{WindowHandle, WindowManager}};

use super::{
    afk::AfkEvaluator,
    event::{WindowEvent, WindowEventKind},
    EVENT_THREAD_NAME,
};

/// Resolves the program behind `event` and hands it to the tracker. Returns false once the
/// tracker stopped listening.
pub fn forward(
    manager: &mut dyn WindowManager,
    events: &mpsc::Sender<SessionEvent>,
    event: WindowEvent,
) -> bool {
    let path = match manager.resolve_process_path(event.window) {
        Ok(path) => path,
        Err(e) => {
            // Windows of exited or privileged processes can't be resolved.
            debug!("Skipping {event:?}, process path is unavailable {e:?}");
            return true;
        }
    };
    trace!("Forwarding {:?} for {path}", event.kind);
    events
        .blocking_send(SessionEvent::Activity {
            kind: event.kind,
            path,
        })
        .is_ok()
}

/// Polling event source. Turns a changed foreground window into
/// [WindowEventKind::FocusChanged] and recent input on the same window into
/// [WindowEventKind::LocationChanged].
pub struct EventPump {
    manager: Box<dyn WindowManager>,
    events: mpsc::Sender<SessionEvent>,
    afk_evaluator: AfkEvaluator,
    last_window: Option<WindowHandle>,
}

impl EventPump {
    pub fn new(
        manager: Box<dyn WindowManager>,
        events: mpsc::Sender<SessionEvent>,
        afk_evaluator: AfkEvaluator,
    ) -> Self {
        Self {
            manager,
            events,
            afk_evaluator,
            last_window: None,
        }
    }

    fn poll(&mut self) -> Result<Option<WindowEvent>> {
        let window = self.manager.get_active_window()?;
        if self.last_window != Some(window) {
            self.last_window = Some(window);
            return Ok(Some(WindowEvent {
                kind: WindowEventKind::FocusChanged,
                window,
            }));
        }

        let idle_ms = self.manager.get_idle_time()?;
        if self.afk_evaluator.is_afk(idle_ms) {
            return Ok(None);
        }
        Ok(Some(WindowEvent {
            kind: WindowEventKind::LocationChanged,
            window,
        }))
    }

    /// Polls once. Returns false once the tracker stopped listening.
    pub fn step(&mut self) -> bool {
        match self.poll() {
            Ok(Some(event)) => forward(self.manager.as_mut(), &self.events, event),
            Ok(None) => true,
            Err(e) => {
                error!("Encountered an error during collection {e:?}");
                true
            }
        }
    }

    /// Executes the polling loop on the current thread.
    pub fn run(mut self, frequency: Duration, shutdown: CancellationToken) {
        let mut collection_point = Instant::now();
        while !shutdown.is_cancelled() {
            collection_point += frequency;
            if !self.step() {
                info!("Tracker is gone, stopping event pump");
                return;
            }
            std::thread::sleep(collection_point.saturating_duration_since(Instant::now()));
        }
        info!("Event pump stopped");
    }
}

pub fn spawn_event_pump(
    pump: EventPump,
    frequency: Duration,
    shutdown: CancellationToken,
) -> Result<JoinHandle<()>> {
    Ok(std::thread::Builder::new()
        .name(EVENT_THREAD_NAME.into())
        .spawn(move || pump.run(frequency, shutdown))?)
}
