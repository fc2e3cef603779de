//! Per-run event channel.
//!
//! Each run pushes its events into its own unbounded channel; the observer
//! (SSE stream, CLI printer, test) drains the receiving end. A vanished
//! observer never affects the run: failed sends are dropped and the run
//! keeps writing its log.

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::core::event::Event;

/// Create a connected sink/receiver pair for one run.
pub fn event_channel() -> (EventSink, mpsc::UnboundedReceiver<Event>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink::new(tx), rx)
}

/// Sending half of a run's event channel.
///
/// Enforces the one-`end`-last rule: anything sent after the terminal
/// event is discarded.
#[derive(Debug)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<Event>,
    ended: bool,
    observer_gone: bool,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<Event>) -> Self {
        Self {
            tx,
            ended: false,
            observer_gone: false,
        }
    }

    pub fn send(&mut self, event: Event) {
        if self.ended {
            warn!(event = event.name(), "event after end dropped");
            return;
        }
        self.ended = event.is_terminal();
        if self.tx.send(event).is_err() && !self.observer_gone {
            self.observer_gone = true;
            debug!("observer disconnected, run continues");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::RunStatus;

    fn end() -> Event {
        Event::End {
            status: RunStatus::Success,
            exit_code: 0,
            log_name: None,
            log_path: None,
            total_steps: None,
        }
    }

    #[tokio::test]
    async fn nothing_follows_end() {
        let (mut sink, mut rx) = event_channel();
        sink.send(Event::warning("w"));
        sink.send(end());
        sink.send(Event::error("late"));
        drop(sink);

        let mut names = Vec::new();
        while let Some(ev) = rx.recv().await {
            names.push(ev.name());
        }
        assert_eq!(names, vec!["warning", "end"]);
    }

    #[test]
    fn closed_receiver_is_tolerated() {
        let (mut sink, rx) = event_channel();
        drop(rx);
        sink.send(Event::line("x"));
        sink.send(end());
        assert!(sink.ended);
    }
}
