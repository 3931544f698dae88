//! Event loop plumbing
//!
//! Terminal input is read on its own thread. Background work (the action
//! worker, happening refreshes, one-shot timers) posts into the same
//! channel, so the UI thread is the only one touching state.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use crossterm::event::{self, Event as CrosstermEvent, KeyEvent, KeyEventKind};

use super::queue::ActionDone;
use crate::domain::Happening;

/// Messages handled by the UI thread
#[derive(Debug)]
pub enum Event {
    Key(KeyEvent),
    Resize(u16, u16),
    Tick,
    /// Redraw only
    Refresh,
    /// A queued action finished
    ActionDone(Box<ActionDone>),
    /// A background happening refresh landed
    Happenings(Vec<Happening>),
}

pub struct EventHandler {
    rx: mpsc::Receiver<Event>,
    tx: mpsc::Sender<Event>,
}

impl EventHandler {
    /// Starts the input thread, ticking every `tick_rate_ms`
    pub fn new(tick_rate_ms: u64) -> Self {
        let tick_rate = Duration::from_millis(tick_rate_ms);
        let (tx, rx) = mpsc::channel();
        let input_tx = tx.clone();

        thread::spawn(move || loop {
            let event = if event::poll(tick_rate).unwrap_or(false) {
                match event::read() {
                    Ok(CrosstermEvent::Key(key)) if key.kind == KeyEventKind::Press => {
                        Event::Key(key)
                    }
                    Ok(CrosstermEvent::Resize(w, h)) => Event::Resize(w, h),
                    _ => continue,
                }
            } else {
                Event::Tick
            };
            if input_tx.send(event).is_err() {
                break;
            }
        });

        Self { rx, tx }
    }

    /// Sender for background producers
    pub fn sender(&self) -> mpsc::Sender<Event> {
        self.tx.clone()
    }

    /// Blocks for the next event
    pub fn next(&self) -> Result<Event> {
        Ok(self.rx.recv()?)
    }

    /// Posts a [`Event::Refresh`] after `delay`
    pub fn schedule_refresh(&self, delay: Duration) {
        let tx = self.sender();
        let spawned = thread::Builder::new()
            .name("lifelog-timer".into())
            .spawn(move || {
                thread::sleep(delay);
                // The loop may be gone by now.
                let _ = tx.send(Event::Refresh);
            });
        if let Err(err) = spawned {
            tracing::warn!(error = %err, "failed to schedule refresh");
        }
    }
}
