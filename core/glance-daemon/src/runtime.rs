//! Single-writer runtime around [`SessionEngine`].
//!
//! All mutations are commands on one channel consumed by one thread, so the
//! engine needs no locking. Timers are separate threads that only enqueue
//! commands; the fade ticker exists only while the engine asks for it.

use chrono::Local;
use glance_protocol::HookMessage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::engine::SessionEngine;
use crate::observer::{EngineSnapshot, MessageSink, ObserverEvent, ObserverTx};
use crate::preferences::{Preferences, PreferencesStore};

enum Command {
    Message(Box<HookMessage>),
    Sweep,
    FadeTick,
    ToggleExpand(String),
    Dismiss(String),
    ToggleSound,
    Snapshot(Sender<EngineSnapshot>),
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub sweep_interval: Duration,
    pub fade_interval: Duration,
}

/// Cloneable handle used by the transport and the rendering layer.
#[derive(Clone)]
pub struct EngineHandle {
    commands: Sender<Command>,
    fade_running: Arc<AtomicBool>,
}

impl EngineHandle {
    fn send(&self, command: Command) -> bool {
        self.commands.send(command).is_ok()
    }

    pub fn toggle_expand(&self, key: &str) {
        self.send(Command::ToggleExpand(key.to_string()));
    }

    pub fn dismiss(&self, key: &str) {
        self.send(Command::Dismiss(key.to_string()));
    }

    pub fn toggle_sound(&self) {
        self.send(Command::ToggleSound);
    }

    /// Round-trips through the engine thread, so the snapshot reflects every
    /// command enqueued before this call.
    pub fn snapshot(&self) -> Option<EngineSnapshot> {
        let (reply_tx, reply_rx) = mpsc::channel();
        if !self.send(Command::Snapshot(reply_tx)) {
            return None;
        }
        reply_rx.recv().ok()
    }

    /// Asks the engine thread to exit; later commands are dropped.
    pub fn shutdown(&self) {
        self.send(Command::Shutdown);
    }

    pub fn is_fade_ticker_running(&self) -> bool {
        self.fade_running.load(Ordering::SeqCst)
    }
}

impl MessageSink for EngineHandle {
    fn deliver(&self, message: HookMessage) {
        if !self.send(Command::Message(Box::new(message))) {
            warn!("Engine runtime stopped; dropping message");
        }
    }
}

pub struct EngineRuntime {
    handle: EngineHandle,
    engine_thread: Option<JoinHandle<()>>,
    sweep_ticker: Option<Ticker>,
}

impl EngineRuntime {
    pub fn spawn(
        preferences: Preferences,
        store: Option<PreferencesStore>,
        observer: ObserverTx,
        options: RuntimeOptions,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel();
        let fade_running = Arc::new(AtomicBool::new(false));

        let engine = SessionEngine::new(
            preferences.current_stats(Local::now()),
            preferences.sound_enabled,
        );
        let worker = EngineWorker {
            engine,
            store,
            observer,
            commands_tx: commands_tx.clone(),
            fade_interval: options.fade_interval,
            fade_ticker: None,
            fade_running: Arc::clone(&fade_running),
        };
        let engine_thread = thread::spawn(move || worker.run(commands_rx));

        let sweep_tx = commands_tx.clone();
        let sweep_ticker = Ticker::spawn(options.sweep_interval, move || {
            sweep_tx.send(Command::Sweep).is_ok()
        });

        info!(
            sweep_interval_ms = options.sweep_interval.as_millis() as u64,
            "Engine runtime started"
        );

        Self {
            handle: EngineHandle {
                commands: commands_tx,
                fade_running,
            },
            engine_thread: Some(engine_thread),
            sweep_ticker: Some(sweep_ticker),
        }
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    pub fn shutdown(&mut self) {
        if let Some(ticker) = self.sweep_ticker.take() {
            ticker.stop();
        }
        if let Some(thread) = self.engine_thread.take() {
            self.handle.send(Command::Shutdown);
            if thread.join().is_err() {
                warn!("Engine thread panicked during shutdown");
            }
        }
    }
}

impl Drop for EngineRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct EngineWorker {
    engine: SessionEngine,
    store: Option<PreferencesStore>,
    observer: ObserverTx,
    commands_tx: Sender<Command>,
    fade_interval: Duration,
    fade_ticker: Option<Ticker>,
    fade_running: Arc<AtomicBool>,
}

impl EngineWorker {
    fn run(mut self, commands: Receiver<Command>) {
        while let Ok(command) = commands.recv() {
            let now = Local::now();
            let mut preferences_changed = false;

            match command {
                Command::Message(message) => {
                    let outcome = self.engine.handle_message(&message, now);
                    debug!(session_id = %message.session_id, event = %message.event, ?outcome, "Message applied");
                }
                Command::Sweep => self.engine.sweep(now),
                Command::FadeTick => self.engine.fade_tick(now),
                Command::ToggleExpand(key) => {
                    self.engine.toggle_expand(&key, now);
                }
                Command::Dismiss(key) => {
                    self.engine.dismiss_session(&key, now);
                }
                Command::ToggleSound => {
                    let enabled = self.engine.toggle_sound();
                    info!(sound_enabled = enabled, "Sound preference toggled");
                    preferences_changed = true;
                }
                Command::Snapshot(reply) => {
                    let _ = reply.send(self.engine.snapshot());
                    continue;
                }
                Command::Shutdown => break,
            }

            if self.engine.take_stats_dirty() {
                preferences_changed = true;
            }
            if preferences_changed {
                self.persist();
            }

            for alert in self.engine.take_alerts() {
                self.observer.publish(ObserverEvent::Alert(alert));
            }
            self.observer
                .publish(ObserverEvent::Sessions(self.engine.snapshot()));
            self.update_fade_ticker();
        }

        if let Some(ticker) = self.fade_ticker.take() {
            ticker.stop();
        }
        self.fade_running.store(false, Ordering::SeqCst);
        debug!("Engine thread exiting");
    }

    fn update_fade_ticker(&mut self) {
        let needed = self.engine.needs_animation();
        match (needed, self.fade_ticker.is_some()) {
            (true, false) => {
                let tx = self.commands_tx.clone();
                self.fade_ticker = Some(Ticker::spawn(self.fade_interval, move || {
                    tx.send(Command::FadeTick).is_ok()
                }));
                self.fade_running.store(true, Ordering::SeqCst);
                debug!("Fade ticker started");
            }
            (false, true) => {
                if let Some(ticker) = self.fade_ticker.take() {
                    ticker.stop();
                }
                self.fade_running.store(false, Ordering::SeqCst);
                debug!("Fade ticker stopped");
            }
            _ => {}
        }
    }

    fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let preferences = Preferences {
            sound_enabled: self.engine.sound_enabled(),
            today_stats: Some(self.engine.today_stats().clone()),
        };
        if let Err(err) = store.save(&preferences) {
            warn!(error = %err, path = %store.path().display(), "Failed to persist preferences");
        }
    }
}

/// Periodic task that calls `tick` every `interval` until stopped or until
/// `tick` reports that its receiver is gone.
pub struct Ticker {
    stop_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl Ticker {
    pub fn spawn<F>(interval: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let thread = thread::spawn(move || loop {
            match stop_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {
                    if !tick() {
                        break;
                    }
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        });
        Self {
            stop_tx,
            thread: Some(thread),
        }
    }

    pub fn stop(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.halt();
    }
}
