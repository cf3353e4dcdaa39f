//! # Background Worker
//!
//! Renders never run on the audio thread or inside a parameter callback.
//! Those only post a [`Command`] into a bounded channel; this thread picks
//! the commands up and drives the [`Engine`].
//!
//! Hosts report parameter values but not when a gesture ends, so the worker
//! waits for a change to settle: once no further change has arrived for
//! [`SETTLE_TIME`], the burst counts as committed and one run is started for
//! the widest scope it touched. An impulse response change is the exception
//! and is acted on immediately.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::error::Result;
use crate::pipeline::{Engine, RunOutcome};
use crate::settings::{EffectSettings, ParamEvent, ParamId, Scope};

/// Quiet period after which a parameter change counts as committed.
pub const SETTLE_TIME: Duration = Duration::from_millis(150);

/// Capacity of the command channel.
pub const QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// A parameter moved. Its new value is read from the settings source.
    Param(ParamId),
    LoadSample(PathBuf),
    Prepare { sample_rate: f32, bpm: f64 },
    Tempo(f64),
    Shutdown,
}

/// Where the worker reads the current parameter values from.
pub trait SettingsSource: Send + Sync + 'static {
    fn settings(&self) -> EffectSettings;
}

impl SettingsSource for Mutex<EffectSettings> {
    fn settings(&self) -> EffectSettings {
        self.lock().clone()
    }
}

pub fn channel() -> (Sender<Command>, Receiver<Command>) {
    crossbeam_channel::bounded(QUEUE_CAPACITY)
}

pub struct Worker {
    sender: Sender<Command>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Start the worker thread. `sender` must belong to the same channel as
    /// `receiver`; it is used to stop the thread on drop.
    pub fn spawn(
        sender: Sender<Command>,
        receiver: Receiver<Command>,
        engine: Arc<Engine>,
        settings: Arc<dyn SettingsSource>,
    ) -> Result<Self> {
        let handle = std::thread::Builder::new()
            .name("rise-and-fall-worker".into())
            .spawn(move || run(&receiver, &engine, settings.as_ref()))?;

        Ok(Self {
            sender,
            handle: Some(handle),
        })
    }

    pub fn sender(&self) -> &Sender<Command> {
        &self.sender
    }

    /// Post a command without blocking. Returns false if the queue is full.
    pub fn send(&self, command: Command) -> bool {
        self.sender.try_send(command).is_ok()
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        // A full queue still drains; block until the shutdown fits.
        let _ = self.sender.send(Command::Shutdown);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                nih_plug::nih_error!("worker: thread panicked");
            }
        }
    }
}

fn run(receiver: &Receiver<Command>, engine: &Engine, source: &dyn SettingsSource) {
    nih_plug::nih_log!("worker: started");
    let mut pending: Option<Scope> = None;

    loop {
        let command = match pending {
            Some(scope) => match receiver.recv_timeout(SETTLE_TIME) {
                Ok(command) => command,
                Err(RecvTimeoutError::Timeout) => {
                    pending = None;
                    commit(engine, scope, &source.settings());
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match receiver.recv() {
                Ok(command) => command,
                Err(_) => break,
            },
        };

        match command {
            Command::Param(id) => match id.scope() {
                Scope::Playback => {}
                Scope::ImpulseResponse => {
                    let settings = source.settings();
                    let event = ParamEvent::changed(id, settings.get(id));
                    match engine.handle_event(&event, &settings) {
                        Ok(Some(outcome)) => report("impulse response change", Ok(outcome)),
                        Ok(None) => {}
                        Err(err) => report("impulse response change", Err(err)),
                    }
                }
                scope => pending = pending.max(Some(scope)),
            },
            Command::LoadSample(path) => {
                let result = engine.load_sample_file(&path, &source.settings());
                report("sample load", result);
            }
            Command::Prepare { sample_rate, bpm } => {
                let settings = source.settings();
                match engine.prepare(sample_rate, bpm, &settings) {
                    Ok(true) => report("re-render after prepare", engine.process(&settings)),
                    Ok(false) => {}
                    Err(err) => nih_plug::nih_error!("worker: prepare failed: {}", err),
                }
            }
            Command::Tempo(bpm) => {
                if engine.set_tempo(bpm) {
                    pending = pending.max(Some(Scope::Full));
                }
            }
            Command::Shutdown => break,
        }
    }

    nih_plug::nih_log!("worker: stopped");
}

fn commit(engine: &Engine, scope: Scope, settings: &EffectSettings) {
    match scope {
        Scope::Reassemble => report("reassemble", engine.reassemble(settings)),
        _ => report("render", engine.process(settings)),
    }
}

fn report(what: &str, result: Result<RunOutcome>) {
    match result {
        Ok(RunOutcome::Rendered(generation)) => {
            nih_plug::nih_trace!("worker: {} published #{}", what, generation)
        }
        Ok(RunOutcome::Busy) => nih_plug::nih_warn!("worker: {} dropped, engine busy", what),
        Ok(outcome) => nih_plug::nih_trace!("worker: {} skipped ({:?})", what, outcome),
        Err(err) => nih_plug::nih_error!("worker: {} failed: {}", what, err),
    }
}

// ─────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────
