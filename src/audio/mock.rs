// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use tracing::{info, span, Level};

use super::{AudioError, Session, SoundStatus, StatusCallback};
use crate::volume::Volume;

/// Every call made against the mock engine, in order.
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    Configure(Session),
    Load { uri: String, volume: f32, sound: usize },
    SetVolume { sound: usize, volume: f32 },
    Stop { sound: usize },
    Unload { sound: usize },
}

/// A mock engine. Doesn't actually play anything.
#[derive(Clone)]
pub struct Engine {
    name: String,
    calls: Arc<Mutex<Vec<Call>>>,
    sounds: Arc<Mutex<Vec<Arc<Sound>>>>,
    next_id: Arc<AtomicUsize>,
    loads_started: Arc<AtomicUsize>,
    fail_loads: Arc<AtomicBool>,
    fail_stops: Arc<AtomicBool>,
    /// When set, loads wait until the paired sender sends or is dropped.
    hold: Arc<Mutex<Option<crossbeam_channel::Receiver<()>>>>,
}

impl Engine {
    /// Gets the given mock engine.
    pub fn get(name: &str) -> Engine {
        Engine {
            name: name.to_string(),
            calls: Arc::new(Mutex::new(Vec::new())),
            sounds: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(AtomicUsize::new(0)),
            loads_started: Arc::new(AtomicUsize::new(0)),
            fail_loads: Arc::new(AtomicBool::new(false)),
            fail_stops: Arc::new(AtomicBool::new(false)),
            hold: Arc::new(Mutex::new(None)),
        }
    }

    /// Returns every call made so far.
    #[cfg(test)]
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Returns every sound loaded so far.
    #[cfg(test)]
    pub fn sounds(&self) -> Vec<Arc<Sound>> {
        self.sounds.lock().clone()
    }

    /// Returns the number of loads that have begun, including ones still held.
    #[cfg(test)]
    pub fn loads_started(&self) -> usize {
        self.loads_started.load(Ordering::Relaxed)
    }

    /// Returns the number of sounds that are loaded and not yet unloaded.
    #[cfg(test)]
    pub fn live_sounds(&self) -> usize {
        self.sounds
            .lock()
            .iter()
            .filter(|sound| !sound.is_unloaded())
            .count()
    }

    /// Returns true if any sound is currently playing.
    #[cfg(test)]
    pub fn is_playing(&self) -> bool {
        self.sounds.lock().iter().any(|sound| sound.is_playing())
    }

    /// Makes subsequent loads fail.
    #[cfg(test)]
    pub fn fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::Relaxed);
    }

    /// Makes stop fail on every sound.
    #[cfg(test)]
    pub fn fail_stops(&self, fail: bool) {
        self.fail_stops.store(fail, Ordering::Relaxed);
    }

    /// Makes subsequent loads block until the returned sender sends or is dropped.
    #[cfg(test)]
    pub fn hold_loads(&self) -> crossbeam_channel::Sender<()> {
        let (tx, rx) = crossbeam_channel::bounded(0);
        *self.hold.lock() = Some(rx);
        tx
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

impl super::Engine for Engine {
    fn configure(&self, session: &Session) -> Result<(), AudioError> {
        info!(engine = self.name, ?session, "Configuring session (mock).");
        self.record(Call::Configure(session.clone()));
        Ok(())
    }

    fn load(&self, uri: &str, volume: Volume) -> Result<Arc<dyn super::Sound>, AudioError> {
        let span = span!(Level::INFO, "load stream (mock)");
        let _enter = span.enter();

        let attempt = self.loads_started.fetch_add(1, Ordering::Relaxed) + 1;

        let hold = self.hold.lock().clone();
        if let Some(hold) = hold {
            // Either a release or a dropped sender lets the load through.
            let _ = hold.recv();
        }

        if self.fail_loads.load(Ordering::Relaxed) {
            info!(engine = self.name, uri, attempt, "Failing load (mock).");
            return Err(AudioError::Device(format!("{} refused to load {}", self.name, uri)));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        info!(
            engine = self.name,
            uri,
            volume = volume.value(),
            sound = id,
            "Loaded stream (mock)."
        );
        self.record(Call::Load {
            uri: uri.to_string(),
            volume: volume.value(),
            sound: id,
        });

        let sound = Arc::new(Sound {
            id,
            volume: AtomicU32::new(volume.value().to_bits()),
            stopped: AtomicBool::new(false),
            unloaded: AtomicBool::new(false),
            fail_stops: self.fail_stops.clone(),
            calls: self.calls.clone(),
            status: Mutex::new(None),
        });
        self.sounds.lock().push(sound.clone());
        let sound: Arc<dyn super::Sound> = sound;
        Ok(sound)
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}

/// A sound produced by the mock engine.
pub struct Sound {
    id: usize,
    volume: AtomicU32,
    stopped: AtomicBool,
    unloaded: AtomicBool,
    fail_stops: Arc<AtomicBool>,
    calls: Arc<Mutex<Vec<Call>>>,
    status: Mutex<Option<StatusCallback>>,
}

impl Sound {
    /// The effective volume of the sound.
    #[cfg(test)]
    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    /// Returns true if the sound is loaded and hasn't been stopped.
    #[cfg(test)]
    pub fn is_playing(&self) -> bool {
        !self.stopped.load(Ordering::Relaxed) && !self.unloaded.load(Ordering::Relaxed)
    }

    /// Returns true once the sound has been unloaded.
    #[cfg(test)]
    pub fn is_unloaded(&self) -> bool {
        self.unloaded.load(Ordering::Relaxed)
    }

    /// Sends a status update to the registered listener, if any.
    #[cfg(test)]
    pub fn emit(&self, status: SoundStatus) -> bool {
        match self.status.lock().as_ref() {
            Some(callback) => {
                callback(status);
                true
            }
            None => false,
        }
    }
}

impl super::Sound for Sound {
    fn set_volume(&self, volume: Volume) -> Result<(), AudioError> {
        if self.unloaded.load(Ordering::Relaxed) {
            return Err(AudioError::Unloaded);
        }
        self.calls.lock().push(Call::SetVolume {
            sound: self.id,
            volume: volume.value(),
        });
        self.volume.store(volume.value().to_bits(), Ordering::Relaxed);
        Ok(())
    }

    fn stop(&self) -> Result<(), AudioError> {
        self.calls.lock().push(Call::Stop { sound: self.id });
        if self.fail_stops.load(Ordering::Relaxed) {
            return Err(AudioError::Device(format!("sound {} refused to stop", self.id)));
        }
        self.stopped.store(true, Ordering::Relaxed);
        info!(
            sound = self.id,
            volume = f32::from_bits(self.volume.load(Ordering::Relaxed)),
            "Stopped (mock)."
        );
        if let Some(callback) = self.status.lock().as_ref() {
            callback(SoundStatus::Stopped);
        }
        Ok(())
    }

    fn unload(&self) -> Result<(), AudioError> {
        self.calls.lock().push(Call::Unload { sound: self.id });
        if self.unloaded.swap(true, Ordering::Relaxed) {
            return Ok(());
        }
        info!(
            sound = self.id,
            stopped = self.stopped.load(Ordering::Relaxed),
            "Unloaded (mock)."
        );
        self.status.lock().take();
        Ok(())
    }

    fn on_status(&self, callback: StatusCallback) {
        *self.status.lock() = Some(callback);
    }
}
