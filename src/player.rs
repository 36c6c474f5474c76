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
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use tokio::{
    sync::{mpsc, watch, Mutex},
    task::JoinHandle,
};
use tracing::{debug, error, info, span, warn, Level, Span};

use crate::{
    audio::{self, AudioError, Session, Sound, SoundStatus},
    config,
    store::Store,
    ui::{Alert, Notifier},
    volume::{Volume, DEFAULT_VOLUME},
};

/// Where the player is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Loading,
    Playing,
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Loading => "loading",
            PlaybackState::Playing => "playing",
        };
        write!(f, "{}", state)
    }
}

/// What the screen shows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Status {
    pub state: PlaybackState,
    pub volume_percent: u8,
}

/// The playback slot. Only the Playing variant holds a sound, so a sound can't outlive the
/// state that owns it.
enum Slot {
    Idle,
    Loading {
        /// Set when the player is shut down before the load resolves.
        superseded: Arc<AtomicBool>,
    },
    Playing(Arc<dyn Sound>),
}

impl Slot {
    fn state(&self) -> PlaybackState {
        match self {
            Slot::Idle => PlaybackState::Idle,
            Slot::Loading { .. } => PlaybackState::Loading,
            Slot::Playing(_) => PlaybackState::Playing,
        }
    }
}

struct Inner {
    slot: Slot,
    volume: Volume,
}

/// Plays the radio stream and owns the listener's volume.
pub struct Player {
    engine: Arc<dyn audio::Engine>,
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
    stream_url: String,
    volume_key: String,
    session: Session,
    inner: Mutex<Inner>,
    status_tx: watch::Sender<Status>,
    /// Feeds the persistence writer. Taken on shutdown so the writer can drain and exit.
    persist_tx: parking_lot::Mutex<Option<mpsc::UnboundedSender<Volume>>>,
    writer: parking_lot::Mutex<Option<JoinHandle<()>>>,
    /// Set by shutdown. No new loads start after this.
    closed: AtomicBool,
    span: Span,
}

impl Player {
    /// Creates a new player. Must be called from within a tokio runtime.
    pub fn new(
        engine: Arc<dyn audio::Engine>,
        store: Arc<dyn Store>,
        notifier: Arc<dyn Notifier>,
        config: &config::Radio,
    ) -> Player {
        let (persist_tx, persist_rx) = mpsc::unbounded_channel();
        let writer = Player::spawn_writer(store.clone(), config.volume_key.clone(), persist_rx);
        let (status_tx, _) = watch::channel(Status {
            state: PlaybackState::Idle,
            volume_percent: DEFAULT_VOLUME.percent(),
        });

        Player {
            engine,
            store,
            notifier,
            stream_url: config.stream_url.clone(),
            volume_key: config.volume_key.clone(),
            session: config.session.clone(),
            inner: Mutex::new(Inner {
                slot: Slot::Idle,
                volume: DEFAULT_VOLUME,
            }),
            status_tx,
            persist_tx: parking_lot::Mutex::new(Some(persist_tx)),
            writer: parking_lot::Mutex::new(Some(writer)),
            closed: AtomicBool::new(false),
            span: span!(Level::INFO, "player"),
        }
    }

    /// Loads the saved volume. Never fails: anything unreadable falls back to full volume.
    pub async fn initialize(&self) {
        let _enter = self.span.enter();

        let store = self.store.clone();
        let key = self.volume_key.clone();
        let volume = match tokio::task::spawn_blocking(move || store.get(&key)).await {
            Ok(Ok(Some(value))) => match value.parse::<Volume>() {
                Ok(volume) => volume,
                Err(e) => {
                    warn!(
                        err = e.to_string(),
                        value, "Saved volume is invalid, using the default."
                    );
                    DEFAULT_VOLUME
                }
            },
            Ok(Ok(None)) => {
                info!("No saved volume, using the default.");
                DEFAULT_VOLUME
            }
            Ok(Err(e)) => {
                warn!(
                    err = e.to_string(),
                    "Unable to read saved volume, using the default."
                );
                DEFAULT_VOLUME
            }
            Err(e) => {
                error!(err = e.to_string(), "Volume read task failed");
                DEFAULT_VOLUME
            }
        };

        let mut inner = self.inner.lock().await;
        inner.volume = volume;
        if let Slot::Playing(sound) = &inner.slot {
            Player::push_volume(sound.as_ref(), volume);
        }
        info!(volume = volume.value(), "Volume restored.");
        self.publish(&inner);
    }

    /// Starts the stream when idle and stops it when playing. Ignored while a load is in flight.
    pub async fn toggle_playback(&self) {
        let _enter = self.span.enter();

        let mut inner = self.inner.lock().await;
        let playing = match &inner.slot {
            Slot::Loading { .. } => {
                info!("Stream is still loading, ignoring toggle.");
                return;
            }
            Slot::Playing(sound) => Some(sound.clone()),
            Slot::Idle if self.closed.load(Ordering::SeqCst) => {
                info!("Player is shut down, ignoring toggle.");
                return;
            }
            Slot::Idle => None,
        };

        if let Some(sound) = playing {
            info!(uri = self.stream_url, "Stopping stream.");
            // The lock stays held until the sound is released.
            Player::release(sound).await;
            inner.slot = Slot::Idle;
            self.publish(&inner);
            return;
        }

        let superseded = Arc::new(AtomicBool::new(false));
        let volume = inner.volume;
        inner.slot = Slot::Loading {
            superseded: superseded.clone(),
        };
        self.publish(&inner);
        drop(inner);

        info!(uri = self.stream_url, volume = volume.value(), "Loading stream.");
        let result = self.load(volume).await;

        let mut inner = self.inner.lock().await;
        let current = matches!(&inner.slot, Slot::Loading { superseded: s } if Arc::ptr_eq(s, &superseded));
        if superseded.load(Ordering::SeqCst) || !current {
            drop(inner);
            if let Ok(sound) = result {
                info!("Load finished after shutdown, releasing stream.");
                Player::release(sound).await;
            }
            return;
        }

        match result {
            Ok(sound) => {
                // The volume may have moved while the load was in flight.
                if inner.volume != volume {
                    Player::push_volume(sound.as_ref(), inner.volume);
                }
                sound.on_status(Player::status_logger(self.stream_url.clone()));
                inner.slot = Slot::Playing(sound);
                info!(uri = self.stream_url, "Stream is playing.");
            }
            Err(e) => {
                error!(
                    err = e.to_string(),
                    uri = self.stream_url,
                    "Unable to play the stream"
                );
                inner.slot = Slot::Idle;
                self.notifier.notify(&Alert::stream_error());
            }
        }
        self.publish(&inner);
    }

    /// Sets the volume. Out of range values are clamped, NaN is ignored.
    pub async fn set_volume(&self, value: f32) {
        match Volume::new(value) {
            Ok(volume) => self.change_volume(|_| volume).await,
            Err(e) => {
                let _enter = self.span.enter();
                warn!(err = e.to_string(), "Ignoring volume change.");
            }
        }
    }

    /// Moves the volume by the given number of percentage points.
    pub async fn step_volume(&self, percent: i16) {
        self.change_volume(|volume| volume.step(percent)).await
    }

    /// The current playback state.
    pub fn state(&self) -> PlaybackState {
        self.status_tx.borrow().state
    }

    /// The current volume.
    pub async fn volume(&self) -> Volume {
        self.inner.lock().await.volume
    }

    /// Subscribes to status changes.
    pub fn status(&self) -> watch::Receiver<Status> {
        self.status_tx.subscribe()
    }

    /// Releases everything the player holds. A load still in flight releases its sound as soon
    /// as it resolves. Pending volume writes are flushed before this returns.
    pub async fn shutdown(&self) {
        let _enter = self.span.enter();

        {
            let mut inner = self.inner.lock().await;
            self.closed.store(true, Ordering::SeqCst);
            match std::mem::replace(&mut inner.slot, Slot::Idle) {
                Slot::Playing(sound) => {
                    info!("Stopping stream for shutdown.");
                    Player::release(sound).await;
                }
                Slot::Loading { superseded } => {
                    info!("Abandoning stream that is still loading.");
                    superseded.store(true, Ordering::SeqCst);
                }
                Slot::Idle => {}
            }
            self.publish(&inner);
        }

        let persist_tx = self.persist_tx.lock().take();
        drop(persist_tx);
        let writer = self.writer.lock().take();
        if let Some(writer) = writer {
            if let Err(e) = writer.await {
                error!(err = e.to_string(), "Volume writer failed");
            }
        }
        info!("Player shut down.");
    }

    async fn change_volume<F>(&self, change: F)
    where
        F: FnOnce(Volume) -> Volume,
    {
        let _enter = self.span.enter();

        let mut inner = self.inner.lock().await;
        let volume = change(inner.volume);
        inner.volume = volume;
        self.persist(volume);
        if let Slot::Playing(sound) = &inner.slot {
            Player::push_volume(sound.as_ref(), volume);
        }
        debug!(volume = volume.value(), "Volume changed.");
        self.publish(&inner);
    }

    async fn load(&self, volume: Volume) -> Result<Arc<dyn Sound>, AudioError> {
        let engine = self.engine.clone();
        let session = self.session.clone();
        let uri = self.stream_url.clone();
        match tokio::task::spawn_blocking(move || {
            engine.configure(&session)?;
            engine.load(&uri, volume)
        })
        .await
        {
            Ok(result) => result,
            Err(e) => Err(AudioError::Worker(e.to_string())),
        }
    }

    /// Stops and unloads the sound. Unload is attempted even if stop fails.
    async fn release(sound: Arc<dyn Sound>) {
        let result = tokio::task::spawn_blocking(move || {
            if let Err(e) = sound.stop() {
                warn!(err = e.to_string(), "Unable to stop stream, unloading anyway.");
            }
            if let Err(e) = sound.unload() {
                warn!(err = e.to_string(), "Unable to unload stream.");
            }
        })
        .await;
        if let Err(e) = result {
            error!(err = e.to_string(), "Stream release task failed");
        }
    }

    fn push_volume(sound: &dyn Sound, volume: Volume) {
        if let Err(e) = sound.set_volume(volume) {
            warn!(err = e.to_string(), "Unable to change stream volume.");
        }
    }

    fn persist(&self, volume: Volume) {
        match self.persist_tx.lock().as_ref() {
            Some(persist_tx) => {
                if persist_tx.send(volume).is_err() {
                    warn!("Volume writer has stopped, not saving volume.");
                }
            }
            None => warn!("Player is shut down, not saving volume."),
        }
    }

    fn publish(&self, inner: &Inner) {
        self.status_tx.send_replace(Status {
            state: inner.slot.state(),
            volume_percent: inner.volume.percent(),
        });
    }

    /// Applies volume writes one at a time in the order they were made.
    fn spawn_writer(
        store: Arc<dyn Store>,
        key: String,
        mut persist_rx: mpsc::UnboundedReceiver<Volume>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(volume) = persist_rx.recv().await {
                let store = store.clone();
                let key = key.clone();
                let value = volume.to_string();
                match tokio::task::spawn_blocking(move || store.set(&key, &value)).await {
                    Ok(Ok(())) => debug!(volume = volume.value(), "Saved volume."),
                    Ok(Err(e)) => error!(err = e.to_string(), "Unable to save volume"),
                    Err(e) => error!(err = e.to_string(), "Volume write task failed"),
                }
            }
        })
    }

    /// Logs what the sound reports. Nothing here feeds back into the player.
    fn status_logger(uri: String) -> audio::StatusCallback {
        Box::new(move |status| match status {
            SoundStatus::Buffering => info!(uri, "Stream is buffering."),
            SoundStatus::Playing => info!(uri, "Stream resumed."),
            SoundStatus::Stopped => debug!(uri, "Stream stopped."),
            SoundStatus::Finished => warn!(uri, "Stream ended."),
            SoundStatus::Failed => error!(uri, "Stream failed while playing"),
        })
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use crate::{
        audio::{
            mock::{self, Call},
            Session, SoundStatus,
        },
        config,
        store::memory,
        testutil::eventually_async,
        ui::{Alert, Recorder},
    };

    use super::{PlaybackState, Player};

    const KEY: &str = "radio_volume";

    struct Harness {
        engine: mock::Engine,
        store: Arc<memory::Store>,
        notifier: Arc<Recorder>,
        player: Arc<Player>,
    }

    fn harness(store: memory::Store) -> Harness {
        harness_with_store(Arc::new(store))
    }

    fn harness_with_store(store: Arc<memory::Store>) -> Harness {
        let engine = mock::Engine::get("mock-device");
        let notifier = Arc::new(Recorder::default());
        let player = Arc::new(Player::new(
            Arc::new(engine.clone()),
            store.clone(),
            notifier.clone(),
            &config::Radio::default(),
        ));
        Harness {
            engine,
            store,
            notifier,
            player,
        }
    }

    fn volume_percent(player: &Player) -> u8 {
        player.status().borrow().volume_percent
    }

    fn set_volumes(calls: &[Call]) -> Vec<f32> {
        calls
            .iter()
            .filter_map(|call| match call {
                Call::SetVolume { volume, .. } => Some(*volume),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_initialize_defaults_to_full_volume() {
        let h = harness(memory::Store::new());
        h.player.initialize().await;
        assert_eq!(100, volume_percent(&h.player));
        assert_eq!(1.0, h.player.volume().await.value());
        assert_eq!(PlaybackState::Idle, h.player.state());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_initialize_falls_back_on_bad_state() {
        let h = harness(memory::Store::with(KEY, "loud"));
        h.player.initialize().await;
        assert_eq!(100, volume_percent(&h.player));

        let h = harness(memory::Store::with(KEY, "0.4"));
        h.store.fail_reads(true);
        h.player.initialize().await;
        assert_eq!(100, volume_percent(&h.player));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_volume_survives_restart() {
        let store = Arc::new(memory::Store::new());
        let h = harness_with_store(store.clone());
        h.player.initialize().await;
        h.player.set_volume(0.42).await;
        assert_eq!(42, volume_percent(&h.player));
        h.player.shutdown().await;
        assert_eq!(Some("0.42".to_string()), store.peek(KEY));

        let h = harness_with_store(store);
        h.player.initialize().await;
        assert_eq!(42, volume_percent(&h.player));
        assert_eq!(0.42, h.player.volume().await.value());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_toggle_plays_and_stops() {
        let h = harness(memory::Store::new());
        h.player.initialize().await;

        h.player.toggle_playback().await;
        assert_eq!(PlaybackState::Playing, h.player.state());
        assert_eq!(1, h.engine.live_sounds());
        assert!(h.engine.is_playing());
        assert_eq!(
            vec![
                Call::Configure(Session::default()),
                Call::Load {
                    uri: config::Radio::default().stream_url,
                    volume: 1.0,
                    sound: 0,
                },
            ],
            h.engine.calls()
        );

        h.player.toggle_playback().await;
        assert_eq!(PlaybackState::Idle, h.player.state());
        assert_eq!(0, h.engine.live_sounds());
        assert!(!h.engine.is_playing());

        let calls = h.engine.calls();
        assert_eq!(
            &[Call::Stop { sound: 0 }, Call::Unload { sound: 0 }],
            &calls[2..]
        );
        assert!(h.notifier.alerts().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_load_failure_notifies_once() {
        let h = harness(memory::Store::new());
        h.engine.fail_loads(true);

        h.player.toggle_playback().await;
        assert_eq!(PlaybackState::Idle, h.player.state());
        assert_eq!(vec![Alert::stream_error()], h.notifier.alerts());
        assert_eq!(0, h.engine.live_sounds());
        assert!(h.engine.sounds().is_empty());

        // No retry happens on its own, the next toggle tries again.
        h.engine.fail_loads(false);
        h.player.toggle_playback().await;
        assert_eq!(PlaybackState::Playing, h.player.state());
        assert_eq!(1, h.notifier.alerts().len());
        assert_eq!(2, h.engine.loads_started());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_volume_changes_reach_sound_in_order() {
        let h = harness(memory::Store::new());
        h.player.initialize().await;
        h.player.toggle_playback().await;

        h.player.set_volume(0.3).await;
        h.player.set_volume(0.7).await;
        assert_eq!(70, volume_percent(&h.player));
        assert_eq!(vec![0.3, 0.7], set_volumes(&h.engine.calls()));
        assert_eq!(0.7, h.engine.sounds()[0].volume());

        h.player.shutdown().await;
        assert_eq!(
            vec![
                (KEY.to_string(), "0.3".to_string()),
                (KEY.to_string(), "0.7".to_string()),
            ],
            h.store.writes()
        );
        assert_eq!(Some("0.7".to_string()), h.store.peek(KEY));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_volume_is_clamped_and_stepped() {
        let h = harness(memory::Store::new());
        h.player.initialize().await;

        h.player.set_volume(1.5).await;
        assert_eq!(100, volume_percent(&h.player));
        h.player.set_volume(-0.5).await;
        assert_eq!(0, volume_percent(&h.player));
        h.player.set_volume(f32::NAN).await;
        assert_eq!(0, volume_percent(&h.player));

        h.player.step_volume(5).await;
        h.player.step_volume(5).await;
        assert_eq!(10, volume_percent(&h.player));
        h.player.step_volume(-20).await;
        assert_eq!(0, volume_percent(&h.player));

        h.player.shutdown().await;
        assert_eq!(Some("0".to_string()), h.store.peek(KEY));
        // The NaN never reached the store.
        assert_eq!(5, h.store.writes().len());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_toggle_while_loading_is_ignored() {
        let h = harness(memory::Store::new());
        h.player.initialize().await;
        let gate = h.engine.hold_loads();

        let toggle = {
            let player = h.player.clone();
            tokio::spawn(async move { player.toggle_playback().await })
        };
        let engine = h.engine.clone();
        eventually_async(
            || {
                let engine = engine.clone();
                async move { engine.loads_started() == 1 }
            },
            "Load never started",
        )
        .await;
        assert_eq!(PlaybackState::Loading, h.player.state());

        // A second toggle returns straight away.
        h.player.toggle_playback().await;
        assert_eq!(PlaybackState::Loading, h.player.state());

        // The volume isn't blocked by the load and is applied when it lands.
        h.player.set_volume(0.5).await;
        assert_eq!(50, volume_percent(&h.player));

        drop(gate);
        toggle.await.expect("toggle task failed");

        assert_eq!(PlaybackState::Playing, h.player.state());
        assert_eq!(1, h.engine.loads_started());
        assert_eq!(1, h.engine.live_sounds());
        assert_eq!(0.5, h.engine.sounds()[0].volume());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_shutdown_during_load_releases_late_sound() {
        let h = harness(memory::Store::new());
        let gate = h.engine.hold_loads();

        let toggle = {
            let player = h.player.clone();
            tokio::spawn(async move { player.toggle_playback().await })
        };
        let engine = h.engine.clone();
        eventually_async(
            || {
                let engine = engine.clone();
                async move { engine.loads_started() == 1 }
            },
            "Load never started",
        )
        .await;

        h.player.shutdown().await;
        assert_eq!(PlaybackState::Idle, h.player.state());

        drop(gate);
        toggle.await.expect("toggle task failed");

        assert_eq!(PlaybackState::Idle, h.player.state());
        assert_eq!(0, h.engine.live_sounds());
        let calls = h.engine.calls();
        assert!(calls.contains(&Call::Stop { sound: 0 }));
        assert!(calls.contains(&Call::Unload { sound: 0 }));
        assert!(h.notifier.alerts().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_stop_still_unloads() {
        let h = harness(memory::Store::new());
        h.player.toggle_playback().await;
        h.engine.fail_stops(true);

        h.player.toggle_playback().await;
        assert_eq!(PlaybackState::Idle, h.player.state());
        assert_eq!(0, h.engine.live_sounds());
        let calls = h.engine.calls();
        assert_eq!(
            &[Call::Stop { sound: 0 }, Call::Unload { sound: 0 }],
            &calls[2..]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_persistence_failure_keeps_volume() {
        let h = harness(memory::Store::new());
        h.store.fail_writes(true);

        h.player.set_volume(0.25).await;
        assert_eq!(25, volume_percent(&h.player));
        assert_eq!(0.25, h.player.volume().await.value());

        h.player.shutdown().await;
        assert_eq!(None, h.store.peek(KEY));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_shutdown_releases_playing_sound() {
        let h = harness(memory::Store::new());
        h.player.toggle_playback().await;
        assert_eq!(1, h.engine.live_sounds());

        h.player.shutdown().await;
        assert_eq!(PlaybackState::Idle, h.player.state());
        assert_eq!(0, h.engine.live_sounds());

        // Changes after shutdown stay in memory only and nothing new is loaded.
        h.player.set_volume(0.1).await;
        assert_eq!(10, volume_percent(&h.player));
        assert!(h.store.writes().is_empty());
        h.player.toggle_playback().await;
        assert_eq!(PlaybackState::Idle, h.player.state());
        assert_eq!(1, h.engine.loads_started());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_status_updates() {
        let h = harness(memory::Store::new());
        let mut status = h.player.status();
        h.player.initialize().await;

        h.player.toggle_playback().await;
        status.changed().await.expect("player went away");
        assert_eq!(PlaybackState::Playing, status.borrow_and_update().state);

        // The sound's listener only logs.
        let sound = h.engine.sounds()[0].clone();
        assert!(sound.emit(SoundStatus::Buffering));
        assert!(sound.emit(SoundStatus::Finished));
        assert_eq!(PlaybackState::Playing, h.player.state());
    }
}
