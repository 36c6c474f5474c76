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
    error::Error,
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, SendTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, span, warn, Level};

use super::decoder::{remix, Resampler, StreamDecoder};
use super::{AudioError, Session, SoundStatus, StatusCallback};
use crate::{config, volume::Volume};

/// Number of decoded chunks that can be queued ahead of the output.
const QUEUED_CHUNKS: usize = 64;
/// How often blocked workers check whether they should exit.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Commands understood by the output thread.
enum OutputCommand {
    Pause,
    Shutdown,
}

/// An engine that plays network streams through a cpal output device.
pub struct Engine {
    /// The name of the device.
    name: String,
    /// The underlying cpal device.
    device: cpal::Device,
    /// The most recently applied session.
    session: Mutex<Session>,
    /// Number of sounds that are loaded and not yet unloaded.
    live: Arc<AtomicUsize>,
    /// How long to wait for the stream server to accept the connection.
    connect_timeout: Duration,
    /// How long a single read from the stream may stall.
    read_timeout: Duration,
}

impl Engine {
    /// Lists the names of cpal output devices.
    pub fn list() -> Result<Vec<String>, Box<dyn Error>> {
        // Suppress noisy output here.
        let _shh_stdout = shh::stdout()?;
        let _shh_stderr = shh::stderr()?;

        let mut names: Vec<String> = Vec::new();
        for host_id in cpal::available_hosts() {
            let host_devices = match cpal::host_from_id(host_id)?.output_devices() {
                Ok(host_devices) => host_devices,
                Err(e) => {
                    error!(
                        err = e.to_string(),
                        host = host_id.name(),
                        "Unable to list devices for host"
                    );
                    continue;
                }
            };

            for device in host_devices {
                if device.default_output_config().is_err() {
                    continue;
                }
                if let Ok(name) = device.name() {
                    names.push(name.trim().to_string());
                }
            }
        }

        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Gets the configured device. "default" selects the host's default output.
    pub fn get(config: &config::Audio) -> Result<Engine, Box<dyn Error>> {
        let name = config.device();
        let host = cpal::default_host();
        let device = if name == "default" {
            host.default_output_device()
                .ok_or("no default output device available")?
        } else {
            host.output_devices()?
                .find(|device| device.name().is_ok_and(|n| n.trim() == name))
                .ok_or_else(|| format!("no device found with name {}", name))?
        };

        Ok(Engine {
            name: device.name()?.trim().to_string(),
            device,
            session: Mutex::new(Session::default()),
            live: Arc::new(AtomicUsize::new(0)),
            connect_timeout: config.connect_timeout(),
            read_timeout: config.read_timeout(),
        })
    }

    /// Starts the thread that owns the cpal stream. The stream is created inside the thread
    /// and the result of creating it is reported back before this returns.
    fn start_output_thread(
        &self,
        feed: Feed,
        control_rx: Receiver<OutputCommand>,
    ) -> Result<(thread::JoinHandle<()>, u32, u16), AudioError> {
        let supported = self
            .device
            .default_output_config()
            .map_err(|e| AudioError::Device(e.to_string()))?;
        let sample_format = supported.sample_format();
        let stream_config: cpal::StreamConfig = supported.into();
        let sample_rate = stream_config.sample_rate;
        let channels = stream_config.channels;

        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), AudioError>>(1);
        let device = self.device.clone();
        let output_thread = thread::spawn(move || {
            let stream = match sample_format {
                cpal::SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, feed),
                cpal::SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, feed),
                cpal::SampleFormat::I32 => build_stream::<i32>(&device, &stream_config, feed),
                cpal::SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, feed),
                other => Err(AudioError::Device(format!(
                    "unsupported sample format {}",
                    other
                ))),
            };
            let stream = match stream.and_then(|stream| {
                stream.play()?;
                Ok(stream)
            }) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            info!(sample_rate, channels, "Output stream started.");

            // Keep the stream alive until told otherwise.
            loop {
                match control_rx.recv() {
                    Ok(OutputCommand::Pause) => {
                        if let Err(e) = stream.pause() {
                            warn!(err = e.to_string(), "Unable to pause output stream");
                        }
                    }
                    Ok(OutputCommand::Shutdown) | Err(_) => break,
                }
            }
            debug!("Output stream closed.");
        });

        match ready_rx.recv() {
            Ok(Ok(())) => Ok((output_thread, sample_rate, channels)),
            Ok(Err(e)) => {
                let _ = output_thread.join();
                Err(e)
            }
            Err(_) => Err(AudioError::Worker(
                "output thread exited before starting".to_string(),
            )),
        }
    }
}

impl super::Engine for Engine {
    fn configure(&self, session: &Session) -> Result<(), AudioError> {
        if session.play_through_earpiece {
            warn!(device = self.name, "Earpiece routing is not available, using the device.");
        }
        info!(
            device = self.name,
            background = session.stays_active_in_background,
            interruption = ?session.interruption,
            silent_mode = session.plays_in_silent_mode,
            duck_others = session.duck_others,
            "Configured audio session."
        );
        *self.session.lock() = session.clone();
        Ok(())
    }

    fn load(&self, uri: &str, volume: Volume) -> Result<Arc<dyn super::Sound>, AudioError> {
        let span = span!(Level::INFO, "load stream (cpal)");
        let _enter = span.enter();

        let exclusive = self.session.lock().is_exclusive();
        if exclusive && self.live.load(Ordering::Relaxed) > 0 {
            return Err(AudioError::Busy);
        }

        let mut decoder = open_stream(uri, self.connect_timeout, self.read_timeout)?;

        // Decode the first packet before touching the device so a bad stream fails the load.
        let first_chunk = decoder
            .next_chunk()?
            .ok_or_else(|| AudioError::Format("stream ended before any audio".to_string()))?;

        let gain = Arc::new(AtomicU32::new(volume.value().to_bits()));
        let (chunk_tx, chunk_rx) = crossbeam_channel::bounded::<Vec<f32>>(QUEUED_CHUNKS);
        let (control_tx, control_rx) = crossbeam_channel::unbounded();
        let underrun = Arc::new(AtomicBool::new(false));
        let feed = Feed {
            chunks: chunk_rx,
            pending: Vec::new(),
            position: 0,
            gain: gain.clone(),
            underrun: underrun.clone(),
        };
        let (output_thread, sample_rate, channels) = self.start_output_thread(feed, control_rx)?;

        info!(
            device = self.name,
            stream_rate = decoder.sample_rate(),
            stream_channels = decoder.channels(),
            output_rate = sample_rate,
            output_channels = channels,
            volume = volume.value(),
            "Playing stream."
        );

        let halt = Arc::new(AtomicBool::new(false));
        let status: Arc<Mutex<Option<StatusCallback>>> = Arc::new(Mutex::new(None));
        {
            let halt = halt.clone();
            let status = status.clone();
            let uri = uri.to_string();
            // Not joined on unload: a read in progress may hold it for up to the read timeout,
            // and it exits on its own once it sees the halt flag or the output side disconnects.
            thread::spawn(move || {
                decode_loop(
                    decoder,
                    first_chunk,
                    Output {
                        rate: sample_rate,
                        channels,
                        chunks: chunk_tx,
                        underrun,
                    },
                    halt,
                    status,
                );
                debug!(uri, "Decoder finished.");
            });
        }

        self.live.fetch_add(1, Ordering::Relaxed);
        let sound: Arc<dyn super::Sound> = Arc::new(Sound {
            uri: uri.to_string(),
            gain,
            halt,
            control_tx,
            output_thread: Mutex::new(Some(output_thread)),
            status,
            live: self.live.clone(),
        });
        Ok(sound)
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Connects to the stream and prepares a decoder for it.
fn open_stream(
    uri: &str,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<StreamDecoder, AudioError> {
    // The blocking client applies the timeout to each read of the body, so a live stream is
    // never cut off while data keeps arriving.
    let client = reqwest::blocking::Client::builder()
        .connect_timeout(connect_timeout)
        .timeout(read_timeout)
        .build()?;
    let response = client.get(uri).send()?;
    if !response.status().is_success() {
        return Err(AudioError::Status(response.status()));
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string());
    info!(uri, content_type, "Connected to stream.");

    StreamDecoder::open(response, content_type.as_deref())
}

/// The output side of a sound: pulls decoded chunks and applies the current gain.
struct Feed {
    chunks: Receiver<Vec<f32>>,
    pending: Vec<f32>,
    position: usize,
    gain: Arc<AtomicU32>,
    /// Set when the output had to play silence because nothing was queued.
    underrun: Arc<AtomicBool>,
}

impl Feed {
    /// Fills the buffer, writing silence on underrun.
    fn fill<T>(&mut self, data: &mut [T])
    where
        T: cpal::Sample + cpal::FromSample<f32>,
    {
        let gain = f32::from_bits(self.gain.load(Ordering::Relaxed));
        for sample in data.iter_mut() {
            if self.position >= self.pending.len() {
                match self.chunks.try_recv() {
                    Ok(chunk) => {
                        self.pending = chunk;
                        self.position = 0;
                    }
                    Err(_) => {
                        self.underrun.store(true, Ordering::Relaxed);
                        *sample = T::from_sample(0.0f32);
                        continue;
                    }
                }
            }
            *sample = T::from_sample(self.pending[self.position] * gain);
            self.position += 1;
        }
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut feed: Feed,
) -> Result<cpal::Stream, AudioError>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    Ok(device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| feed.fill(data),
        |err| error!("CPAL output stream error: {}", err),
        None,
    )?)
}

/// Where decoded audio goes.
struct Output {
    rate: u32,
    channels: u16,
    chunks: Sender<Vec<f32>>,
    /// Raised by the output when it runs dry.
    underrun: Arc<AtomicBool>,
}

/// Decodes packets, converts them to the output format, and queues them for the output.
fn decode_loop(
    mut decoder: StreamDecoder,
    first_chunk: Vec<f32>,
    output: Output,
    halt: Arc<AtomicBool>,
    status: Arc<Mutex<Option<StatusCallback>>>,
) {
    let report = |sound_status: SoundStatus| {
        if let Some(callback) = status.lock().as_ref() {
            callback(sound_status);
        }
    };

    let mut resampler = Resampler::new(decoder.sample_rate(), output.rate, output.channels);
    let mut next = Some(first_chunk);
    let mut buffering = false;

    while !halt.load(Ordering::Relaxed) {
        if !buffering && output.underrun.load(Ordering::Relaxed) {
            buffering = true;
            report(SoundStatus::Buffering);
        }

        let chunk = match next.take() {
            Some(chunk) => chunk,
            None => match decoder.next_chunk() {
                Ok(Some(chunk)) => chunk,
                Ok(None) => {
                    info!("Stream ended.");
                    report(SoundStatus::Finished);
                    return;
                }
                Err(e) => {
                    error!(err = e.to_string(), "Stream failed while playing");
                    report(SoundStatus::Failed);
                    return;
                }
            },
        };

        let mut samples = resampler.process(&remix(&chunk, decoder.channels(), output.channels));
        loop {
            match output.chunks.send_timeout(samples, POLL_INTERVAL) {
                Ok(()) => break,
                Err(SendTimeoutError::Timeout(unsent)) => {
                    if halt.load(Ordering::Relaxed) {
                        return;
                    }
                    samples = unsent;
                }
                Err(SendTimeoutError::Disconnected(_)) => return,
            }
        }

        if buffering {
            buffering = false;
            output.underrun.store(false, Ordering::Relaxed);
            report(SoundStatus::Playing);
        }
    }
}

/// A stream playing through a cpal device.
struct Sound {
    uri: String,
    gain: Arc<AtomicU32>,
    halt: Arc<AtomicBool>,
    control_tx: Sender<OutputCommand>,
    output_thread: Mutex<Option<thread::JoinHandle<()>>>,
    status: Arc<Mutex<Option<StatusCallback>>>,
    live: Arc<AtomicUsize>,
}

impl super::Sound for Sound {
    fn set_volume(&self, volume: Volume) -> Result<(), AudioError> {
        if self.output_thread.lock().is_none() {
            return Err(AudioError::Unloaded);
        }
        self.gain.store(volume.value().to_bits(), Ordering::Relaxed);
        Ok(())
    }

    fn stop(&self) -> Result<(), AudioError> {
        if self.halt.swap(true, Ordering::Relaxed) {
            return Ok(());
        }
        info!(uri = self.uri, "Stopping stream.");
        // The output thread may already be gone if unload ran first.
        let _ = self.control_tx.send(OutputCommand::Pause);
        if let Some(callback) = self.status.lock().as_ref() {
            callback(SoundStatus::Stopped);
        }
        Ok(())
    }

    fn unload(&self) -> Result<(), AudioError> {
        let output_thread = match self.output_thread.lock().take() {
            Some(output_thread) => output_thread,
            None => return Ok(()),
        };

        self.halt.store(true, Ordering::Relaxed);
        self.status.lock().take();
        let _ = self.control_tx.send(OutputCommand::Shutdown);
        self.live.fetch_sub(1, Ordering::Relaxed);

        info!(uri = self.uri, "Unloading stream.");
        output_thread
            .join()
            .map_err(|_| AudioError::Worker("output thread panicked".to_string()))
    }

    fn on_status(&self, callback: StatusCallback) {
        *self.status.lock() = Some(callback);
    }
}

#[cfg(test)]
mod test {
    use std::{
        io::{Cursor, Read, Write},
        net::TcpListener,
        sync::{
            atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
            Arc,
        },
        thread,
        time::{Duration, Instant},
    };

    use parking_lot::Mutex;

    use crate::audio::{AudioError, Sound as _, SoundStatus, StatusCallback};
    use crate::testutil::wav_bytes;
    use crate::volume::Volume;

    use super::{
        decode_loop, open_stream, Feed, Output, OutputCommand, Sound, StreamDecoder,
        POLL_INTERVAL,
    };

    fn recv_command(rx: &crossbeam_channel::Receiver<OutputCommand>) -> Option<&'static str> {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(OutputCommand::Pause) => Some("pause"),
            Ok(OutputCommand::Shutdown) => Some("shutdown"),
            Err(_) => None,
        }
    }

    #[test]
    fn test_feed_applies_gain_and_fills_silence() {
        let (tx, rx) = crossbeam_channel::bounded(4);
        let gain = Arc::new(AtomicU32::new(0.5f32.to_bits()));
        let mut feed = Feed {
            chunks: rx,
            pending: Vec::new(),
            position: 0,
            gain: gain.clone(),
            underrun: Arc::new(AtomicBool::new(false)),
        };

        tx.send(vec![1.0, -1.0]).unwrap();
        let mut data = [9.0f32; 2];
        feed.fill(&mut data);
        assert_eq!([0.5, -0.5], data);
        assert!(!feed.underrun.load(Ordering::Relaxed));

        tx.send(vec![0.5]).unwrap();
        let mut data = [9.0f32; 3];
        feed.fill(&mut data);
        assert_eq!([0.25, 0.0, 0.0], data);
        assert!(feed.underrun.load(Ordering::Relaxed));
        feed.underrun.store(false, Ordering::Relaxed);

        // Gain changes apply to the next buffer without dropping queued audio.
        tx.send(vec![1.0, 1.0]).unwrap();
        gain.store(1.0f32.to_bits(), Ordering::Relaxed);
        let mut data = [0.0f32; 2];
        feed.fill(&mut data);
        assert_eq!([1.0, 1.0], data);
    }

    #[test]
    fn test_sound_lifecycle() {
        let (control_tx, control_rx) = crossbeam_channel::unbounded();
        let live = Arc::new(AtomicUsize::new(1));
        let output_thread = std::thread::spawn(|| {});
        let sound = Sound {
            uri: "http://localhost/stream".to_string(),
            gain: Arc::new(AtomicU32::new(1.0f32.to_bits())),
            halt: Arc::new(Default::default()),
            control_tx,
            output_thread: Mutex::new(Some(output_thread)),
            status: Arc::new(Mutex::new(None)),
            live: live.clone(),
        };

        sound.set_volume(Volume::new(0.25).unwrap()).unwrap();
        assert_eq!(0.25, f32::from_bits(sound.gain.load(Ordering::Relaxed)));

        sound.stop().unwrap();
        assert_eq!(Some("pause"), recv_command(&control_rx));
        // Stopping twice sends nothing new.
        sound.stop().unwrap();
        assert_eq!(None, recv_command(&control_rx));

        sound.unload().unwrap();
        assert_eq!(Some("shutdown"), recv_command(&control_rx));
        assert_eq!(0, live.load(Ordering::Relaxed));

        sound.unload().unwrap();
        assert_eq!(0, live.load(Ordering::Relaxed));
        assert!(sound.set_volume(Volume::new(0.5).unwrap()).is_err());
    }

    /// Runs the decode loop over a short WAV stream and returns the statuses it reported.
    fn run_decode_loop(underrun: bool) -> (Vec<SoundStatus>, usize) {
        let samples: Vec<i16> = (0..4000).map(|i| (i % 100) as i16).collect();
        let bytes = wav_bytes(&samples, 1, 8000).unwrap();
        let mut decoder = StreamDecoder::open(Cursor::new(bytes), Some("audio/wav")).unwrap();
        let first_chunk = decoder.next_chunk().unwrap().unwrap();

        let statuses = Arc::new(Mutex::new(Vec::new()));
        let callback: StatusCallback = {
            let statuses = statuses.clone();
            Box::new(move |status| statuses.lock().push(status))
        };
        let (chunk_tx, chunk_rx) = crossbeam_channel::unbounded();
        decode_loop(
            decoder,
            first_chunk,
            Output {
                rate: 8000,
                channels: 1,
                chunks: chunk_tx,
                underrun: Arc::new(AtomicBool::new(underrun)),
            },
            Arc::new(AtomicBool::new(false)),
            Arc::new(Mutex::new(Some(callback))),
        );

        let queued: usize = chunk_rx.try_iter().map(|chunk| chunk.len()).sum();
        let statuses = statuses.lock().clone();
        (statuses, queued)
    }

    #[test]
    fn test_decode_loop_without_underrun() {
        // A full queue is not a stall, so nothing but the end of the stream is reported.
        let (statuses, queued) = run_decode_loop(false);
        assert_eq!(vec![SoundStatus::Finished], statuses);
        assert_eq!(4000, queued);
    }

    #[test]
    fn test_decode_loop_reports_underrun_recovery() {
        let (statuses, queued) = run_decode_loop(true);
        assert_eq!(
            vec![
                SoundStatus::Buffering,
                SoundStatus::Playing,
                SoundStatus::Finished
            ],
            statuses
        );
        assert_eq!(4000, queued);
    }

    #[test]
    fn test_open_stream_gives_up_on_stalled_server() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);
        let server = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request);
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Type: audio/mpeg\r\n\r\n")
                .unwrap();
            // Send headers, then never any audio.
            let _ = done_rx.recv_timeout(Duration::from_secs(10));
        });

        let start = Instant::now();
        let result = open_stream(
            &format!("http://{}/listen", addr),
            Duration::from_secs(2),
            Duration::from_secs(1),
        );
        assert!(result.is_err());
        assert!(start.elapsed() < Duration::from_secs(5));

        let _ = done_tx.send(());
        server.join().unwrap();
    }

    #[test]
    fn test_open_stream_rejects_error_status() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request);
            socket
                .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n")
                .unwrap();
        });

        let result = open_stream(
            &format!("http://{}/listen", addr),
            Duration::from_secs(2),
            Duration::from_secs(2),
        );
        match result {
            Err(AudioError::Status(status)) => assert_eq!(404, status.as_u16()),
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("a 404 should not open"),
        }
        server.join().unwrap();
    }
}
