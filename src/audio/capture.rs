use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use tracing::{debug, error, info, warn};

use super::chunk::AudioChunk;
use super::source::{AudioSource, ChunkSink, SamplingConfig, StreamHandle, StreamSlot, StreamTable};
use crate::error::AudioError;
use crate::sync::lock;

/// Upper bound on every round trip to the device thread.
const DEVICE_REPLY_TIMEOUT: Duration = Duration::from_secs(3);

enum DeviceCommand {
    Open {
        slot: Arc<StreamSlot>,
        config: SamplingConfig,
        reply: mpsc::SyncSender<Result<(), AudioError>>,
    },
    Close {
        handle: StreamHandle,
        reply: mpsc::SyncSender<()>,
    },
    Shutdown,
}

/// Microphone input through cpal.
///
/// cpal streams stay on one dedicated device thread for their whole life;
/// chunk callbacks run on cpal's driver threads and go straight into the
/// stream's sink. A stream plays from open to close; start and pause only
/// gate delivery, so they never wait on the driver.
pub struct CpalAudioSource {
    table: Arc<StreamTable>,
    cmd_tx: mpsc::Sender<DeviceCommand>,
    actor: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl CpalAudioSource {
    /// Opens the default input device. A missing or busy device surfaces as
    /// `AudioError::DeviceUnavailable`.
    pub fn open_default() -> Result<Self, AudioError> {
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let table = Arc::new(StreamTable::new());
        let actor_table = Arc::clone(&table);

        let actor = std::thread::Builder::new()
            .name("audio-device".into())
            .spawn(move || {
                let host = cpal::default_host();
                let device = match host.default_input_device() {
                    Some(device) => device,
                    None => {
                        let _ = ready_tx.send(Err(AudioError::DeviceUnavailable(
                            "no input device available".into(),
                        )));
                        return;
                    }
                };
                info!("Audio Input Device: {}", device.name().unwrap_or_default());
                let _ = ready_tx.send(Ok(()));
                DeviceActor {
                    device,
                    table: actor_table,
                    streams: HashMap::new(),
                }
                .run(cmd_rx);
            })
            .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?;

        match ready_rx.recv_timeout(DEVICE_REPLY_TIMEOUT) {
            Ok(Ok(())) => Ok(Self {
                table,
                cmd_tx,
                actor: std::sync::Mutex::new(Some(actor)),
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AudioError::DeviceUnavailable(
                "audio device thread did not start".into(),
            )),
        }
    }

    fn request<T>(
        &self,
        build: impl FnOnce(mpsc::SyncSender<T>) -> DeviceCommand,
    ) -> Result<T, AudioError> {
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        self.cmd_tx
            .send(build(reply_tx))
            .map_err(|_| AudioError::DeviceUnavailable("audio device thread stopped".into()))?;
        reply_rx
            .recv_timeout(DEVICE_REPLY_TIMEOUT)
            .map_err(|_| AudioError::Stream("audio device thread timed out".into()))
    }
}

impl AudioSource for CpalAudioSource {
    fn open_stream(
        &self,
        config: SamplingConfig,
        sink: Box<dyn ChunkSink>,
    ) -> Result<StreamHandle, AudioError> {
        let slot = self.table.insert(sink);
        let handle = slot.handle();
        let opened = self
            .request(|reply| DeviceCommand::Open { slot, config, reply })
            .and_then(|result| result);
        if opened.is_err() {
            self.table.close(handle);
        }
        opened.map(|_| handle)
    }

    fn start(&self, handle: StreamHandle) -> Result<(), AudioError> {
        self.table.start(handle)
    }

    fn pause(&self, handle: StreamHandle) -> Result<(), AudioError> {
        self.table.pause(handle)
    }

    fn close(&self, handle: StreamHandle) {
        if let Err(e) = self.request(|reply| DeviceCommand::Close { handle, reply }) {
            warn!(stream = handle.0, "close did not complete: {}", e);
        }
    }
}

impl Drop for CpalAudioSource {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(DeviceCommand::Shutdown);
        if let Some(actor) = lock(&self.actor).take() {
            let _ = actor.join();
        }
    }
}

struct DeviceActor {
    device: cpal::Device,
    table: Arc<StreamTable>,
    streams: HashMap<StreamHandle, cpal::Stream>,
}

impl DeviceActor {
    fn run(mut self, cmd_rx: mpsc::Receiver<DeviceCommand>) {
        while let Ok(cmd) = cmd_rx.recv() {
            match cmd {
                DeviceCommand::Open { slot, config, reply } => {
                    let handle = slot.handle();
                    let result = build_stream(&self.device, config, slot).map(|stream| {
                        self.streams.insert(handle, stream);
                    });
                    let _ = reply.send(result);
                }
                DeviceCommand::Close { handle, reply } => {
                    // Waits for an in-flight callback before the device handle goes.
                    self.table.close(handle);
                    if self.streams.remove(&handle).is_some() {
                        debug!(stream = handle.0, "audio stream released");
                    }
                    let _ = reply.send(());
                }
                DeviceCommand::Shutdown => break,
            }
        }

        for handle in self.table.handles() {
            self.table.close(handle);
        }
        self.streams.clear();
        info!("Audio device thread stopped");
    }
}

fn build_stream(
    device: &cpal::Device,
    requested: SamplingConfig,
    slot: Arc<StreamSlot>,
) -> Result<cpal::Stream, AudioError> {
    let supported = select_config(device, requested.sample_rate)?;
    let channels = supported.channels() as usize;
    let config = requested.at_rate(supported.sample_rate().0);
    info!(
        "Audio Config Selected: Rate={}Hz, Channels={}, Chunk={}",
        config.sample_rate, channels, config.chunk_len
    );
    if config.sample_rate != requested.sample_rate {
        warn!(
            requested = requested.sample_rate,
            actual = config.sample_rate,
            "input device does not support the requested rate; phrases will be resampled"
        );
    }

    let mut assembler = ChunkAssembler::new(config, channels);
    let err_fn = |err: cpal::StreamError| error!("an error occurred on stream: {}", err);
    let stream_config: cpal::StreamConfig = supported.config();

    let stream = match supported.sample_format() {
        cpal::SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &_| assembler.push_f32(data, &slot),
            err_fn,
            None,
        ),
        cpal::SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _: &_| assembler.push_i16(data, &slot),
            err_fn,
            None,
        ),
        other => {
            return Err(AudioError::DeviceUnavailable(format!(
                "unsupported sample format {:?}",
                other
            )))
        }
    };

    let stream = stream.map_err(|e| match e {
        cpal::BuildStreamError::DeviceNotAvailable => {
            AudioError::DeviceUnavailable("input device disappeared".into())
        }
        other => AudioError::Stream(other.to_string()),
    })?;
    stream.play().map_err(map_play_err)?;
    Ok(stream)
}

/// Rates tried, in order, when the device cannot capture at the requested one.
const FALLBACK_RATES: [u32; 5] = [16_000, 48_000, 32_000, 44_100, 8_000];

/// Picks an input config at `rate` if the device covers it, then at the first
/// fallback rate it covers, then the device default. Mono is preferred.
fn select_config(
    device: &cpal::Device,
    rate: u32,
) -> Result<cpal::SupportedStreamConfig, AudioError> {
    let ranges: Vec<_> = device
        .supported_input_configs()
        .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?
        .collect();

    let candidates = std::iter::once(rate).chain(FALLBACK_RATES.into_iter().filter(|&r| r != rate));
    for target in candidates {
        if let Some(config) = pick_range(&ranges, target) {
            return Ok(config);
        }
    }

    device
        .default_input_config()
        .map_err(|e| AudioError::DeviceUnavailable(format!("no usable input config: {}", e)))
}

fn pick_range(
    ranges: &[cpal::SupportedStreamConfigRange],
    rate: u32,
) -> Option<cpal::SupportedStreamConfig> {
    let covering: Vec<_> = ranges
        .iter()
        .filter(|range| range.min_sample_rate().0 <= rate && range.max_sample_rate().0 >= rate)
        .collect();
    covering
        .iter()
        .find(|range| range.channels() == 1)
        .or_else(|| covering.first())
        .map(|range| (*range).clone().with_sample_rate(cpal::SampleRate(rate)))
}

fn map_play_err(e: cpal::PlayStreamError) -> AudioError {
    match e {
        cpal::PlayStreamError::DeviceNotAvailable => {
            AudioError::DeviceUnavailable("input device disappeared".into())
        }
        other => AudioError::Stream(other.to_string()),
    }
}

/// Downmixes driver buffers to mono i16 and cuts them into fixed-size chunks.
struct ChunkAssembler {
    producer: HeapProd<i16>,
    consumer: HeapCons<i16>,
    config: SamplingConfig,
    channels: usize,
    mono: Vec<i16>,
}

impl ChunkAssembler {
    fn new(config: SamplingConfig, channels: usize) -> Self {
        let (producer, consumer) = HeapRb::<i16>::new(config.chunk_len * 8).split();
        Self {
            producer,
            consumer,
            config,
            channels: channels.max(1),
            mono: Vec::with_capacity(config.chunk_len),
        }
    }

    fn push_f32(&mut self, input: &[f32], slot: &StreamSlot) {
        self.mono.clear();
        for frame in input.chunks(self.channels) {
            let avg = frame.iter().sum::<f32>() / frame.len() as f32;
            self.mono.push((avg.clamp(-1.0, 1.0) * i16::MAX as f32) as i16);
        }
        self.flush(slot);
    }

    fn push_i16(&mut self, input: &[i16], slot: &StreamSlot) {
        self.mono.clear();
        for frame in input.chunks(self.channels) {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            self.mono.push((sum / frame.len() as i32) as i16);
        }
        self.flush(slot);
    }

    fn flush(&mut self, slot: &StreamSlot) {
        let mut pending = &self.mono[..];
        loop {
            let pushed = self.producer.push_slice(pending);
            pending = &pending[pushed..];
            while self.consumer.occupied_len() >= self.config.chunk_len {
                let mut samples = vec![0i16; self.config.chunk_len];
                self.consumer.pop_slice(&mut samples);
                slot.deliver(AudioChunk::new(samples, self.config.sample_rate));
            }
            if pending.is_empty() || pushed == 0 {
                break;
            }
        }
    }
}
