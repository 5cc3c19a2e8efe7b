//! Mikrofon-Quelle über cpal
//!
//! Der cpal-Stream ist nicht `Send`, daher lebt er auf einem eigenen Thread.
//! Der Thread resampled auf 8kHz, kodiert µ-law und schreibt 20ms-Frames in
//! den ausgehenden Track. Video liefert dieses Backend nicht.

use super::manager::{default_codec, DeviceError, MediaDevices};
use super::media::{CaptureStream, MediaKind, TrackSink};
use super::pcm::{downmix, encode_ulaw, resample, PCMU_FRAME_SIZE, PCMU_SAMPLE_RATE};
use async_trait::async_trait;
use bytes::Bytes;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, StreamConfig, SupportedStreamConfigRange};
use parking_lot::Mutex;
use ringbuf::{traits::*, HeapRb};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use webrtc::api::media_engine::MIME_TYPE_PCMU;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;

/// Bevorzugte Capture-Rate (48kHz ist der Standard)
const PREFERRED_RATE: u32 = 48000;

/// Buffer Size für den Audio-Ring-Buffer (1 Sekunde PCMU)
const RING_BUFFER_SIZE: usize = PCMU_FRAME_SIZE * 50;

const FRAME_DURATION: Duration = Duration::from_millis(20);

// ============================================================================
// DEVICES
// ============================================================================

/// cpal-Backend: Standard-Mikrofon oder ein Gerät nach Namen
#[derive(Debug, Clone, Default)]
pub struct CpalDevices {
    input_device: Option<String>,
}

impl CpalDevices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input_device(name: impl Into<String>) -> Self {
        Self {
            input_device: Some(name.into()),
        }
    }

    /// Namen aller Eingabegeräte
    pub fn input_devices() -> Result<Vec<String>, DeviceError> {
        let host = cpal::default_host();
        Ok(host
            .input_devices()
            .map_err(|e| DeviceError::Backend(e.to_string()))?
            .filter_map(|d| d.name().ok())
            .collect())
    }

    fn find_device(&self) -> Result<Device, DeviceError> {
        let host = cpal::default_host();
        match &self.input_device {
            None => host
                .default_input_device()
                .ok_or(DeviceError::NotFound(MediaKind::Audio)),
            Some(name) => host
                .input_devices()
                .map_err(|e| DeviceError::Backend(e.to_string()))?
                .find(|d| d.name().ok().as_ref() == Some(name))
                .ok_or(DeviceError::NotFound(MediaKind::Audio)),
        }
    }
}

#[async_trait]
impl MediaDevices for CpalDevices {
    fn codec(&self, kind: MediaKind) -> RTCRtpCodecCapability {
        match kind {
            MediaKind::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_PCMU.to_owned(),
                clock_rate: PCMU_SAMPLE_RATE,
                channels: 1,
                ..Default::default()
            },
            MediaKind::Video => default_codec(kind),
        }
    }

    fn supports(&self, kind: MediaKind) -> bool {
        kind == MediaKind::Audio
    }

    async fn open(
        &self,
        kind: MediaKind,
        sink: TrackSink,
    ) -> Result<Box<dyn CaptureStream>, DeviceError> {
        if kind == MediaKind::Video {
            return Err(DeviceError::NotFound(MediaKind::Video));
        }

        let devices = self.clone();
        let stream = tokio::task::spawn_blocking(move || MicrophoneStream::start(&devices, sink))
            .await
            .map_err(|e| DeviceError::Backend(e.to_string()))??;
        Ok(Box::new(stream))
    }
}

// ============================================================================
// MICROPHONE STREAM
// ============================================================================

/// Laufende Mikrofon-Aufnahme auf eigenem Thread
pub struct MicrophoneStream {
    stop_tx: std_mpsc::Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl MicrophoneStream {
    fn start(devices: &CpalDevices, sink: TrackSink) -> Result<Self, DeviceError> {
        let device = devices.find_device()?;
        let config = find_best_input_config(&device)?;

        tracing::info!(
            "Starting audio capture: {} Hz, {} channels",
            config.sample_rate.0,
            config.channels
        );

        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), DeviceError>>();

        let thread = std::thread::Builder::new()
            .name("microphone".to_string())
            .spawn(move || capture_thread(device, config, sink, stop_rx, ready_tx))
            .map_err(|e| DeviceError::Backend(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                stop_tx,
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => Err(DeviceError::Backend("capture thread exited".to_string())),
        }
    }
}

impl CaptureStream for MicrophoneStream {
    fn stop(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        tracing::info!("Audio capture stopped");
    }
}

impl Drop for MicrophoneStream {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.stop();
        }
    }
}

fn capture_thread(
    device: Device,
    config: StreamConfig,
    sink: TrackSink,
    stop_rx: std_mpsc::Receiver<()>,
    ready_tx: std_mpsc::Sender<Result<(), DeviceError>>,
) {
    let buffer = Arc::new(Mutex::new(HeapRb::<f32>::new(RING_BUFFER_SIZE)));
    let source_rate = config.sample_rate.0;
    let channels = config.channels as usize;

    let writer = Arc::clone(&buffer);
    let stream = device.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            let mono = downmix(data, channels);
            let samples = resample(&mono, source_rate, PCMU_SAMPLE_RATE);
            let mut buffer = writer.lock();
            for sample in samples {
                let _ = buffer.try_push(sample);
            }
        },
        |err| {
            tracing::error!("Audio capture error: {}", err);
        },
        None,
    );

    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(map_build_error(e)));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(DeviceError::Backend(e.to_string())));
        return;
    }
    let _ = ready_tx.send(Ok(()));

    loop {
        match stop_rx.recv_timeout(FRAME_DURATION) {
            Ok(()) | Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
            Err(std_mpsc::RecvTimeoutError::Timeout) => {}
        }

        while let Some(frame) = read_frame(&buffer) {
            let payload = Bytes::from(encode_ulaw(&frame));
            if !sink.blocking_write(payload, FRAME_DURATION) {
                return;
            }
        }
    }
}

/// Liest einen Frame aus dem Ring-Buffer
fn read_frame(buffer: &Mutex<HeapRb<f32>>) -> Option<Vec<f32>> {
    let mut buffer = buffer.lock();
    if buffer.occupied_len() < PCMU_FRAME_SIZE {
        return None;
    }
    Some((0..PCMU_FRAME_SIZE).filter_map(|_| buffer.try_pop()).collect())
}

fn map_build_error(e: cpal::BuildStreamError) -> DeviceError {
    match e {
        cpal::BuildStreamError::DeviceNotAvailable => DeviceError::NotFound(MediaKind::Audio),
        other => DeviceError::Backend(other.to_string()),
    }
}

/// Findet die beste Input-Konfiguration
fn find_best_input_config(device: &Device) -> Result<StreamConfig, DeviceError> {
    let configs = device
        .supported_input_configs()
        .map_err(|e| DeviceError::Backend(e.to_string()))?;

    select_best_config(configs.collect())
}

/// Priorität: 48kHz F32 > beliebige F32 > erste verfügbare
fn select_best_config(configs: Vec<SupportedStreamConfigRange>) -> Result<StreamConfig, DeviceError> {
    let target_rate = cpal::SampleRate(PREFERRED_RATE);

    for config in &configs {
        if config.min_sample_rate() <= target_rate
            && config.max_sample_rate() >= target_rate
            && config.sample_format() == SampleFormat::F32
        {
            return Ok(config.with_sample_rate(target_rate).into());
        }
    }

    if let Some(config) = configs
        .iter()
        .find(|c| c.sample_format() == SampleFormat::F32)
    {
        return Ok(config.with_max_sample_rate().into());
    }

    configs
        .first()
        .map(|config| config.with_max_sample_rate().into())
        .ok_or(DeviceError::NotFound(MediaKind::Audio))
}
