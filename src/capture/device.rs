//! Input device capture using cpal
//!
//! cpal streams are not `Send` on every host, so the stream is built and
//! owned by a dedicated capture thread. The thread reports the negotiated
//! format back to `start`, then stays alive until stopped or until the
//! writer stops listening.

use super::traits::{
    AudioDeviceInfo, AudioSource, CaptureError, CaptureResult, SampleSink, StreamFormat,
};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, StreamConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// How long `start` waits for the capture thread to open the stream
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// List the available input devices
pub fn list_input_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let default_name = host
        .default_input_device()
        .and_then(|d| d.name().ok());

    let devices = match host.input_devices() {
        Ok(devices) => devices,
        Err(e) => {
            tracing::warn!("Failed to enumerate input devices: {}", e);
            return Vec::new();
        }
    };

    devices
        .filter_map(|device| {
            let name = device.name().ok()?;
            let config = device.default_input_config().ok();
            Some(AudioDeviceInfo {
                is_default: default_name.as_deref() == Some(name.as_str()),
                sample_rate: config.as_ref().map(|c| c.sample_rate().0),
                channels: config.as_ref().map(|c| c.channels()),
                name,
            })
        })
        .collect()
}

/// Find an input device by name, or the default input device
fn find_input_device(name: Option<&str>) -> CaptureResult<Device> {
    let host = cpal::default_host();
    match name {
        None => host.default_input_device().ok_or(CaptureError::NoDevice),
        Some(wanted) => host
            .input_devices()
            .map_err(|e| CaptureError::Configuration(e.to_string()))?
            .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
            .ok_or_else(|| CaptureError::DeviceNotFound(wanted.to_string())),
    }
}

/// Build an input stream that converts samples of type `T` to f32
fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    sink: SampleSink,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let error_sink = sink.clone();
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            sink.push(data.iter().map(|&s| f32::from_sample(s)).collect());
        },
        move |err| error_sink.fail(format!("input stream error: {}", err)),
        None,
    )
}

/// Capture from a cpal input device
pub struct DeviceSource {
    name: String,
    device_name: Option<String>,
    is_running: Arc<AtomicBool>,
    stream_handle: Option<JoinHandle<()>>,
}

impl DeviceSource {
    /// Capture from the named device, or the default input when `None`
    pub fn new(device_name: Option<String>) -> Self {
        let name = device_name
            .clone()
            .unwrap_or_else(|| "default input".to_string());
        Self {
            name,
            device_name,
            is_running: Arc::new(AtomicBool::new(false)),
            stream_handle: None,
        }
    }
}

impl Default for DeviceSource {
    fn default() -> Self {
        Self::new(None)
    }
}

impl AudioSource for DeviceSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self, sink: SampleSink) -> CaptureResult<StreamFormat> {
        if self.is_running.load(Ordering::SeqCst) {
            return Err(CaptureError::AlreadyRunning);
        }

        let (ready_tx, ready_rx) = mpsc::channel::<CaptureResult<StreamFormat>>();
        let device_name = self.device_name.clone();
        let is_running = self.is_running.clone();
        is_running.store(true, Ordering::SeqCst);

        let handle = std::thread::Builder::new()
            .name("shocklog-capture".to_string())
            .spawn(move || {
                let opened = open_stream(device_name.as_deref(), sink.clone());
                let (stream, format) = match opened {
                    Ok(opened) => opened,
                    Err(e) => {
                        is_running.store(false, Ordering::SeqCst);
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(format));

                while is_running.load(Ordering::SeqCst) && !sink.is_closed() {
                    std::thread::sleep(Duration::from_millis(50));
                }

                drop(stream);
                is_running.store(false, Ordering::SeqCst);
                tracing::info!("Input stream closed");
            })
            .map_err(|e| CaptureError::Stream(format!("failed to spawn capture thread: {}", e)))?;

        let format = match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(format)) => format,
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                self.is_running.store(false, Ordering::SeqCst);
                let _ = handle.join();
                return Err(CaptureError::Stream(
                    "timed out opening the input stream".to_string(),
                ));
            }
        };

        self.stream_handle = Some(handle);
        tracing::info!(
            "Capturing from {} ({}Hz, {}ch)",
            self.name,
            format.sample_rate,
            format.channels
        );
        Ok(format)
    }

    fn stop(&mut self) {
        self.is_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.stream_handle.take() {
            let _ = handle.join();
        }
    }

    fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }
}

impl Drop for DeviceSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Open the device and start its stream on the calling thread
fn open_stream(
    device_name: Option<&str>,
    sink: SampleSink,
) -> CaptureResult<(cpal::Stream, StreamFormat)> {
    let device = find_input_device(device_name)?;
    let supported = device
        .default_input_config()
        .map_err(|e| CaptureError::Configuration(format!("Failed to get input config: {}", e)))?;

    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.config();
    let format = StreamFormat {
        sample_rate: config.sample_rate.0,
        channels: config.channels,
    };

    tracing::info!(
        "Input device: {} ({:?}, {}Hz, {}ch)",
        device.name().unwrap_or_else(|_| "Unknown".to_string()),
        sample_format,
        format.sample_rate,
        format.channels
    );

    let stream = match sample_format {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, sink),
        SampleFormat::I16 => build_stream::<i16>(&device, &config, sink),
        SampleFormat::U16 => build_stream::<u16>(&device, &config, sink),
        other => return Err(CaptureError::UnsupportedFormat(format!("{:?}", other))),
    }
    .map_err(|e| CaptureError::Stream(format!("Failed to build input stream: {}", e)))?;

    stream
        .play()
        .map_err(|e| CaptureError::Stream(format!("Failed to start input stream: {}", e)))?;

    Ok((stream, format))
}
