//! Audio capture sources
//!
//! Every source runs its own capture thread and delivers interleaved f32
//! audio into a bounded `SampleSink`.

pub mod device;
pub mod synthetic;
pub mod traits;

#[cfg(test)]
pub(crate) mod testing;

pub use device::{list_input_devices, DeviceSource};
pub use synthetic::ToneSource;
pub use traits::{
    AudioDeviceInfo, AudioSource, CaptureError, CaptureMessage, CaptureResult, SampleQueue, SampleSink,
    StreamFormat, CAPTURE_QUEUE_BLOCKS,
};
