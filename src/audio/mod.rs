pub mod backend;
pub mod capture;
pub mod device;
pub mod segment;

pub use backend::{AudioBackend, AudioFormat, AudioFrame, DeviceConfig};
pub use capture::{AudioCapture, FrameEvent, FrameReceiver, Recording};
pub use device::CpalBackend;
pub use segment::{AudioSegment, SegmentBuffer, SegmentMeta, SegmentReport};
