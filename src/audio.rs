//! Audio capture and per-frame analysis

pub mod frame;
pub mod recorder;
pub mod source;
pub mod spectrum;
pub mod wav;

pub use frame::{Frame, FrameFormat};
pub use recorder::{AudioDeviceInfo, MicrophoneSource, list_devices};
pub use source::{FrameSource, MemorySource, SourceError};
pub use spectrum::{SpectralAnalyzer, SpectralVerdict, SpectrumError};
