//! Local and remote media handles

pub mod device;
pub mod stream;

pub use device::{MediaConstraints, MediaDevices, SyntheticDevices, VideoConstraints};
pub use stream::{CameraFacing, MediaStream, MediaTrack, TrackKind};
