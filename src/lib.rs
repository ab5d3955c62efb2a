pub mod config;
pub mod decode;
pub mod error;
pub mod frame_slot;
pub mod lane;
pub mod overlay;
pub mod pipeline;
pub mod stream;
pub mod synthetic;
pub mod track;

pub use config::RideLaneConfig;
pub use pipeline::{FrameOutput, FrameProcessor, LaneResult, LaneSession};
