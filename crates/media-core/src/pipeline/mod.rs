//! Per-direction media pipelines.
//!
//! The decode chain runs RTP-in → jitter → silence filler → codec →
//! playout buffer; the encode chain runs messenger frames → reframer →
//! resample → codec → RTP-out. Each chain is a linear composition owned
//! by exactly one worker.

pub mod decode;
pub mod encode;
pub mod jitter;
pub mod silence;

pub use decode::DecodeChain;
pub use encode::EncodeChain;
pub use jitter::{JitterBuffer, JitterConfig, JitterStats};
pub use silence::SilenceFiller;
