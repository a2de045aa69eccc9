//! Media engine bridging a SIP telephony leg to a messenger voice call.
//!
//! The bridge is a two-endpoint mediator. Audio flows RTP-in → decode
//! chain → playout buffer → paced injector → messenger in one direction,
//! and messenger queue → reassembler → encode chain → RTP-out in the
//! other. A per-call supervisor ([`MediaBridge`]) owns three workers and
//! one cancellation token.
//!
//! Latency control is the interesting part: the SIP decode clock and the
//! messenger injection clock free-run against each other, so the playout
//! stage applies ±1-sample time compression/expansion per 10 ms frame —
//! chosen by a psychoacoustic cut-point search — instead of dropping
//! whole frames ([`pcm::PlayoutBuffer`], [`drift::DriftController`]).
//!
//! SIP signalling, SDP parsing, and the messenger's own signalling stay
//! outside this crate; they appear only as the collaborator traits
//! ([`endpoint::SipDialog`], [`endpoint::FrameSink`], and the RTP traits
//! from `sipbridge-rtp-core`).

pub mod bridge;
pub mod codec;
pub mod config;
pub mod drift;
pub mod endpoint;
pub mod error;
pub mod pcm;
pub mod pipeline;
pub mod types;

pub use bridge::MediaBridge;
pub use codec::{CodecDescriptor, CodecKind, NegotiationError};
pub use config::BridgeConfig;
pub use drift::{DriftController, DriftDecision};
pub use endpoint::{FrameSink, MessengerEndpoint, SipDialog, SipEndpoint};
pub use error::{Error, Result};
pub use pcm::PlayoutBuffer;
pub use types::{AudioFormat, StreamDevice};
