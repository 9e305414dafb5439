//! Discovery runs end to end.
//!
//! This crate ties query fan-out, candidate search and registry resolution
//! together ([`DiscoveryPipeline`]) and defines the event vocabulary a run
//! reports through ([`StreamEvent`], [`EventSink`]).

pub mod events;
pub mod orchestrator;
pub mod pipeline;

pub use events::{
    ChannelSink, EventSink, FrameDecoder, NDJSON_CONTENT_TYPE, SilentSink, StreamEvent,
    encode_frame,
};
pub use orchestrator::{Orchestrator, Verdict, classify};
pub use pipeline::{DiscoveryOutcome, DiscoveryPipeline};
