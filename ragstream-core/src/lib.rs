//! Streaming chat client for a retrieval-augmented backend.
//!
//! Bytes from the transport go through [`frame::FrameDecoder`], each frame through
//! [`classifier::classify`], and each event into a [`conversation::Conversation`].
//! [`orchestrator::Orchestrator`] runs that pipeline for one exchange at a time.

pub mod backend;
pub mod classifier;
pub mod config;
pub mod conversation;
pub mod error;
pub mod frame;
pub mod http_client;
pub mod model;
pub mod orchestrator;
pub mod telemetry;
pub mod transport;
#[cfg(test)]
pub mod test_util;
