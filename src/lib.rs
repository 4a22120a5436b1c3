//! `recode`: a step-driven media transcoding engine.
//!
//! This crate provides:
//! - Per-track pipelines (decode → remix/render → encode, or plain pass-through)
//! - A buffering muxer that holds samples until every output track format is known
//! - Output format strategies (fixed, custom, 720p-capped, audio-only, remux)
//! - A synchronous engine with progress and cancellation, plus an async handle around it
//! - Software backends (Symphonia decode, PCM/WAV output, in-memory containers)
//!
//! Pixel-level codecs are collaborators: anything implementing `codec::Codec` and
//! `codec::CodecProvider` can be plugged in.

// High-level API (most consumers should start here).
pub mod engine;
pub mod opts;
pub mod strategy;
pub mod transcoder;

// Collaborator contracts and shared data types.
pub mod codec;
pub mod container;
pub mod format;
pub mod sample;

// Pipeline pieces.
pub mod audio_channel;
pub mod muxer;
pub mod remix;
pub mod transcoders;

pub mod location;

// Concrete codecs and containers.
pub mod backends;

// Logging configuration and control.
#[cfg(feature = "logging")]
pub mod logging;

mod error;

pub use error::{ChannelSide, ConfigError, Error, Result};
