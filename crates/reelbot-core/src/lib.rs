#![deny(missing_docs)]
//! Reelbot core library.
//!
//! Everything behind the chat surface: access policy, the job queue and
//! its worker slots, the external downloaders and delivery planning.

/// Access allow-lists.
pub mod access;
/// Configuration management.
pub mod config;
/// Size ceiling, compression and upload batching.
pub mod delivery;
/// Job queue and worker slots.
pub mod dispatcher;
/// User-facing job errors.
pub mod error;
/// Inbound text classification.
pub mod inbound;
/// Job model.
pub mod job;
/// Subprocess execution.
pub mod process;
/// Localized replies.
pub mod responses;
/// ffprobe and ffmpeg.
pub mod transcode;
/// Utility functions.
pub mod utils;
/// yt-dlp and gallery-dl.
pub mod ytdlp;

#[cfg(test)]
pub mod testing;
