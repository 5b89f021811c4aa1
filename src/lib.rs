//! Subflow - video subtitle workflow engine
//!
//! Turns a video into a copy carrying bilingual subtitles (and optionally a
//! dubbed audio track) by running a fixed graph of stages: audio extraction,
//! speech-to-text, translation, terminology, subtitle merge, text-to-speech
//! and muxing. Stage outputs are cached by content fingerprint, recoverable
//! failures are retried, and many videos can be processed side by side.

pub mod batch;
pub mod cache;
pub mod cli;
pub mod config;
pub mod device;
pub mod error;
pub mod media;
pub mod retry;
pub mod stage;
pub mod stages;
pub mod state;
pub mod subtitle;
pub mod transcribe;
pub mod translate;
pub mod tts;
pub mod workflow;
