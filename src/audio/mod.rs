//! # Client Audio Handling
//!
//! Converts between what the browser sends (Ogg/Opus at 24 kHz mono) and the
//! fixed-size PCM frames the codec consumes.
//!
//! ## Key Components:
//! - **ogg_opus**: incremental Ogg/Opus reader and writer
//! - **buffer**: assembles arbitrary PCM chunks into exact 1920-sample frames

pub mod buffer;       // Fixed-size frame assembly
pub mod ogg_opus;     // Ogg/Opus stream reader and writer

pub use buffer::PcmAssembler;
pub use ogg_opus::{OggOpusReader, OggOpusWriter};
