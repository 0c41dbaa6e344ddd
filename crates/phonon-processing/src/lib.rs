//! Phonon Audio Processing Library
//!
//! Format Converter contract and its ffmpeg-backed implementation.

pub mod converter;
pub mod ffmpeg;
pub mod test_helpers;

pub use converter::{ConversionError, ConversionResult, FormatConverter};
pub use ffmpeg::FfmpegConverter;
