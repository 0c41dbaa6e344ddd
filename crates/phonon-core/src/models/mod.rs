//! Data models shared by the pipeline components

mod audio;
mod message;

pub use audio::*;
pub use message::*;
