//! Phonon API Library
//!
//! HTTP handlers, application state and setup for the audio conversion
//! service. The `phonon-api` binary serves HTTP; `phonon-conversion-worker`
//! and `phonon-janitor` run the queue consumers against a shared queue.

pub mod error;
pub mod handlers;
pub mod setup;
pub mod state;
pub mod utils;

pub use error::{ErrorResponse, HttpAppError};
pub use setup::{assemble, initialize_app, Application, Backends};
pub use state::AppState;
