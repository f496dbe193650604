//! Perennial daemon library
//!
//! Composition root: loads [`Settings`], initialises tracing and wires the
//! SQLite, Redis and filesystem adapters into a running [`Engine`].
//! Embedders register their pollable kinds on a `PollableRegistry` and hand
//! it to [`Engine::run`].

pub mod engine;
pub mod logging;
pub mod settings;

pub use engine::Engine;
pub use logging::{init_logging, LogFormat};
pub use settings::Settings;
