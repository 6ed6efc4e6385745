//! Configuration shared by DagBox embedders.
//!
//! A [`Settings`] value describes one embedded DagBox instance: where data
//! lives, which transport family carries messages, how many reader workers
//! to start, and the liveness timings. Settings are plain serde types so
//! embedders can load them from whatever configuration source they already
//! use; [`Settings::default`] matches the documented defaults.

mod defaults;
mod logging;
mod settings;

pub use logging::{LogFormat, LogSettings};
pub use settings::{Settings, SettingsError, TransportKind};
