//! Export Firebase Hosting access logs from Google Cloud Logging as lines in
//! the Apache Combined Log Format.

pub mod cancel;
pub use cancel::{CancelHandle, Cancellation};

pub mod combined;
pub use combined::RequestEntry;

mod config;
pub use config::{Config, ConfigError};

mod error;
pub use error::{Error, Result};

pub mod gcp;

pub mod logger;

mod quote;
