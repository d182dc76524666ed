//! Apache Combined Log Format.

mod request_entry;
pub use request_entry::RequestEntry;
