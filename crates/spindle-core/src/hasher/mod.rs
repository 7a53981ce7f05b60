pub mod content;

pub use content::{copy_verified, fingerprint, Fingerprint};
