//! Speech engine adapter and reading service for the Bookworm ebook viewer.

pub mod config;
pub mod error;
pub mod harness;
pub mod platform;
pub mod proc_server_common;
pub mod profiles;
pub mod reading;
pub mod service;
pub mod speech;

pub use error::{ErrorClass, SpeechError};
