pub mod collector;
pub mod config;
pub mod diff;
pub mod diffstat;
pub mod error;
pub mod output;
pub mod pack;
pub mod patterns;
pub mod profiles;
pub mod vcs;

pub use error::{PackerError, PackerResult};
