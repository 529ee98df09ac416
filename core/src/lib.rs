mod error;

pub mod access;
pub mod path;
pub mod policy;
pub mod session;

pub use error::{Error, Result};
