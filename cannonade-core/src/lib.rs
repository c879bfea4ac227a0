mod config;
mod constants;
mod error;
mod record;
mod result;
mod sketch;

pub use config::*;
pub use constants::*;
pub use error::*;
pub use record::*;
pub use result::*;
pub use sketch::*;
