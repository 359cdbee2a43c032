pub mod block;
pub mod config;
pub mod error;

pub use block::*;
pub use config::Config;
pub use error::*;
