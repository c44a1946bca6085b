pub mod config;
pub mod document;
pub mod entity;
pub mod error;
pub mod harvest;
pub mod shutdown;

pub use config::Config;
pub use document::*;
pub use entity::*;
pub use error::*;
pub use harvest::*;
pub use shutdown::Shutdown;
