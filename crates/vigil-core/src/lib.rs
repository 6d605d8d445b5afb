pub mod config;
pub mod util;

pub use config::{load_config, CoreConfig};
