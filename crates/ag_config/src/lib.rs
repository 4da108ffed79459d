// crates/ag_config/src/lib.rs

//! AirGrid 配置层
//!
//! - [`model_config`]: 网格、运行控制、机制与输出配置
//! - [`error`]: 配置错误

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod model_config;

pub use error::ConfigError;
pub use model_config::{MechanismConfig, ModelConfig, OutputConfig, RunConfig, VarGridConfig};
