// apps/ag_cli/src/commands/mod.rs

//! 子命令

pub mod info;
pub mod run;
pub mod validate;

use ag_config::ModelConfig;
use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

/// 加载配置文件，未指定时使用默认配置
pub fn load_config(path: Option<&Path>) -> Result<ModelConfig> {
    match path {
        Some(p) => {
            let config = ModelConfig::from_file(p)
                .with_context(|| format!("加载配置失败: {}", p.display()))?;
            info!("配置: {}", p.display());
            Ok(config)
        }
        None => {
            info!("未指定配置文件，使用默认配置");
            Ok(ModelConfig::default())
        }
    }
}
