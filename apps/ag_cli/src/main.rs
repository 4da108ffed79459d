// apps/ag_cli/src/main.rs

//! AirGrid 命令行界面
//!
//! 在变分辨率网格上运行简化形式的空气质量模型。配置文件是全局参数，
//! 各子命令共用；未指定时使用 `ModelConfig::default()`。
//!
//! 物理与网格库通过 `log` 宏记录日志，这里安装的 tracing 订阅器
//! 会一并接管这些记录。

mod commands;
mod inputs;
mod writer;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::FmtSubscriber;

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

/// AirGrid 空气质量模型命令行工具
#[derive(Parser)]
#[command(name = "ag_cli")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "AirGrid reduced-form air quality model", long_about = None)]
struct Cli {
    /// 模型配置文件 (TOML/JSON)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// 日志级别
    #[arg(short, long, global = true, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,

    /// 日志中显示线程名（排查执行器分片时有用）
    #[arg(long, global = true)]
    log_threads: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 运行模拟
    Run(commands::run::RunArgs),
    /// 显示化学机制与配置概要
    Info(commands::info::InfoArgs),
    /// 验证配置、输入与初始网格
    Validate(commands::validate::ValidateArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // try_init 同时安装 log -> tracing 的桥接
    FmtSubscriber::builder()
        .with_max_level(Level::from(cli.log_level))
        .with_target(false)
        .with_thread_names(cli.log_threads)
        .finish()
        .try_init()?;

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Run(args) => commands::run::execute(args, config),
        Commands::Info(args) => commands::info::execute(args, config),
        Commands::Validate(args) => commands::validate::execute(args, config),
    }
}
