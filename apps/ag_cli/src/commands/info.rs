// apps/ag_cli/src/commands/info.rs

//! 信息显示命令
//!
//! 显示化学机制与配置概要。

use super::load_config;
use ag_config::ModelConfig;
use ag_physics::{Mechanism, SimpleChem};
use anyhow::Result;
use clap::Args;
use std::path::{Path, PathBuf};
use tracing::info;

/// 信息显示参数
#[derive(Args)]
pub struct InfoArgs {
    /// 把（默认或已加载的）配置写到文件
    #[arg(long)]
    pub dump: Option<PathBuf>,
}

/// 执行信息命令
pub fn execute(args: InfoArgs, config_path: Option<&Path>) -> Result<()> {
    info!("=== AirGrid 信息 ===");

    let config = load_config(config_path)?;
    print_mechanism();
    println!();
    print_config(&config);

    if let Some(path) = args.dump {
        config.save_to_file(&path)?;
        info!("配置已写入 {}", path.display());
    }
    Ok(())
}

fn print_mechanism() {
    let mech = SimpleChem::new();
    println!("化学机制: {} ({} 个模型物种)", mech.name(), mech.len());
    println!("  {:<14} 单位", "变量");
    for var in mech.species() {
        let units = mech.units(var).unwrap_or("?");
        println!("  {var:<14} {units}");
    }
    let derived = [
        "TotalPM25",
        "VOCEmissions",
        "NOxEmissions",
        "NH3Emissions",
        "SOxEmissions",
        "PM25Emissions",
    ];
    for var in derived {
        if let Ok(units) = mech.units(var) {
            println!("  {var:<14} {units}");
        }
    }
}

fn print_config(config: &ModelConfig) {
    let g = &config.grid;
    let r = &config.run;
    println!("网格:");
    println!("  粗网格: {} × {}, {} m × {} m", g.nx, g.ny, g.dx, g.dy);
    println!("  嵌套: x {:?}, y {:?}", g.xnests, g.ynests);
    println!("  层厚: {:?} m (加密层数 {})", g.layer_heights, g.hi_res_layers);
    println!(
        "  人口列: {}, 阈值 {} 人, 密度阈值 {} 人/m²",
        g.pop_grid_column, g.pop_threshold, g.pop_density_threshold
    );
    println!("运行:");
    if r.num_iterations > 0 {
        println!("  固定迭代: {}", r.num_iterations);
    } else {
        println!(
            "  收敛判据: 每 {} s 检查, 容差 {}",
            r.convergence_check_period, r.convergence_tolerance
        );
    }
    println!("  动态网格: {}, 变异周期 {} s", r.dynamic_grid, r.mutate_interval);
    println!("  时间步: [{}, {}] s, 缩减系数 {}", r.dt_min, r.dt_max, r.advection_factor);
    println!("  线程: {}", r.resolved_workers());
    println!("机制: 干沉降 {}, 湿沉降 {}", config.mechanism.dry_dep, config.mechanism.wet_dep);
    println!(
        "输出: {} ({}), 变量 {:?}",
        config.output.directory.display(),
        if config.output.all_layers { "全部层" } else { "地面层" },
        config.output.variables
    );
}
