// apps/ag_cli/src/commands/validate.rs

//! 配置验证命令
//!
//! 验证配置与输入，并构建初始网格检查单元图不变量。

use super::load_config;
use crate::inputs::Inputs;
use ag_grid::{validate_grid, GridBuilder};
use ag_physics::{Mechanism, MutateGrid, PopulationMutator, SimpleChem};
use anyhow::{bail, Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// 验证参数
#[derive(Args)]
pub struct ValidateArgs {
    /// 输入文件路径
    #[arg(short, long)]
    pub inputs: Option<PathBuf>,

    /// 严格模式（警告也视为错误）
    #[arg(long)]
    pub strict: bool,
}

/// 执行验证命令
pub fn execute(args: ValidateArgs, config_path: Option<&Path>) -> Result<()> {
    info!("=== AirGrid 配置验证 ===");

    let config = load_config(config_path)?;
    let inputs = Inputs::load(args.inputs.as_deref())?;
    let builder = inputs.builder(&config.grid).context("构建网格构建器失败")?;
    let emissions = inputs.emissions().context("排放记录无效")?;

    let mech = SimpleChem::new();
    mech.dry_dep(&config.mechanism.dry_dep)?;
    mech.wet_dep(&config.mechanism.wet_dep)?;
    for var in &config.output.variables {
        mech.units(var).with_context(|| format!("输出变量未知: {var}"))?;
    }

    let mut grid = builder.build(mech.len()).context("构建网格失败")?;
    info!("粗网格: {} 个内部单元", grid.n_interior());
    if !config.run.dynamic_grid {
        let refine = MutateGrid::new(
            &config.grid,
            builder.clone(),
            PopulationMutator::new(&config.grid)?,
        )?
        .with_emissions(emissions);
        let summary = refine.mutate(&mut grid, &mech)?;
        info!(
            "人口加密: 细分 {} 个单元, 新增 {} 个, 共 {} 个内部单元",
            summary.divided,
            summary.added,
            grid.n_interior()
        );
    }

    let report = validate_grid(&grid);
    for w in &report.warnings {
        warn!("{w}");
    }
    for e in &report.errors {
        error!("{e}");
    }

    if !report.is_valid() {
        bail!("网格验证失败: {} 个错误", report.error_count());
    }
    if args.strict && !report.warnings.is_empty() {
        bail!("严格模式下验证失败: {} 个警告", report.warnings.len());
    }

    info!("验证通过");
    Ok(())
}
