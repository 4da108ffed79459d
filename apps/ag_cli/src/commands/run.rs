// apps/ag_cli/src/commands/run.rs

//! 运行模拟命令
//!
//! 初始化：构建网格，静态网格时按人口一次性加密，计算排放与初始时间步。
//! 每步：加排放、并行核函数、周期性重算时间步（动态网格时同时变异），
//! 收敛判断。收尾时把结果写入输出目录。

use super::load_config;
use crate::inputs::Inputs;
use crate::writer::JsonOutputter;
use ag_physics::{
    AddEmissionsFlux, BuildGrid, Calculations, CellKernel, CflTimestep, LogStatus, MeanderMixing,
    Mechanism, Mixing, MutateGrid, Output, PopConcMutator, PopulationMutator, RunPeriodically,
    SetEmissionsFlux, SetTimestepCfl, SimpleChem, Simulation, SteadyStateConvergenceCheck,
    UpwindAdvection,
};
use anyhow::{Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};
use std::sync::mpsc::channel;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// 运行模拟参数
#[derive(Args)]
pub struct RunArgs {
    /// 输入文件路径（背景场、人口、排放）
    #[arg(short, long)]
    pub inputs: Option<PathBuf>,

    /// 输出目录（覆盖配置）
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// 固定迭代次数（覆盖配置，0 表示按收敛判据停止）
    #[arg(short = 'n', long)]
    pub iterations: Option<usize>,

    /// 工作线程数（覆盖配置）
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// 运行中动态变异网格
    #[arg(long)]
    pub dynamic: bool,
}

fn kernels(mech: &dyn Mechanism, dry_dep: &str, wet_dep: &str) -> Result<Vec<Box<dyn CellKernel>>> {
    Ok(vec![
        Box::new(UpwindAdvection::new()),
        Box::new(Mixing::new()),
        Box::new(MeanderMixing::new()),
        mech.dry_dep(dry_dep)?,
        mech.wet_dep(wet_dep)?,
        mech.chemistry(),
    ])
}

/// 执行运行命令
pub fn execute(args: RunArgs, config_path: Option<&Path>) -> Result<()> {
    info!("=== AirGrid 模拟启动 ===");

    let mut config = load_config(config_path)?;
    if let Some(dir) = args.output {
        config.output.directory = dir;
    }
    if let Some(n) = args.iterations {
        config.run.num_iterations = n;
    }
    if let Some(w) = args.workers {
        config.run.workers = w;
    }
    if args.dynamic {
        config.run.dynamic_grid = true;
    }
    config.validate().context("配置无效")?;

    let inputs = Inputs::load(args.inputs.as_deref())?;
    let builder = inputs.builder(&config.grid).context("构建网格构建器失败")?;
    let emissions = inputs.emissions().context("排放记录无效")?;

    let mech: Arc<dyn Mechanism> = Arc::new(SimpleChem::new());
    let rule = CflTimestep::from_config(&config.run)?;
    let workers = config.run.resolved_workers();
    let calculations = Calculations::new(kernels(
        mech.as_ref(),
        &config.mechanism.dry_dep,
        &config.mechanism.wet_dep,
    )?)
    .with_workers(workers);

    info!(
        "机制: {}, 干沉降: {}, 湿沉降: {}, 线程: {}",
        mech.name(),
        config.mechanism.dry_dep,
        config.mechanism.wet_dep,
        workers
    );

    let mut sim = Simulation::new(mech.clone()).with_init(BuildGrid::new(builder.clone()));
    if !config.run.dynamic_grid {
        let refine = MutateGrid::new(
            &config.grid,
            builder.clone(),
            PopulationMutator::new(&config.grid)?,
        )?;
        sim = sim.with_init(refine);
    }
    sim = sim
        .with_init(SetEmissionsFlux::new(emissions.clone()))
        .with_init(SetTimestepCfl::new(rule))
        .with_run(AddEmissionsFlux::new())
        .with_run(calculations);

    if config.run.dynamic_grid {
        let mutate = MutateGrid::new(&config.grid, builder.clone(), PopConcMutator::new(&config.grid)?)?
            .with_emissions(emissions.clone())
            .with_merge(true);
        sim = sim.with_run(RunPeriodically::new(config.run.mutate_interval, mutate)?);
    }

    let (tx, rx) = channel();
    let convergence = SteadyStateConvergenceCheck::new(
        config.run.num_iterations,
        config.grid.pop_grid_column.clone(),
    )
    .with_tolerance(config.run.convergence_tolerance)
    .with_check_period(config.run.convergence_check_period)
    .with_status(tx);

    let writer = JsonOutputter::new(&config.output.directory);
    let results_path = writer.path().clone();
    sim = sim
        .with_run(RunPeriodically::new(config.run.mutate_interval, SetTimestepCfl::new(rule))?)
        .with_run(convergence)
        .with_run(LogStatus::new())
        .with_cleanup(Output::new(
            writer,
            config.output.all_layers,
            config.output.variables.clone(),
        ));

    let start = Instant::now();
    sim.execute().context("模拟失败")?;
    let elapsed = start.elapsed();

    let checks: Vec<_> = rx.try_iter().collect();
    match checks.last() {
        Some(last) if last.converged => info!("第 {} 次检查收敛", checks.len()),
        Some(last) => warn!("最后一次检查未收敛: 质量相对差 {:?}", last.mass_delta),
        None => info!("固定迭代模式，未做收敛检查"),
    }

    let grid = sim.grid()?;
    let mass: f64 = grid.total_mass().iter().sum();
    let domain = sim.domain();
    info!("=== 模拟完成 ===");
    info!("迭代: {}", domain.iteration);
    info!("模拟时间: {:.1} 小时", domain.sim_time / 3600.0);
    info!("单元: {} 个内部单元", grid.n_interior());
    info!("总质量: {:.4e} μg", mass);
    info!("计算时间: {:.2} s", elapsed.as_secs_f64());
    info!("结果: {}", results_path.display());

    Ok(())
}
