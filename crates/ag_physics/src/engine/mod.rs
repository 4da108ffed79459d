// crates/ag_physics/src/engine/mod.rs

//! 运行引擎
//!
//! # 模块结构
//!
//! - `simulation` - 运行状态、阶段接口与编排器
//! - `executor` - 核函数并行执行器
//! - `timestep` - CFL 时间步
//! - `schedule` - 按模拟时间周期执行
//! - `convergence` - 稳态收敛判断
//! - `mutator` - 网格分裂/合并

pub mod convergence;
pub mod executor;
pub mod mutator;
pub mod schedule;
pub mod simulation;
pub mod timestep;

// 重导出常用类型
pub use convergence::{ConvergenceStatus, SteadyStateConvergenceCheck};
pub use executor::{Calculations, ExecutorMetrics};
pub use mutator::{
    ground_population, total_mass_population, GridMutator, MutateGrid, MutationSummary,
    MutationTotals, PopConcMutator, PopulationMutator,
};
pub use schedule::RunPeriodically;
pub use simulation::{
    BuildGrid, Domain, FnStage, LogStatus, PointValue, ResetCells, Simulation, Stage,
};
pub use timestep::{CflTimestep, SetTimestepCfl};
