// crates/ag_physics/src/lib.rs

//! AirGrid 物理求解
//!
//! 在变分辨率单元图上推进污染物浓度，直到稳态或达到固定迭代数：
//! - 单元核函数 (kernels) - 平流、混合、蜿蜒混合、干/湿沉降
//! - 化学机制 (mechanism) - 物种、排放换算、化学核函数与输出变量
//! - 排放源 (emissions) - 按几何体分摊到单元的排放通量
//! - 运行引擎 (engine) - 并行执行器、CFL 时间步、周期调度、收敛判断、网格变异、编排
//! - 结果输出 (output) - 收尾阶段的单元记录
//!
//! # 一步的顺序
//!
//! 1. [`AddEmissionsFlux`]：`Cf += 排放·Δt`，`Ci = Cf`
//! 2. [`Calculations`]：并行执行全部核函数，屏障后结转边界账本
//! 3. [`RunPeriodically`] 包装的网格变异与时间步重算
//! 4. [`SteadyStateConvergenceCheck`]

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod emissions;
pub mod engine;
pub mod kernels;
pub mod mechanism;
pub mod output;

// 重导出常用类型
pub use emissions::{AddEmissionsFlux, EmisRecord, EmissionsSource, SetEmissionsFlux};
pub use engine::{
    BuildGrid, Calculations, CflTimestep, ConvergenceStatus, Domain, ExecutorMetrics, FnStage,
    GridMutator, LogStatus, MutateGrid, MutationSummary, PointValue, PopConcMutator,
    PopulationMutator, ResetCells, RunPeriodically, SetTimestepCfl, Simulation, Stage,
    SteadyStateConvergenceCheck,
};
pub use kernels::{
    CellKernel, DryDepGroup, DryDeposition, KernelContext, MeanderMixing, Mixing,
    UpwindAdvection, WetDepGroup, WetDeposition,
};
pub use mechanism::{Mechanism, SimpleChem};
pub use output::{CellRecord, CollectOutputter, Output, Outputter};
