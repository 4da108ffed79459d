// crates/ag_physics/src/engine/simulation.rs

//! 运行编排
//!
//! [`Simulation`] 持有三组有序阶段：初始化、每步运行、收尾。
//!
//! - 初始化：构建网格、设置排放、计算初始时间步
//! - 运行：重复执行运行阶段列表，直到某个阶段置位 `done`
//! - 收尾：`done` 之后执行一次，把最终单元状态交给输出
//!
//! 任一阶段返回错误都会立即终止，错误原样向上传播。

use crate::mechanism::Mechanism;
use ag_foundation::error::{AgError, AgResult};
use ag_grid::{CellId, Geometry, Grid, GridBuilder};
use glam::DVec2;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

// ============================================================================
// 运行状态
// ============================================================================

/// 阶段之间共享的运行状态
pub struct Domain {
    grid: Option<Grid>,
    mechanism: Arc<dyn Mechanism>,
    /// 当前时间步 [s]
    pub dt: f64,
    /// 是否已完成
    pub done: bool,
    /// 已完成的运行循环次数
    pub iteration: usize,
    /// 累计模拟时间 [s]
    pub sim_time: f64,
}

impl std::fmt::Debug for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Domain")
            .field("mechanism", &self.mechanism.name())
            .field("has_grid", &self.grid.is_some())
            .field("dt", &self.dt)
            .field("done", &self.done)
            .field("iteration", &self.iteration)
            .field("sim_time", &self.sim_time)
            .finish()
    }
}

impl Domain {
    /// 创建尚无网格的运行状态
    pub fn new(mechanism: Arc<dyn Mechanism>) -> Self {
        Self {
            grid: None,
            mechanism,
            dt: 0.0,
            done: false,
            iteration: 0,
            sim_time: 0.0,
        }
    }

    /// 化学机制
    pub fn mechanism(&self) -> &Arc<dyn Mechanism> {
        &self.mechanism
    }

    /// 网格
    pub fn grid(&self) -> AgResult<&Grid> {
        self.grid
            .as_ref()
            .ok_or_else(|| AgError::config("网格尚未构建"))
    }

    /// 可变网格
    pub fn grid_mut(&mut self) -> AgResult<&mut Grid> {
        self.grid
            .as_mut()
            .ok_or_else(|| AgError::config("网格尚未构建"))
    }

    /// 替换网格
    pub fn set_grid(&mut self, grid: Grid) {
        self.grid = Some(grid);
    }

    /// 取出网格
    pub fn take_grid(&mut self) -> Option<Grid> {
        self.grid.take()
    }
}

// ============================================================================
// 阶段
// ============================================================================

/// 运行阶段
pub trait Stage: Send {
    /// 名称
    fn name(&self) -> &str;

    /// 执行一次
    fn run(&mut self, domain: &mut Domain) -> AgResult<()>;
}

/// 由闭包构成的阶段
pub struct FnStage<F> {
    name: String,
    f: F,
}

impl<F> FnStage<F>
where
    F: FnMut(&mut Domain) -> AgResult<()> + Send,
{
    /// 创建
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

impl<F> Stage for FnStage<F>
where
    F: FnMut(&mut Domain) -> AgResult<()> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, domain: &mut Domain) -> AgResult<()> {
        (self.f)(domain)
    }
}

/// 由构建器生成网格
pub struct BuildGrid {
    builder: Arc<dyn GridBuilder>,
}

impl BuildGrid {
    /// 创建
    pub fn new(builder: Arc<dyn GridBuilder>) -> Self {
        Self { builder }
    }
}

impl Stage for BuildGrid {
    fn name(&self) -> &str {
        "build_grid"
    }

    fn run(&mut self, domain: &mut Domain) -> AgResult<()> {
        let grid = self.builder.build(domain.mechanism.len())?;
        domain.set_grid(grid);
        Ok(())
    }
}

/// 清零全部单元的浓度与排放
#[derive(Debug, Default)]
pub struct ResetCells;

impl Stage for ResetCells {
    fn name(&self) -> &str {
        "reset_cells"
    }

    fn run(&mut self, domain: &mut Domain) -> AgResult<()> {
        domain.grid_mut()?.reset_concentrations();
        Ok(())
    }
}

/// 每步输出一行运行状态
#[derive(Debug)]
pub struct LogStatus {
    start: Instant,
    last: Instant,
}

impl Default for LogStatus {
    fn default() -> Self {
        let now = Instant::now();
        Self { start: now, last: now }
    }
}

impl LogStatus {
    /// 创建
    pub fn new() -> Self {
        Self::default()
    }
}

impl Stage for LogStatus {
    fn name(&self) -> &str {
        "log_status"
    }

    fn run(&mut self, domain: &mut Domain) -> AgResult<()> {
        let now = Instant::now();
        log::info!(
            "迭代 {:<4} 墙钟 {:6.3e}s Δ墙钟 {:4.1e}s 时间步 {:.0}s 模拟 {:.1} 天",
            domain.iteration,
            now.duration_since(self.start).as_secs_f64(),
            now.duration_since(self.last).as_secs_f64(),
            domain.dt,
            domain.sim_time / 86_400.0,
        );
        self.last = now;
        Ok(())
    }
}

// ============================================================================
// 编排器
// ============================================================================

/// 点查询结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointValue {
    /// 单元
    pub cell: CellId,
    /// 该单元分摊的比例
    pub fraction: f64,
    /// 变量值
    pub value: f64,
}

/// 模拟编排器
pub struct Simulation {
    domain: Domain,
    init: Vec<Box<dyn Stage>>,
    run: Vec<Box<dyn Stage>>,
    cleanup: Vec<Box<dyn Stage>>,
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = |v: &[Box<dyn Stage>]| v.iter().map(|s| s.name().to_string()).collect::<Vec<_>>();
        f.debug_struct("Simulation")
            .field("domain", &self.domain)
            .field("init", &names(&self.init))
            .field("run", &names(&self.run))
            .field("cleanup", &names(&self.cleanup))
            .finish()
    }
}

impl Simulation {
    /// 创建空编排器
    pub fn new(mechanism: Arc<dyn Mechanism>) -> Self {
        Self {
            domain: Domain::new(mechanism),
            init: Vec::new(),
            run: Vec::new(),
            cleanup: Vec::new(),
        }
    }

    /// 使用已构建的网格
    #[must_use]
    pub fn with_grid(mut self, grid: Grid) -> Self {
        self.domain.set_grid(grid);
        self
    }

    /// 追加初始化阶段
    #[must_use]
    pub fn with_init(mut self, stage: impl Stage + 'static) -> Self {
        self.init.push(Box::new(stage));
        self
    }

    /// 追加运行阶段
    #[must_use]
    pub fn with_run(mut self, stage: impl Stage + 'static) -> Self {
        self.run.push(Box::new(stage));
        self
    }

    /// 追加收尾阶段
    #[must_use]
    pub fn with_cleanup(mut self, stage: impl Stage + 'static) -> Self {
        self.cleanup.push(Box::new(stage));
        self
    }

    /// 运行状态
    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    /// 可变运行状态
    pub fn domain_mut(&mut self) -> &mut Domain {
        &mut self.domain
    }

    /// 网格
    pub fn grid(&self) -> AgResult<&Grid> {
        self.domain.grid()
    }

    /// 执行初始化阶段
    pub fn init(&mut self) -> AgResult<()> {
        for stage in &mut self.init {
            log::debug!("初始化阶段: {}", stage.name());
            stage.run(&mut self.domain)?;
        }
        Ok(())
    }

    /// 重复执行运行阶段直到完成
    pub fn run(&mut self) -> AgResult<()> {
        if self.run.is_empty() {
            return Err(AgError::config("没有运行阶段"));
        }
        while !self.domain.done {
            for stage in &mut self.run {
                stage.run(&mut self.domain)?;
            }
            self.domain.iteration += 1;
            self.domain.sim_time += self.domain.dt;
        }
        log::info!(
            "运行结束: {} 次迭代, 模拟 {:.1} 小时",
            self.domain.iteration,
            self.domain.sim_time / 3600.0
        );
        Ok(())
    }

    /// 执行收尾阶段
    pub fn cleanup(&mut self) -> AgResult<()> {
        for stage in &mut self.cleanup {
            log::debug!("收尾阶段: {}", stage.name());
            stage.run(&mut self.domain)?;
        }
        Ok(())
    }

    /// 初始化、运行、收尾
    pub fn execute(&mut self) -> AgResult<()> {
        self.init()?;
        self.run()?;
        self.cleanup()
    }

    /// 输出变量的单元值：变量 → 层 → 按单元全序排列的值
    ///
    /// `all_layers` 为假时只返回地面层。
    pub fn results(
        &self,
        all_layers: bool,
        variables: &[String],
    ) -> AgResult<BTreeMap<String, Vec<Vec<f64>>>> {
        let grid = self.domain.grid()?;
        let mech = &self.domain.mechanism;
        let n_layers = if all_layers { grid.n_layers() } else { 1 };
        let mut out = BTreeMap::new();
        for var in variables {
            let mut layers = Vec::with_capacity(n_layers);
            for layer in 0..n_layers {
                let values = grid
                    .layer_cells(layer)
                    .map(|(_, cell)| mech.value(cell, var))
                    .collect::<AgResult<Vec<f64>>>()?;
                layers.push(values);
            }
            out.insert(var.clone(), layers);
        }
        Ok(out)
    }

    /// 点所在地面层单元及其变量值
    pub fn cell_values(&self, point: DVec2, variable: &str) -> AgResult<Vec<PointValue>> {
        let grid = self.domain.grid()?;
        let mech = &self.domain.mechanism;
        grid.index()
            .intersect(&Geometry::Point(point), 0)
            .into_iter()
            .map(|(id, fraction)| {
                let cell = grid.try_cell(id)?;
                Ok(PointValue {
                    cell: id,
                    fraction,
                    value: mech.value(cell, variable)?,
                })
            })
            .collect()
    }
}
