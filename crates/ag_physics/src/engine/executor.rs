// crates/ag_physics/src/engine/executor.rs

//! 核函数并行执行器
//!
//! 内部单元按全序轮转分配给 W 个分片，在 W 线程的 rayon 线程池中各作为
//! 一个任务顺序处理：对每个单元加锁，依次执行各核函数，然后释放。
//! `ThreadPool::scope` 等待全部任务结束后才返回，其汇合点即是屏障。
//!
//! 核函数只读邻居的 `Ci`、只写本单元的 `Cf`，任何线程同时最多持有一个
//! 单元锁，不存在锁顺序问题。屏障之后再把各单元账本顺序结转到边界单元，
//! 结果与线程数和调度无关。结转之后检查所有内部单元的 `Cf` 是否有限。

use super::simulation::{Domain, Stage};
use crate::kernels::{CellKernel, KernelContext};
use ag_foundation::error::{AgError, AgResult};
use ag_grid::Grid;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::time::{Duration, Instant};

// ============================================================
// 指标
// ============================================================

/// 执行器统计
#[derive(Debug, Clone, Default)]
pub struct ExecutorMetrics {
    /// 执行次数
    pub total_calls: usize,
    /// 处理的单元总数
    pub total_cells: usize,
    /// 总耗时
    pub total_duration: Duration,
}

impl ExecutorMetrics {
    /// 记录一次执行
    pub fn record(&mut self, n_cells: usize, duration: Duration) {
        self.total_calls += 1;
        self.total_cells += n_cells;
        self.total_duration += duration;
    }

    /// 重置
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// 平均每单元耗时
    pub fn avg_time_per_cell(&self) -> Duration {
        if self.total_cells > 0 {
            self.total_duration / self.total_cells as u32
        } else {
            Duration::ZERO
        }
    }
}

// ============================================================
// 执行器
// ============================================================

/// 在所有内部单元上并行执行一组核函数
pub struct Calculations {
    kernels: Vec<Box<dyn CellKernel>>,
    workers: usize,
    pool: Option<ThreadPool>,
    metrics: ExecutorMetrics,
}

impl std::fmt::Debug for Calculations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Calculations")
            .field("kernels", &self.kernel_names())
            .field("workers", &self.workers)
            .field("metrics", &self.metrics)
            .finish()
    }
}

impl Calculations {
    /// 使用可用并行度创建
    pub fn new(kernels: Vec<Box<dyn CellKernel>>) -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            kernels,
            workers,
            pool: None,
            metrics: ExecutorMetrics::default(),
        }
    }

    /// 指定工作线程数（至少 1）
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self.pool = None;
        self
    }

    /// 工作线程数
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// 核函数名称
    pub fn kernel_names(&self) -> Vec<&str> {
        self.kernels.iter().map(|k| k.name()).collect()
    }

    /// 统计
    pub fn metrics(&self) -> &ExecutorMetrics {
        &self.metrics
    }

    /// 首次执行时按工作线程数创建线程池
    fn ensure_pool(&mut self) -> AgResult<()> {
        if self.pool.is_none() {
            let pool = ThreadPoolBuilder::new()
                .num_threads(self.workers)
                .thread_name(|i| format!("ag-calc-{i}"))
                .build()
                .map_err(|e| AgError::config(format!("无法创建 {} 线程的线程池: {e}", self.workers)))?;
            self.pool = Some(pool);
        }
        Ok(())
    }

    /// 对全部内部单元执行一步，随后结转边界账本
    pub fn execute(&mut self, grid: &mut Grid, dt: f64) -> AgResult<()> {
        let start = Instant::now();
        let ids = grid.interior().to_vec();
        let n = ids.len();
        let shards = self.workers.min(n).max(1);
        self.ensure_pool()?;
        let pool = self
            .pool
            .as_ref()
            .ok_or_else(|| AgError::config("线程池未初始化"))?;
        let kernels = &self.kernels;
        let shared: &Grid = grid;

        pool.scope(|s| {
            for w in 0..shards {
                let ids = &ids;
                s.spawn(move |_| {
                    for &id in ids.iter().skip(w).step_by(shards) {
                        let Some(cell) = shared.cell(id) else {
                            continue;
                        };
                        let ctx = KernelContext::new(shared, id, cell);
                        let mut state = cell.lock();
                        for kernel in kernels {
                            kernel.apply(&ctx, &mut state, dt);
                        }
                    }
                });
            }
        });

        grid.settle_boundary_ledgers()?;
        ensure_finite_concentrations(grid)?;
        let elapsed = start.elapsed();
        self.metrics.record(n, elapsed);
        log::trace!("物理步: {n} 个单元, {shards} 分片, 耗时 {elapsed:?}");
        Ok(())
    }
}

/// 检查所有内部单元的 `Cf` 均为有限值
pub fn ensure_finite_concentrations(grid: &Grid) -> AgResult<()> {
    for (id, cell) in grid.interior_cells() {
        let state = cell.lock();
        if let Some((i, &v)) = state.cf.iter().enumerate().find(|(_, v)| !v.is_finite()) {
            return Err(AgError::non_finite(format!("单元 {id} 物种 {i} 的 Cf"), v));
        }
    }
    Ok(())
}

impl Stage for Calculations {
    fn name(&self) -> &str {
        "calculations"
    }

    fn run(&mut self, domain: &mut Domain) -> AgResult<()> {
        let dt = domain.dt;
        self.execute(domain.grid_mut()?, dt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::test_grid::{at, strip};
    use crate::kernels::{Mixing, UpwindAdvection};
    use ag_grid::{CellCoefficients, CellState};

    fn coeffs() -> CellCoefficients {
        CellCoefficients {
            u_avg: 1.0,
            v_avg: -0.5,
            w_avg: 0.02,
            kxxyy: 200.0,
            kzz: 4.0,
            ..Default::default()
        }
    }

    fn run_with(workers: usize) -> Vec<f64> {
        let mut grid = strip(coeffs(), 2);
        let src = at(&grid, 0, 1);
        grid.cell_mut(src).unwrap().set_concentration(&[1.0, 2.0]);
        let mut calc = Calculations::new(vec![Box::new(UpwindAdvection), Box::new(Mixing::new())])
            .with_workers(workers);
        calc.execute(&mut grid, 30.0).unwrap();
        assert_eq!(calc.metrics().total_calls, 1);
        assert_eq!(calc.metrics().total_cells, 6);
        grid.interior_cells().flat_map(|(_, c)| c.cf()).collect()
    }

    #[test]
    fn test_result_independent_of_worker_count() {
        let one = run_with(1);
        let many = run_with(4);
        assert_eq!(one, many);
    }

    /// 在指定单元写入 NaN 的核函数
    struct Poison(ag_grid::CellId);

    impl CellKernel for Poison {
        fn name(&self) -> &str {
            "poison"
        }

        fn apply(&self, ctx: &KernelContext<'_>, state: &mut CellState, _dt: f64) {
            if ctx.id == self.0 {
                state.cf[1] = f64::NAN;
            }
        }
    }

    #[test]
    fn test_pool_sized_by_workers() {
        let mut grid = strip(coeffs(), 2);
        let mut calc = Calculations::new(vec![Box::new(UpwindAdvection)]).with_workers(3);
        calc.execute(&mut grid, 10.0).unwrap();
        assert_eq!(calc.pool.as_ref().map(|p| p.current_num_threads()), Some(3));

        // 修改线程数后重建线程池
        let mut calc = calc.with_workers(2);
        assert!(calc.pool.is_none());
        calc.execute(&mut grid, 10.0).unwrap();
        assert_eq!(calc.pool.as_ref().map(|p| p.current_num_threads()), Some(2));
    }

    #[test]
    fn test_non_finite_concentration_aborts_step() {
        let mut grid = strip(coeffs(), 2);
        let bad = at(&grid, 0, 1);
        let mut calc = Calculations::new(vec![Box::new(Poison(bad))]).with_workers(2);
        let err = calc.execute(&mut grid, 10.0).unwrap_err();
        assert!(err.is_numerical());
        assert!(err.to_string().contains(&format!("单元 {bad}")));
        // 失败的步不计入统计
        assert_eq!(calc.metrics().total_calls, 0);
    }

    #[test]
    fn test_workers_at_least_one() {
        let calc = Calculations::new(Vec::new()).with_workers(0);
        assert_eq!(calc.workers(), 1);
        assert!(calc.kernel_names().is_empty());
    }
}
