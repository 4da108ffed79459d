// crates/ag_physics/src/kernels/mod.rs

//! 单元核函数
//!
//! 核函数在一个物理步内对单个单元执行：读取本单元与邻居的 `Ci`，
//! 只写本单元的 `Cf`。流入边界伪单元的质量记入本单元账本，步后由
//! 网格统一结转。
//!
//! # 约定
//!
//! - 核函数不失败：输入在构建与变异阶段已校验
//! - 核函数不加锁：调用方已持有本单元锁，并以 `&mut CellState` 传入
//! - 同一步内各单元结果与执行顺序无关

pub mod advection;
pub mod deposition;
pub mod meander;
pub mod mixing;

pub use advection::UpwindAdvection;
pub use deposition::{DryDepGroup, DryDeposition, WetDepGroup, WetDeposition};
pub use meander::MeanderMixing;
pub use mixing::Mixing;

use ag_grid::{Cell, CellId, CellState, Direction, Edge, Grid};

// ============================================================================
// 核函数接口
// ============================================================================

/// 核函数执行上下文
#[derive(Clone, Copy)]
pub struct KernelContext<'a> {
    /// 网格（物理步内只读）
    pub grid: &'a Grid,
    /// 当前单元
    pub id: CellId,
    /// 当前单元的只读部分
    pub cell: &'a Cell,
}

impl<'a> KernelContext<'a> {
    /// 创建上下文
    pub fn new(grid: &'a Grid, id: CellId, cell: &'a Cell) -> Self {
        Self { grid, id, cell }
    }

    /// 某方向的邻居，跳过已失效的引用
    pub fn neighbors(&self, dir: Direction) -> impl Iterator<Item = (&'a Edge, &'a Cell)> + 'a {
        let grid = self.grid;
        self.cell
            .neighbors
            .get(dir)
            .iter()
            .filter_map(move |e| grid.cell(e.target).map(|n| (e, n)))
    }

    /// 地面层投影单元
    pub fn ground_level(&self) -> impl Iterator<Item = (&'a Edge, &'a Cell)> + 'a {
        let grid = self.grid;
        self.cell
            .neighbors
            .ground_level
            .iter()
            .filter_map(move |e| grid.cell(e.target).map(|n| (e, n)))
    }
}

/// 单元核函数
pub trait CellKernel: Send + Sync {
    /// 名称
    fn name(&self) -> &str;

    /// 对一个单元推进 `dt` 秒
    fn apply(&self, ctx: &KernelContext<'_>, state: &mut CellState, dt: f64);
}

impl std::fmt::Debug for dyn CellKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CellKernel").field("name", &self.name()).finish()
    }
}

// ============================================================================
// 公共工具
// ============================================================================

/// 一阶迎风通量 [浓度/s]
///
/// `c_lo` 与 `c_hi` 分别是界面坐标较小与较大一侧的浓度，速度为正时
/// 取 `c_lo`。
#[inline]
pub fn upwind_flux(velocity: f64, c_lo: f64, c_hi: f64, width: f64) -> f64 {
    if velocity > 0.0 {
        velocity * c_lo / width
    } else {
        velocity * c_hi / width
    }
}

/// 水平方向层厚比 `min(Dz_n / Dz_c, 1)`
///
/// 两侧取同一公共面高度，界面两侧的质量变化相等。
#[inline]
pub fn dz_ratio(cell: &Cell, neighbor: &Cell) -> f64 {
    (neighbor.dz / cell.dz).min(1.0)
}

/// 把浓度变化 `delta` 施加到本单元；若邻居是边界伪单元，把对应质量记账
#[inline]
pub(crate) fn apply_delta(
    ctx: &KernelContext<'_>,
    state: &mut CellState,
    neighbor: &Edge,
    neighbor_cell: &Cell,
    species: usize,
    delta: f64,
) {
    state.cf[species] += delta;
    if neighbor_cell.is_boundary() {
        state.book(neighbor.target, species, -delta * ctx.cell.volume());
    }
}

/// 水平方向对应的单元宽度
#[inline]
pub(crate) fn lateral_width(cell: &Cell, dir: Direction) -> f64 {
    match dir {
        Direction::West | Direction::East => cell.dx(),
        _ => cell.dy(),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upwind_flux_picks_upstream() {
        assert_eq!(upwind_flux(2.0, 3.0, 5.0, 10.0), 0.6);
        assert_eq!(upwind_flux(-2.0, 3.0, 5.0, 10.0), -1.0);
        assert_eq!(upwind_flux(0.0, 3.0, 5.0, 10.0), 0.0);
    }
}
