// crates/ag_physics/src/kernels/meander.rs

//! 蜿蜒混合
//!
//! 驱动风场没有分辨的次网格水平摆动。结构与水平扩散相同，但以风速
//! 偏差代替扩散系数：`vel·ΔC/Dx`。界面速度取两侧偏差绝对值的平均，
//! 两侧因此对同一界面给出相同的质量交换。

use super::{apply_delta, dz_ratio, lateral_width, CellKernel, KernelContext};
use ag_grid::{Cell, CellState, Direction};

/// 蜿蜒混合
#[derive(Debug, Clone, Copy, Default)]
pub struct MeanderMixing;

impl MeanderMixing {
    /// 创建
    pub fn new() -> Self {
        Self
    }
}

fn deviation(cell: &Cell, dir: Direction) -> f64 {
    match dir {
        Direction::West | Direction::East => cell.coeffs.u_deviation.abs(),
        _ => cell.coeffs.v_deviation.abs(),
    }
}

impl CellKernel for MeanderMixing {
    fn name(&self) -> &str {
        "meander_mixing"
    }

    fn apply(&self, ctx: &KernelContext<'_>, state: &mut CellState, dt: f64) {
        let c = ctx.cell;
        let n_species = c.ci.len();
        for dir in Direction::LATERAL {
            let width = lateral_width(c, dir);
            for (edge, n) in ctx.neighbors(dir) {
                let vel = 0.5 * (deviation(c, dir) + deviation(n, dir));
                let f = vel / width * edge.info.cover_frac * dz_ratio(c, n) * dt;
                for i in 0..n_species {
                    apply_delta(ctx, state, edge, n, i, (n.ci[i] - c.ci[i]) * f);
                }
            }
        }
    }
}
