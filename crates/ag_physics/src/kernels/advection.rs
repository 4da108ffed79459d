// crates/ag_physics/src/kernels/advection.rs

//! 一阶迎风平流
//!
//! 界面速度约定：单元系数中的 `u_avg`、`v_avg`、`w_avg` 是该单元西、南、
//! 底界面上的速度；东、北、顶界面的速度取对应邻居的系数。两侧单元因此
//! 对同一界面使用同一速度，界面通量守恒。
//!
//! 地面层的下方邻居是自身，不计算穿过地面的垂直平流。

use super::{apply_delta, dz_ratio, upwind_flux, CellKernel, KernelContext};
use ag_grid::{CellState, Direction};

/// 一阶迎风平流
#[derive(Debug, Clone, Copy, Default)]
pub struct UpwindAdvection;

impl UpwindAdvection {
    /// 创建
    pub fn new() -> Self {
        Self
    }
}

impl CellKernel for UpwindAdvection {
    fn name(&self) -> &str {
        "upwind_advection"
    }

    fn apply(&self, ctx: &KernelContext<'_>, state: &mut CellState, dt: f64) {
        let c = ctx.cell;
        let n_species = c.ci.len();

        // 西、南：速度取本单元，本单元在坐标较大一侧
        for (edge, w) in ctx.neighbors(Direction::West) {
            let f = edge.info.cover_frac * dz_ratio(c, w) * dt;
            for i in 0..n_species {
                let d = upwind_flux(c.coeffs.u_avg, w.ci[i], c.ci[i], c.dx()) * f;
                apply_delta(ctx, state, edge, w, i, d);
            }
        }
        for (edge, s) in ctx.neighbors(Direction::South) {
            let f = edge.info.cover_frac * dz_ratio(c, s) * dt;
            for i in 0..n_species {
                let d = upwind_flux(c.coeffs.v_avg, s.ci[i], c.ci[i], c.dy()) * f;
                apply_delta(ctx, state, edge, s, i, d);
            }
        }

        // 东、北：速度取邻居，本单元在坐标较小一侧
        for (edge, e) in ctx.neighbors(Direction::East) {
            let f = edge.info.cover_frac * dz_ratio(c, e) * dt;
            for i in 0..n_species {
                let d = -upwind_flux(e.coeffs.u_avg, c.ci[i], e.ci[i], c.dx()) * f;
                apply_delta(ctx, state, edge, e, i, d);
            }
        }
        for (edge, n) in ctx.neighbors(Direction::North) {
            let f = edge.info.cover_frac * dz_ratio(c, n) * dt;
            for i in 0..n_species {
                let d = -upwind_flux(n.coeffs.v_avg, c.ci[i], n.ci[i], c.dy()) * f;
                apply_delta(ctx, state, edge, n, i, d);
            }
        }

        // 垂直
        if c.layer > 0 {
            for (edge, b) in ctx.neighbors(Direction::Below) {
                let f = edge.info.cover_frac * dt;
                for i in 0..n_species {
                    let d = upwind_flux(c.coeffs.w_avg, b.ci[i], c.ci[i], c.dz) * f;
                    apply_delta(ctx, state, edge, b, i, d);
                }
            }
        }
        for (edge, a) in ctx.neighbors(Direction::Above) {
            let f = edge.info.cover_frac * dt;
            for i in 0..n_species {
                let d = -upwind_flux(a.coeffs.w_avg, c.ci[i], a.ci[i], c.dz) * f;
                apply_delta(ctx, state, edge, a, i, d);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::test_grid::{at, strip};
    use ag_grid::CellCoefficients;

    fn run(grid: &mut ag_grid::Grid, dt: f64) {
        let kernel = UpwindAdvection::new();
        let ids = grid.interior().to_vec();
        for id in ids {
            let cell = grid.cell(id).unwrap();
            let ctx = KernelContext::new(grid, id, cell);
            let mut state = cell.lock();
            kernel.apply(&ctx, &mut state, dt);
        }
        grid.settle_boundary_ledgers().unwrap();
    }

    #[test]
    fn test_eastward_wind_moves_mass_downstream() {
        let coeffs = CellCoefficients {
            u_avg: 2.0,
            ..Default::default()
        };
        let mut grid = strip(coeffs, 1);
        let src = at(&grid, 0, 1);
        grid.cell_mut(src).unwrap().set_concentration(&[1.0]);
        run(&mut grid, 100.0);

        let east = at(&grid, 0, 2);
        let west = at(&grid, 0, 0);
        // 2 m/s × 100 s / 1000 m = 0.2
        assert!((grid.cell(src).unwrap().cf_at(0) - 0.8).abs() < 1e-12);
        assert!((grid.cell(east).unwrap().cf_at(0) - 0.2).abs() < 1e-12);
        assert_eq!(grid.cell(west).unwrap().cf_at(0), 0.0);
    }

    #[test]
    fn test_outflow_is_booked_to_boundary() {
        let coeffs = CellCoefficients {
            u_avg: 2.0,
            w_avg: 0.01,
            ..Default::default()
        };
        let mut grid = strip(coeffs, 1);
        let id = at(&grid, 1, 2);
        grid.cell_mut(id).unwrap().set_concentration(&[1.0]);
        let before = grid.total_mass()[0];
        run(&mut grid, 50.0);
        let after = grid.total_mass()[0];
        assert!(((after - before) / before).abs() < 1e-12);
        assert!(grid.boundary_mass()[0] > 0.0);
    }

    #[test]
    fn test_no_vertical_advection_through_ground() {
        let coeffs = CellCoefficients {
            w_avg: -0.5,
            ..Default::default()
        };
        let mut grid = strip(coeffs, 1);
        let id = at(&grid, 0, 0);
        grid.cell_mut(id).unwrap().set_concentration(&[1.0]);
        run(&mut grid, 10.0);
        assert_eq!(grid.cell(id).unwrap().cf_at(0), 1.0);
    }
}
