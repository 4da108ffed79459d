// crates/ag_physics/src/kernels/mixing.rs

//! 垂直与水平混合
//!
//! 两部分叠加：
//!
//! 1. ACM2 非局地对流：地面投影单元以 `M2u` 向上输送，上方单元以
//!    `M2d` 向下补偿。各层系数满足 `M2d_0·Dz_0 = Σ M2u_k·Dz_k` 时
//!    整柱质量守恒；穿出顶边界的部分由下层补偿项抵消，不单独记账。
//! 2. 局地梯度扩散：垂直方向 `diff·ΔC/cd/Dz`，水平方向再乘层厚比。
//!    流入边界伪单元的扩散通量记入账本。

use super::{apply_delta, dz_ratio, lateral_width, CellKernel, KernelContext};
use ag_grid::{CellState, Direction};

/// ACM2 对流 + 梯度扩散
#[derive(Debug, Clone, Copy)]
pub struct Mixing {
    convection: bool,
}

impl Default for Mixing {
    fn default() -> Self {
        Self { convection: true }
    }
}

impl Mixing {
    /// 创建
    pub fn new() -> Self {
        Self::default()
    }

    /// 只保留梯度扩散
    #[must_use]
    pub fn diffusion_only() -> Self {
        Self { convection: false }
    }
}

impl CellKernel for Mixing {
    fn name(&self) -> &str {
        "mixing"
    }

    fn apply(&self, ctx: &KernelContext<'_>, state: &mut CellState, dt: f64) {
        let c = ctx.cell;
        let n_species = c.ci.len();

        if self.convection {
            for (edge, g) in ctx.ground_level() {
                let f = c.coeffs.m2u * edge.info.cover_frac * dt;
                for i in 0..n_species {
                    state.cf[i] += g.ci[i] * f;
                }
            }
            for (edge, a) in ctx.neighbors(Direction::Above) {
                let f = edge.info.cover_frac * dt;
                let down = a.coeffs.m2d * a.dz / c.dz;
                for i in 0..n_species {
                    state.cf[i] += (down * a.ci[i] - c.coeffs.m2d * c.ci[i]) * f;
                }
            }
        }

        // 垂直扩散
        for dir in [Direction::Below, Direction::Above] {
            for (edge, n) in ctx.neighbors(dir) {
                if edge.target == ctx.id {
                    continue;
                }
                let f = edge.info.diff / edge.info.center_distance / c.dz * edge.info.cover_frac * dt;
                for i in 0..n_species {
                    apply_delta(ctx, state, edge, n, i, (n.ci[i] - c.ci[i]) * f);
                }
            }
        }

        // 水平扩散
        for dir in Direction::LATERAL {
            let width = lateral_width(c, dir);
            for (edge, n) in ctx.neighbors(dir) {
                let f = edge.info.diff / edge.info.center_distance / width
                    * edge.info.cover_frac
                    * dz_ratio(c, n)
                    * dt;
                for i in 0..n_species {
                    apply_delta(ctx, state, edge, n, i, (n.ci[i] - c.ci[i]) * f);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::test_grid::{at, strip};
    use ag_grid::{CellCoefficients, Grid};

    fn run(grid: &mut Grid, kernel: &Mixing, dt: f64) {
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
    fn test_lateral_diffusion_is_symmetric() {
        let coeffs = CellCoefficients {
            kxxyy: 100.0,
            ..Default::default()
        };
        let mut grid = strip(coeffs, 1);
        let mid = at(&grid, 0, 1);
        grid.cell_mut(mid).unwrap().set_concentration(&[1.0]);
        run(&mut grid, &Mixing::diffusion_only(), 10.0);

        let w = grid.cell(at(&grid, 0, 0)).unwrap().cf_at(0);
        let e = grid.cell(at(&grid, 0, 2)).unwrap().cf_at(0);
        // 100 / 1000 / 1000 × 10 = 1e-3
        assert!((w - 1e-3).abs() < 1e-12);
        assert!((e - w).abs() < 1e-15);
        // 东西两侧内部单元 + 南北两侧边界
        assert!((grid.cell(mid).unwrap().cf_at(0) - (1.0 - 4e-3)).abs() < 1e-12);
    }

    #[test]
    fn test_diffusion_conserves_with_boundaries() {
        let coeffs = CellCoefficients {
            kxxyy: 500.0,
            kzz: 5.0,
            ..Default::default()
        };
        let mut grid = strip(coeffs, 2);
        let id = at(&grid, 1, 0);
        grid.cell_mut(id).unwrap().set_concentration(&[1.0, 3.0]);
        let before = grid.total_mass();
        run(&mut grid, &Mixing::new(), 20.0);
        let after = grid.total_mass();
        for (a, b) in after.iter().zip(&before) {
            assert!(((a - b) / b).abs() < 1e-12);
        }
        assert!(grid.boundary_mass()[0] > 0.0);
    }

    #[test]
    fn test_balanced_convection_conserves_column() {
        use ag_grid::UniformBackground;
        let layers = [50.0, 100.0];
        let profile = vec![
            CellCoefficients { m2u: 1e-4, ..Default::default() },
            CellCoefficients { m2u: 2e-4, ..Default::default() },
        ];
        let bg = UniformBackground::new(profile).unwrap().with_balanced_convection(&layers);
        let mut grid = strip(CellCoefficients::default(), 1);
        let ids: Vec<_> = grid.interior().to_vec();
        for id in ids {
            let layer = grid.cell(id).unwrap().layer;
            grid.cell_mut(id).unwrap().coeffs = bg.profile()[layer];
        }
        grid.link_all().unwrap();
        let g = at(&grid, 0, 1);
        grid.cell_mut(g).unwrap().set_concentration(&[2.0]);
        let before = grid.total_mass()[0];
        run(&mut grid, &Mixing::new(), 60.0);
        let after = grid.total_mass()[0];
        assert!(((after - before) / before).abs() < 1e-12);
        let up = grid.cell(at(&grid, 1, 1)).unwrap().cf_at(0);
        assert!(up > 0.0);
    }
}
