// crates/ag_physics/src/kernels/deposition.rs

//! 干、湿沉降
//!
//! 两者都是纯汇项，不记账：沉降掉的质量离开核算体系。
//!
//! - 干沉降只作用于地面层：`Cf -= Ci·v/Dz·Δt`
//! - 湿沉降作用于所有层：`Cf -= Ci·rate·Δt`
//!
//! 物种按沉降系数分组，分组由化学机制给出。

use super::{CellKernel, KernelContext};
use ag_grid::{CellCoefficients, CellState};

// ============================================================================
// 干沉降
// ============================================================================

/// 干沉降速度类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DryDepGroup {
    /// SO2
    SOx,
    /// NH3
    NH3,
    /// NOx
    NOx,
    /// 挥发性有机物
    VOC,
    /// 颗粒物
    Particle,
}

impl DryDepGroup {
    /// 该类别的沉降速度 [m/s]
    #[inline]
    pub fn velocity(self, c: &CellCoefficients) -> f64 {
        match self {
            DryDepGroup::SOx => c.so2_dry_dep,
            DryDepGroup::NH3 => c.nh3_dry_dep,
            DryDepGroup::NOx => c.nox_dry_dep,
            DryDepGroup::VOC => c.voc_dry_dep,
            DryDepGroup::Particle => c.particle_dry_dep,
        }
    }
}

/// 地面层一阶干沉降
#[derive(Debug, Clone)]
pub struct DryDeposition {
    groups: Vec<(DryDepGroup, Vec<usize>)>,
}

impl DryDeposition {
    /// 由 (类别, 物种索引) 分组创建
    pub fn new(groups: Vec<(DryDepGroup, Vec<usize>)>) -> Self {
        Self { groups }
    }
}

impl CellKernel for DryDeposition {
    fn name(&self) -> &str {
        "dry_deposition"
    }

    fn apply(&self, ctx: &KernelContext<'_>, state: &mut CellState, dt: f64) {
        let c = ctx.cell;
        if c.layer != 0 {
            return;
        }
        for (group, species) in &self.groups {
            let k = group.velocity(&c.coeffs) / c.dz * dt;
            for &i in species {
                state.cf[i] -= c.ci[i] * k;
            }
        }
    }
}

// ============================================================================
// 湿沉降
// ============================================================================

/// 湿清除速率类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WetDepGroup {
    /// SO2
    SO2,
    /// 其它气体
    OtherGas,
    /// 颗粒物
    Particle,
}

impl WetDepGroup {
    /// 该类别的清除速率 [1/s]
    #[inline]
    pub fn rate(self, c: &CellCoefficients) -> f64 {
        match self {
            WetDepGroup::SO2 => c.so2_wet_dep,
            WetDepGroup::OtherGas => c.other_gas_wet_dep,
            WetDepGroup::Particle => c.particle_wet_dep,
        }
    }
}

/// 所有层一阶湿沉降
#[derive(Debug, Clone)]
pub struct WetDeposition {
    groups: Vec<(WetDepGroup, Vec<usize>)>,
}

impl WetDeposition {
    /// 由 (类别, 物种索引) 分组创建
    pub fn new(groups: Vec<(WetDepGroup, Vec<usize>)>) -> Self {
        Self { groups }
    }
}

impl CellKernel for WetDeposition {
    fn name(&self) -> &str {
        "wet_deposition"
    }

    fn apply(&self, ctx: &KernelContext<'_>, state: &mut CellState, dt: f64) {
        let c = ctx.cell;
        for (group, species) in &self.groups {
            let k = group.rate(&c.coeffs) * dt;
            for &i in species {
                state.cf[i] -= c.ci[i] * k;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::test_grid::{at, strip};

    #[test]
    fn test_dry_dep_only_ground_layer() {
        let coeffs = CellCoefficients {
            particle_dry_dep: 0.01,
            so2_dry_dep: 0.02,
            ..Default::default()
        };
        let mut grid = strip(coeffs, 2);
        for (_, cell) in grid.iter_mut() {
            cell.set_concentration(&[1.0, 1.0]);
        }
        let kernel = DryDeposition::new(vec![
            (DryDepGroup::SOx, vec![0]),
            (DryDepGroup::Particle, vec![1]),
        ]);
        let ground = at(&grid, 0, 0);
        let upper = at(&grid, 1, 0);
        for id in [ground, upper] {
            let cell = grid.cell(id).unwrap();
            kernel.apply(&KernelContext::new(&grid, id, cell), &mut cell.lock(), 10.0);
        }
        let g = grid.cell(ground).unwrap().cf();
        // 0.02 / 50 × 10 = 0.004
        assert!((g[0] - 0.996).abs() < 1e-12);
        assert!((g[1] - 0.998).abs() < 1e-12);
        assert_eq!(grid.cell(upper).unwrap().cf(), vec![1.0, 1.0]);
    }

    #[test]
    fn test_wet_dep_all_layers() {
        let coeffs = CellCoefficients {
            so2_wet_dep: 1e-4,
            other_gas_wet_dep: 2e-4,
            ..Default::default()
        };
        let mut grid = strip(coeffs, 2);
        for (_, cell) in grid.iter_mut() {
            cell.set_concentration(&[1.0, 1.0]);
        }
        let kernel = WetDeposition::new(vec![
            (WetDepGroup::SO2, vec![0]),
            (WetDepGroup::OtherGas, vec![1]),
        ]);
        let upper = at(&grid, 1, 2);
        let cell = grid.cell(upper).unwrap();
        kernel.apply(&KernelContext::new(&grid, upper, cell), &mut cell.lock(), 10.0);
        let c = cell.cf();
        assert!((c[0] - 0.999).abs() < 1e-12);
        assert!((c[1] - 0.998).abs() < 1e-12);
    }
}
