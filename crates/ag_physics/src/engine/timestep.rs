// crates/ag_physics/src/engine/timestep.rs

//! CFL 时间步
//!
//! 每个内部单元给出四个稳定性上限：
//!
//! - 平流：`(1/√3) / max(|u|/Dx, |v|/Dy, |w|/Dz)`
//! - 垂直扩散：`Dz² / (2·Kzz)`
//! - 水平扩散：`Dx² / (2·Kxxyy)` 与 `Dy² / (2·Kxxyy)`
//!
//! 全域最小值除以缩减系数后截断到 `[dt_min, dt_max]`。速度或扩散系数
//! 为零的项为 +∞；没有任何单元约束时取 `dt_max`。

use super::simulation::{Domain, Stage};
use ag_config::RunConfig;
use ag_foundation::error::{AgError, AgResult};
use ag_grid::{Cell, Grid};
use rayon::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};

/// CFL 时间步规则
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CflTimestep {
    /// 缩减系数
    pub advection_factor: f64,
    /// 最小时间步 [s]
    pub dt_min: f64,
    /// 最大时间步 [s]
    pub dt_max: f64,
}

impl CflTimestep {
    /// 创建并检查参数
    pub fn new(advection_factor: f64, dt_min: f64, dt_max: f64) -> AgResult<Self> {
        if !(advection_factor > 0.0) {
            return Err(AgError::config(format!("advection_factor 必须为正: {advection_factor}")));
        }
        if !(dt_min > 0.0 && dt_min <= dt_max) {
            return Err(AgError::config(format!(
                "需满足 0 < dt_min <= dt_max: {dt_min}/{dt_max}"
            )));
        }
        Ok(Self {
            advection_factor,
            dt_min,
            dt_max,
        })
    }

    /// 由运行配置创建
    pub fn from_config(run: &RunConfig) -> AgResult<Self> {
        Self::new(run.advection_factor, run.dt_min, run.dt_max)
    }

    /// 单个单元的稳定性上限
    pub fn cell_limit(cell: &Cell) -> f64 {
        let k = &cell.coeffs;
        let rate = (k.u_avg.abs() / cell.dx())
            .max(k.v_avg.abs() / cell.dy())
            .max(k.w_avg.abs() / cell.dz);
        let dt1 = if rate > 0.0 {
            (1.0 / 3f64.sqrt()) / rate
        } else {
            f64::INFINITY
        };
        let diffusive = |width: f64, kd: f64| {
            if kd > 0.0 {
                width * width / (2.0 * kd)
            } else {
                f64::INFINITY
            }
        };
        dt1.min(diffusive(cell.dz, k.kzz))
            .min(diffusive(cell.dx(), k.kxxyy))
            .min(diffusive(cell.dy(), k.kxxyy))
    }

    /// 重新计算时间步
    pub fn recompute(&self, grid: &Grid) -> f64 {
        let ids = grid.interior().to_vec();
        let min_dt = AtomicU64::new(f64::INFINITY.to_bits());

        ids.par_iter().for_each(|id| {
            let Some(cell) = grid.cell(*id) else {
                return;
            };
            let dt = Self::cell_limit(cell);
            if dt.is_nan() || dt <= 0.0 {
                return;
            }
            // 正浮点数的位模式与数值同序
            min_dt.fetch_min(dt.to_bits(), Ordering::Relaxed);
        });

        let raw = f64::from_bits(min_dt.load(Ordering::Relaxed));
        if raw.is_infinite() {
            return self.dt_max;
        }
        let dt = raw / self.advection_factor;
        let clamped = dt.clamp(self.dt_min, self.dt_max);
        if clamped != dt && clamped == self.dt_min {
            log::warn!("CFL 时间步 {dt:.3e}s 小于下限，截断为 {clamped}s");
        }
        clamped
    }
}

/// 重新计算并设置时间步的阶段
#[derive(Debug, Clone, Copy)]
pub struct SetTimestepCfl {
    rule: CflTimestep,
}

impl SetTimestepCfl {
    /// 创建
    pub fn new(rule: CflTimestep) -> Self {
        Self { rule }
    }
}

impl Stage for SetTimestepCfl {
    fn name(&self) -> &str {
        "set_timestep_cfl"
    }

    fn run(&mut self, domain: &mut Domain) -> AgResult<()> {
        let dt = self.rule.recompute(domain.grid()?);
        log::debug!("时间步: {dt:.3}s");
        domain.dt = dt;
        Ok(())
    }
}
