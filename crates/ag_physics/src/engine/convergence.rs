// crates/ag_physics/src/engine/convergence.rs

//! 稳态收敛判断
//!
//! 两种模式：
//!
//! - 固定迭代：第 `num_iterations` 次调用时置位 `done`
//! - 判据模式：每累计 `check_period` 秒模拟时间，对每个跟踪变量计算
//!   总质量 Σ(值·V) 与人口加权浓度 Σ(值·人口)，与上次检查的相对差
//!   全部不超过容差（且均为有限值）时置位 `done`
//!
//! 每次检查的相对差都会保存，若给了状态通道也会发送出去。

use super::simulation::{Domain, Stage};
use ag_foundation::error::{AgError, AgResult};
use ag_foundation::tolerance::relative_difference;
use std::sync::mpsc::Sender;

/// 默认检查周期：3 小时模拟时间
pub const DEFAULT_CHECK_PERIOD: f64 = 3.0 * 3600.0;

/// 默认相对容差
pub const DEFAULT_TOLERANCE: f64 = 0.001;

/// 一次收敛检查的结果
#[derive(Debug, Clone, PartialEq)]
pub struct ConvergenceStatus {
    /// 检查时的迭代次数
    pub iteration: usize,
    /// 检查时的累计模拟时间 [s]
    pub sim_time: f64,
    /// 跟踪变量名
    pub variables: Vec<String>,
    /// 各变量总质量的相对差
    pub mass_delta: Vec<f64>,
    /// 各变量人口加权浓度的相对差
    pub pop_delta: Vec<f64>,
    /// 是否收敛
    pub converged: bool,
}

/// 稳态收敛判断阶段
#[derive(Debug)]
pub struct SteadyStateConvergenceCheck {
    num_iterations: usize,
    pop_column: String,
    tolerance: f64,
    check_period: f64,
    variables: Option<Vec<String>>,
    status: Option<Sender<ConvergenceStatus>>,

    iteration: usize,
    elapsed: f64,
    sim_time: f64,
    old_mass: Vec<f64>,
    old_pop: Vec<f64>,
    history: Vec<ConvergenceStatus>,
}

impl SteadyStateConvergenceCheck {
    /// 创建
    ///
    /// `num_iterations > 0` 时为固定迭代模式，否则按判据停止。
    pub fn new(num_iterations: usize, pop_column: impl Into<String>) -> Self {
        Self {
            num_iterations,
            pop_column: pop_column.into(),
            tolerance: DEFAULT_TOLERANCE,
            check_period: DEFAULT_CHECK_PERIOD,
            variables: None,
            status: None,
            iteration: 0,
            elapsed: 0.0,
            sim_time: 0.0,
            old_mass: Vec::new(),
            old_pop: Vec::new(),
            history: Vec::new(),
        }
    }

    /// 设置相对容差
    #[must_use]
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// 设置检查周期 [s]
    #[must_use]
    pub fn with_check_period(mut self, period: f64) -> Self {
        self.check_period = period;
        self
    }

    /// 只跟踪指定变量（默认为机制的全部输出变量）
    #[must_use]
    pub fn with_variables(mut self, variables: Vec<String>) -> Self {
        self.variables = Some(variables);
        self
    }

    /// 设置状态通道
    #[must_use]
    pub fn with_status(mut self, sender: Sender<ConvergenceStatus>) -> Self {
        self.status = Some(sender);
        self
    }

    /// 已执行次数
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// 历次检查结果
    pub fn history(&self) -> &[ConvergenceStatus] {
        &self.history
    }

    fn tracked(&self, domain: &Domain) -> AgResult<Vec<String>> {
        let mech = domain.mechanism();
        match &self.variables {
            None => Ok(mech.species().into_iter().map(String::from).collect()),
            Some(vars) => {
                let known = mech.species();
                if let Some(bad) = vars.iter().find(|v| !known.contains(&v.as_str())) {
                    return Err(AgError::missing_species(bad.clone()));
                }
                Ok(vars.clone())
            }
        }
    }

    /// 计算各变量的总质量与人口加权浓度，按单元全序顺序累加
    fn metrics(&self, domain: &Domain, variables: &[String]) -> AgResult<(Vec<f64>, Vec<f64>)> {
        let grid = domain.grid()?;
        let mech = domain.mechanism();
        let pop_index = grid.pop_column_index(&self.pop_column)?;
        let mut mass = vec![0.0; variables.len()];
        let mut pop = vec![0.0; variables.len()];
        for (_, cell) in grid.interior_cells() {
            let v = cell.volume();
            let p = cell.population_of(pop_index);
            for (k, var) in variables.iter().enumerate() {
                let value = mech.value(cell, var)?;
                mass[k] += value * v;
                pop[k] += value * p;
            }
        }
        for (k, var) in variables.iter().enumerate() {
            if !mass[k].is_finite() {
                return Err(AgError::non_finite(format!("{var} 总质量"), mass[k]));
            }
            if !pop[k].is_finite() {
                return Err(AgError::non_finite(format!("{var} 人口加权浓度"), pop[k]));
            }
        }
        Ok((mass, pop))
    }

    fn check(&mut self, domain: &mut Domain) -> AgResult<()> {
        let variables = self.tracked(domain)?;
        let (mass, pop) = self.metrics(domain, &variables)?;
        if self.old_mass.len() != mass.len() {
            self.old_mass = vec![0.0; mass.len()];
            self.old_pop = vec![0.0; pop.len()];
        }

        let mut mass_delta = Vec::with_capacity(mass.len());
        let mut pop_delta = Vec::with_capacity(pop.len());
        let mut converged = true;
        for k in 0..variables.len() {
            let dm = relative_difference(mass[k], self.old_mass[k]);
            let dp = relative_difference(pop[k], self.old_pop[k]);
            if dm.is_nan() || dp.is_nan() {
                return Err(AgError::non_finite(format!("{} 收敛比", variables[k]), f64::NAN));
            }
            if dm.is_infinite() || dp.is_infinite() || dm.abs() > self.tolerance || dp.abs() > self.tolerance {
                converged = false;
            }
            mass_delta.push(dm);
            pop_delta.push(dp);
        }
        self.old_mass = mass;
        self.old_pop = pop;

        let status = ConvergenceStatus {
            iteration: self.iteration,
            sim_time: self.sim_time,
            variables,
            mass_delta,
            pop_delta,
            converged,
        };
        log::debug!(
            "收敛检查 迭代 {} 质量相对差 {:?} 人口加权相对差 {:?}",
            status.iteration,
            status.mass_delta,
            status.pop_delta
        );
        if let Some(tx) = &self.status {
            tx.send(status.clone())?;
        }
        self.history.push(status);

        if converged {
            log::info!("第 {} 次迭代达到稳态", self.iteration);
            domain.done = true;
        }
        Ok(())
    }
}

impl Stage for SteadyStateConvergenceCheck {
    fn name(&self) -> &str {
        "steady_state_convergence_check"
    }

    fn run(&mut self, domain: &mut Domain) -> AgResult<()> {
        self.iteration += 1;
        if self.num_iterations > 0 {
            if self.iteration >= self.num_iterations {
                domain.done = true;
            }
            return Ok(());
        }

        if !(self.check_period > 0.0) {
            return Err(AgError::config(format!("收敛检查周期必须为正: {}", self.check_period)));
        }
        self.elapsed += domain.dt;
        self.sim_time += domain.dt;
        if self.elapsed >= self.check_period {
            self.elapsed = 0.0;
            self.check(domain)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::test_grid::strip;
    use crate::mechanism::SimpleChem;
    use ag_grid::CellCoefficients;
    use std::sync::Arc;

    fn domain() -> Domain {
        let mut d = Domain::new(Arc::new(SimpleChem::new()));
        d.set_grid(strip(CellCoefficients::default(), 9));
        d.dt = 3600.0;
        d
    }

    #[test]
    fn test_fixed_iterations() {
        let mut d = domain();
        let mut check = SteadyStateConvergenceCheck::new(3, "TotalPop");
        check.run(&mut d).unwrap();
        check.run(&mut d).unwrap();
        assert!(!d.done);
        check.run(&mut d).unwrap();
        assert!(d.done);
    }

    #[test]
    fn test_constant_field_converges_on_second_check() {
        let mut d = domain();
        let ids = d.grid().unwrap().interior().to_vec();
        for id in ids {
            let cell = d.grid_mut().unwrap().cell_mut(id).unwrap();
            cell.population = vec![10.0];
            cell.set_concentration(&[1.0; 9]);
        }
        let (tx, rx) = std::sync::mpsc::channel();
        let mut check = SteadyStateConvergenceCheck::new(0, "TotalPop").with_status(tx);
        for _ in 0..3 {
            check.run(&mut d).unwrap();
        }
        // 第一次检查与零比较，为无穷
        assert!(!d.done);
        let first = rx.try_recv().unwrap();
        assert!(first.mass_delta.iter().all(|x| x.is_infinite()));
        for _ in 0..3 {
            check.run(&mut d).unwrap();
        }
        assert!(d.done);
        let second = rx.try_recv().unwrap();
        assert!(second.converged);
        assert_eq!(check.history().len(), 2);
    }

    #[test]
    fn test_missing_population_column() {
        let mut d = domain();
        let mut check = SteadyStateConvergenceCheck::new(0, "Nobody").with_check_period(1.0);
        let err = check.run(&mut d).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_unknown_variable() {
        let mut d = domain();
        let mut check = SteadyStateConvergenceCheck::new(0, "TotalPop")
            .with_check_period(1.0)
            .with_variables(vec!["Ozone".into()]);
        assert!(matches!(check.run(&mut d), Err(AgError::MissingSpecies { .. })));
    }

    #[test]
    fn test_non_finite_is_error() {
        let mut d = domain();
        let id = d.grid().unwrap().interior().get(0).unwrap();
        d.grid_mut().unwrap().cell_mut(id).unwrap().set_concentration(&[f64::NAN; 9]);
        let mut check = SteadyStateConvergenceCheck::new(0, "TotalPop").with_check_period(1.0);
        assert!(check.run(&mut d).unwrap_err().is_numerical());
    }
}
