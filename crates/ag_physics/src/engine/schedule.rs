// crates/ag_physics/src/engine/schedule.rs

//! 按模拟时间周期执行的阶段

use super::simulation::{Domain, Stage};
use ag_foundation::error::{AgError, AgResult};

/// 每累计 `period` 秒模拟时间执行一次内部阶段
///
/// 累加器在执行后清零。时间步恰为零时返回 [`AgError::ZeroTimestep`]，
/// 否则累加器永远不会前进。
pub struct RunPeriodically {
    period: f64,
    elapsed: f64,
    action: Box<dyn Stage>,
}

impl std::fmt::Debug for RunPeriodically {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunPeriodically")
            .field("period", &self.period)
            .field("elapsed", &self.elapsed)
            .field("action", &self.action.name())
            .finish()
    }
}

impl RunPeriodically {
    /// 创建
    pub fn new(period: f64, action: impl Stage + 'static) -> AgResult<Self> {
        if !(period > 0.0) {
            return Err(AgError::config(format!("周期必须为正: {period}")));
        }
        Ok(Self {
            period,
            elapsed: 0.0,
            action: Box::new(action),
        })
    }

    /// 自上次执行以来累计的模拟时间 [s]
    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }
}

impl Stage for RunPeriodically {
    fn name(&self) -> &str {
        self.action.name()
    }

    fn run(&mut self, domain: &mut Domain) -> AgResult<()> {
        if domain.dt == 0.0 {
            return Err(AgError::ZeroTimestep);
        }
        if self.elapsed >= self.period {
            self.action.run(domain)?;
            self.elapsed = 0.0;
        }
        self.elapsed += domain.dt;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::simulation::FnStage;
    use crate::mechanism::SimpleChem;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_runs_once_per_period() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let action = FnStage::new("count", move |_: &mut Domain| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let mut periodic = RunPeriodically::new(30.0, action).unwrap();
        let mut domain = Domain::new(Arc::new(SimpleChem::new()));
        domain.dt = 10.0;
        for _ in 0..10 {
            periodic.run(&mut domain).unwrap();
        }
        // 累计 0,10,20,30 → 执行；之后每 3 步一次
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_zero_timestep_is_error() {
        let action = FnStage::new("noop", |_: &mut Domain| Ok(()));
        let mut periodic = RunPeriodically::new(30.0, action).unwrap();
        let mut domain = Domain::new(Arc::new(SimpleChem::new()));
        let err = periodic.run(&mut domain).unwrap_err();
        assert!(matches!(err, AgError::ZeroTimestep));
    }
}
