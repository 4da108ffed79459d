// crates/ag_physics/src/mechanism/mod.rs

//! 化学机制接口
//!
//! 机制决定模型物种数、排放物种到模型物种的换算、沉降分组与化学核函数，
//! 以及输出变量的换算与单位。

pub mod simple_chem;

pub use simple_chem::SimpleChem;

use crate::kernels::CellKernel;
use ag_foundation::error::AgResult;
use ag_grid::Cell;

/// 化学机制
pub trait Mechanism: Send + Sync {
    /// 名称
    fn name(&self) -> &str;

    /// 模型物种数
    fn len(&self) -> usize;

    /// 是否没有物种
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 输出变量名（浓度类）
    fn species(&self) -> Vec<&'static str>;

    /// 把排放速率 [μg/s] 换算为模型物种并加到单元的单位体积排放通量
    fn add_emis_flux(&self, cell: &mut Cell, name: &str, value: f64) -> AgResult<()>;

    /// 干沉降核函数
    fn dry_dep(&self, option: &str) -> AgResult<Box<dyn CellKernel>>;

    /// 湿沉降核函数
    fn wet_dep(&self, option: &str) -> AgResult<Box<dyn CellKernel>>;

    /// 化学核函数
    fn chemistry(&self) -> Box<dyn CellKernel>;

    /// 输出变量在单元上的值
    fn value(&self, cell: &Cell, variable: &str) -> AgResult<f64>;

    /// 输出变量单位
    fn units(&self, variable: &str) -> AgResult<&'static str>;
}
