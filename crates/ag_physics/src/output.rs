// crates/ag_physics/src/output.rs

//! 结果输出
//!
//! 收尾阶段 [`Output`] 把每个单元的最终 `Cf`、几何、人口与死亡率以及
//! 选定输出变量的值整理成 [`CellRecord`]，交给 [`Outputter`]。序列化格式
//! 由具体的输出器决定。

use crate::engine::executor::ensure_finite_concentrations;
use crate::engine::simulation::{Domain, Stage};
use ag_foundation::error::{ensure_finite, AgResult};
use ag_grid::Rect;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// 单个单元的输出记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellRecord {
    /// 在单元全序中的位置
    pub index: usize,
    /// 层号
    pub layer: usize,
    /// 水平范围
    pub rect: Rect,
    /// 底面高度 [m]
    pub z_bottom: f64,
    /// 厚度 [m]
    pub dz: f64,
    /// 最终浓度（模型物种）
    pub cf: Vec<f64>,
    /// 输出变量值
    pub values: BTreeMap<String, f64>,
    /// 各人口列人数
    pub population: Vec<f64>,
    /// 基线死亡率
    pub mortality_rate: f64,
}

/// 输出器
pub trait Outputter: Send {
    /// 写出全部记录；`columns` 为人口列名
    fn output(&mut self, columns: &[String], records: &[CellRecord]) -> AgResult<()>;
}

/// 保存在内存中的输出器，克隆后共享同一份记录
#[derive(Debug, Clone, Default)]
pub struct CollectOutputter {
    records: Arc<Mutex<Vec<CellRecord>>>,
}

impl CollectOutputter {
    /// 创建
    pub fn new() -> Self {
        Self::default()
    }

    /// 已收集记录的副本
    pub fn records(&self) -> Vec<CellRecord> {
        self.records.lock().clone()
    }

    /// 记录数
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl Outputter for CollectOutputter {
    fn output(&mut self, _columns: &[String], records: &[CellRecord]) -> AgResult<()> {
        let mut guard = self.records.lock();
        guard.clear();
        guard.extend_from_slice(records);
        Ok(())
    }
}

/// 输出阶段
pub struct Output {
    outputter: Box<dyn Outputter>,
    all_layers: bool,
    variables: Vec<String>,
}

impl std::fmt::Debug for Output {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Output")
            .field("all_layers", &self.all_layers)
            .field("variables", &self.variables)
            .finish_non_exhaustive()
    }
}

impl Output {
    /// 创建；`all_layers` 为假时只输出地面层
    pub fn new(outputter: impl Outputter + 'static, all_layers: bool, variables: Vec<String>) -> Self {
        Self {
            outputter: Box::new(outputter),
            all_layers,
            variables,
        }
    }

    /// 整理输出记录；任何单元的 `Cf` 或输出变量非有限时报错
    pub fn collect(&self, domain: &Domain) -> AgResult<Vec<CellRecord>> {
        let grid = domain.grid()?;
        let mech = domain.mechanism();
        ensure_finite_concentrations(grid)?;
        let mut records = Vec::new();
        for (index, (_, cell)) in grid.interior_cells().enumerate() {
            if !self.all_layers && cell.layer != 0 {
                continue;
            }
            let mut values = BTreeMap::new();
            for var in &self.variables {
                let v = ensure_finite(|| format!("单元 {index} 的输出变量 {var}"), mech.value(cell, var)?)?;
                values.insert(var.clone(), v);
            }
            records.push(CellRecord {
                index,
                layer: cell.layer,
                rect: cell.rect,
                z_bottom: cell.z_bottom,
                dz: cell.dz,
                cf: cell.cf(),
                values,
                population: cell.population.clone(),
                mortality_rate: cell.mortality_rate,
            });
        }
        Ok(records)
    }
}

impl Stage for Output {
    fn name(&self) -> &str {
        "output"
    }

    fn run(&mut self, domain: &mut Domain) -> AgResult<()> {
        let records = self.collect(domain)?;
        let columns = domain.grid()?.pop_columns().to_vec();
        self.outputter.output(&columns, &records)?;
        log::info!("输出 {} 个单元, {} 个变量", records.len(), self.variables.len());
        Ok(())
    }
}
