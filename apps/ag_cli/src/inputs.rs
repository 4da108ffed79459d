// apps/ag_cli/src/inputs.rs

//! 模拟输入
//!
//! 一个 JSON 文件给出背景气象剖面、人口数据与排放记录，三项都可省略：
//!
//! ```json
//! {
//!   "background": [{ "u_avg": 2.0, "kzz": 5.0 }],
//!   "population": { "columns": ["TotalPop"], "density": [1e-4], "mortality_rate": 800.0 },
//!   "emissions": [{ "geometry": { "Point": [1500.0, 1500.0] }, "PM2_5": 1e6 }]
//! }
//! ```
//!
//! 背景剖面只有一层时对所有层复用。

use ag_config::VarGridConfig;
use ag_grid::{CellCoefficients, NestedGridBuilder, PopulationPatches, Rect, UniformBackground};
use ag_physics::{EmisRecord, EmissionsSource};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

/// 人口密度块
#[derive(Debug, Clone, Deserialize)]
pub struct PatchInput {
    /// 范围
    pub rect: Rect,
    /// 各列叠加的人口密度 [人/m²]
    pub density: Vec<f64>,
}

/// 人口数据
#[derive(Debug, Clone, Deserialize)]
pub struct PopulationInput {
    /// 人口列名
    pub columns: Vec<String>,
    /// 各列背景密度 [人/m²]
    pub density: Vec<f64>,
    /// 基线死亡率 [每 10 万人每年]
    #[serde(default = "default_mortality")]
    pub mortality_rate: f64,
    /// 密度块
    #[serde(default)]
    pub patches: Vec<PatchInput>,
}

fn default_mortality() -> f64 { 800.0 }

impl Default for PopulationInput {
    fn default() -> Self {
        Self {
            columns: vec!["TotalPop".to_string()],
            density: vec![1e-4],
            mortality_rate: default_mortality(),
            patches: Vec::new(),
        }
    }
}

/// 全部输入
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Inputs {
    /// 自下而上的背景系数剖面
    #[serde(default)]
    pub background: Vec<CellCoefficients>,
    /// 人口
    #[serde(default)]
    pub population: PopulationInput,
    /// 排放
    #[serde(default)]
    pub emissions: Vec<EmisRecord>,
}

/// 未给出背景剖面时的典型值
fn default_coefficients() -> CellCoefficients {
    CellCoefficients {
        u_avg: 2.0,
        v_avg: 1.0,
        u_deviation: 0.5,
        v_deviation: 0.5,
        kxxyy: 100.0,
        kzz: 5.0,
        so2_oxidation: 1e-6,
        aorg_partitioning: 0.3,
        no_partitioning: 0.4,
        nh_partitioning: 0.5,
        particle_wet_dep: 1e-5,
        so2_wet_dep: 2e-5,
        other_gas_wet_dep: 1.5e-5,
        particle_dry_dep: 1e-3,
        nh3_dry_dep: 5e-3,
        so2_dry_dep: 4e-3,
        voc_dry_dep: 2e-3,
        nox_dry_dep: 3e-3,
        ..Default::default()
    }
}

impl Inputs {
    /// 从文件加载，未指定时全部取默认值
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("读取输入失败: {}", path.display()))?;
        let inputs: Inputs = serde_json::from_str(&content)
            .with_context(|| format!("解析输入失败: {}", path.display()))?;
        tracing::info!(
            "输入: {} 层背景剖面, {} 个人口列, {} 条排放记录",
            inputs.background.len(),
            inputs.population.columns.len(),
            inputs.emissions.len()
        );
        Ok(inputs)
    }

    /// 背景场，对流按层厚平衡
    pub fn background(&self, grid: &VarGridConfig) -> Result<UniformBackground> {
        let n = grid.n_layers();
        let profile = match self.background.len() {
            0 => vec![default_coefficients(); n],
            1 => vec![self.background[0]; n],
            m if m == n => self.background.clone(),
            m => bail!("背景剖面有 {m} 层，网格有 {n} 层"),
        };
        Ok(UniformBackground::new(profile)?.with_balanced_convection(&grid.layer_heights))
    }

    /// 人口数据
    pub fn population(&self) -> Result<PopulationPatches> {
        let p = &self.population;
        let mut patches =
            PopulationPatches::uniform(p.columns.clone(), p.density.clone(), p.mortality_rate)?;
        for patch in &p.patches {
            patches = patches.with_patch(patch.rect, patch.density.clone())?;
        }
        Ok(patches)
    }

    /// 网格构建器
    pub fn builder(&self, grid: &VarGridConfig) -> Result<Arc<NestedGridBuilder>> {
        let builder = NestedGridBuilder::new(
            grid.clone(),
            Arc::new(self.background(grid)?),
            Arc::new(self.population()?),
        )?;
        Ok(Arc::new(builder))
    }

    /// 排放源
    pub fn emissions(&self) -> Result<Arc<EmissionsSource>> {
        Ok(Arc::new(EmissionsSource::new(self.emissions.clone())?))
    }
}
