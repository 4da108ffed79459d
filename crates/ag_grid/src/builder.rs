// crates/ag_grid/src/builder.rs

//! 网格构建
//!
//! [`GridBuilder`] 是外部网格构建器的接口：返回满足不变量的单元图，
//! 并能为变异产生的新单元重新填充系数、人口与死亡率。
//!
//! [`NestedGridBuilder`] 是参考实现，按 [`VarGridConfig`] 生成
//! `nx × ny` 的粗网格，单元系数取自 [`BackgroundFields`]，人口取自
//! [`PopulationSource`]。

use crate::cell::{Cell, CellCoefficients};
use crate::geometry::Rect;
use crate::grid::{Grid, LayerStack};
use crate::validation::check_invariants;
use ag_config::VarGridConfig;
use ag_foundation::error::{AgError, AgResult};
use rayon::prelude::*;
use std::sync::Arc;

// ============================================================================
// 背景场
// ============================================================================

/// 背景气象与化学场
pub trait BackgroundFields: Send + Sync {
    /// 给定水平范围与层号的单元系数
    fn coefficients(&self, rect: &Rect, layer: usize) -> CellCoefficients;
}

/// 水平均匀、逐层给定的背景场
#[derive(Debug, Clone)]
pub struct UniformBackground {
    profile: Vec<CellCoefficients>,
}

impl UniformBackground {
    /// 由逐层系数创建
    pub fn new(profile: Vec<CellCoefficients>) -> AgResult<Self> {
        if profile.is_empty() {
            return Err(AgError::config("背景场至少需要一层"));
        }
        for (k, c) in profile.iter().enumerate() {
            if let Some((field, value)) = c.first_non_finite() {
                return Err(AgError::non_finite(format!("背景场第 {k} 层 {field}"), value));
            }
        }
        Ok(Self { profile })
    }

    /// 所有层使用同一组系数
    pub fn constant(coeffs: CellCoefficients, n_layers: usize) -> AgResult<Self> {
        Self::new(vec![coeffs; n_layers])
    }

    /// 按层厚重新计算 ACM2 下行混合率，使对流项对每个柱体守恒
    ///
    /// `M2d_k = M2u_k + M2d_{k+1} · Dz_{k+1} / Dz_k`，顶层 `M2d = M2u`。
    #[must_use]
    pub fn with_balanced_convection(mut self, thickness: &[f64]) -> Self {
        let n = self.profile.len().min(thickness.len());
        let mut above = 0.0;
        for k in (0..n).rev() {
            let c = &mut self.profile[k];
            c.m2d = c.m2u + above / thickness[k];
            above = c.m2d * thickness[k];
        }
        self
    }

    /// 逐层系数
    pub fn profile(&self) -> &[CellCoefficients] {
        &self.profile
    }
}

impl BackgroundFields for UniformBackground {
    fn coefficients(&self, _rect: &Rect, layer: usize) -> CellCoefficients {
        let k = layer.min(self.profile.len() - 1);
        self.profile[k]
    }
}

// ============================================================================
// 人口与死亡率
// ============================================================================

/// 人口与基线死亡率数据
pub trait PopulationSource: Send + Sync {
    /// 人口列名
    fn columns(&self) -> &[String];

    /// 矩形内各列人口 [人]
    fn population(&self, rect: &Rect) -> Vec<f64>;

    /// 矩形内基线死亡率 [每 10 万人每年]
    fn mortality_rate(&self, rect: &Rect) -> f64;
}

/// 人口密度矩形块
#[derive(Debug, Clone)]
pub struct PopulationPatch {
    /// 范围
    pub rect: Rect,
    /// 各列人口密度 [人/m²]
    pub density: Vec<f64>,
}

/// 由若干密度块叠加而成的人口数据，块外为背景密度
#[derive(Debug, Clone)]
pub struct PopulationPatches {
    columns: Vec<String>,
    background_density: Vec<f64>,
    patches: Vec<PopulationPatch>,
    mortality_rate: f64,
}

impl PopulationPatches {
    /// 均匀密度
    pub fn uniform(columns: Vec<String>, density: Vec<f64>, mortality_rate: f64) -> AgResult<Self> {
        if columns.len() != density.len() {
            return Err(AgError::invalid_input(format!(
                "人口列数 {} 与密度数 {} 不符",
                columns.len(),
                density.len()
            )));
        }
        Ok(Self {
            columns,
            background_density: density,
            patches: Vec::new(),
            mortality_rate,
        })
    }

    /// 叠加一个密度块
    pub fn with_patch(mut self, rect: Rect, density: Vec<f64>) -> AgResult<Self> {
        if density.len() != self.columns.len() {
            return Err(AgError::invalid_input("密度块列数与人口列数不符"));
        }
        self.patches.push(PopulationPatch { rect, density });
        Ok(self)
    }
}

impl PopulationSource for PopulationPatches {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn population(&self, rect: &Rect) -> Vec<f64> {
        let area = rect.area();
        let mut pop: Vec<f64> = self.background_density.iter().map(|d| d * area).collect();
        for patch in &self.patches {
            let overlap = rect.overlap_area(&patch.rect);
            if overlap > 0.0 {
                for (p, d) in pop.iter_mut().zip(&patch.density) {
                    *p += d * overlap;
                }
            }
        }
        pop
    }

    fn mortality_rate(&self, _rect: &Rect) -> f64 {
        self.mortality_rate
    }
}

// ============================================================================
// 构建器
// ============================================================================

/// 网格构建器接口
pub trait GridBuilder: Send + Sync {
    /// 构建满足不变量的单元图
    fn build(&self, n_species: usize) -> AgResult<Grid>;

    /// 为新单元填充系数、人口、死亡率与人口密度标记
    fn populate(&self, cell: &mut Cell);
}

/// 嵌套矩形网格构建器
pub struct NestedGridBuilder {
    config: VarGridConfig,
    background: Arc<dyn BackgroundFields>,
    population: Arc<dyn PopulationSource>,
    pop_index: usize,
}

impl std::fmt::Debug for NestedGridBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NestedGridBuilder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl NestedGridBuilder {
    /// 创建构建器，检查人口列是否存在
    pub fn new(
        config: VarGridConfig,
        background: Arc<dyn BackgroundFields>,
        population: Arc<dyn PopulationSource>,
    ) -> AgResult<Self> {
        if config.nx == 0 || config.ny == 0 {
            return Err(AgError::config("nx 与 ny 必须为正"));
        }
        if !(config.dx > 0.0 && config.dy > 0.0) {
            return Err(AgError::config("dx 与 dy 必须为正"));
        }
        if config.xnests.len() != config.ynests.len() {
            return Err(AgError::config("xnests 与 ynests 长度必须一致"));
        }
        let pop_index = population
            .columns()
            .iter()
            .position(|c| *c == config.pop_grid_column)
            .ok_or_else(|| AgError::missing_population_column(config.pop_grid_column.clone()))?;
        Ok(Self {
            config,
            background,
            population,
            pop_index,
        })
    }

    /// 网格配置
    pub fn config(&self) -> &VarGridConfig {
        &self.config
    }

    /// 计算域
    pub fn domain(&self) -> Rect {
        let c = &self.config;
        Rect::from_origin(c.x0, c.y0, c.nx as f64 * c.dx, c.ny as f64 * c.dy)
    }

    fn coarse_rect(&self, i: usize, j: usize) -> Rect {
        let c = &self.config;
        Rect::new(
            c.x0 + i as f64 * c.dx,
            c.y0 + j as f64 * c.dy,
            c.x0 + (i + 1) as f64 * c.dx,
            c.y0 + (j + 1) as f64 * c.dy,
        )
    }
}

impl GridBuilder for NestedGridBuilder {
    fn build(&self, n_species: usize) -> AgResult<Grid> {
        let layers = LayerStack::from_thickness(&self.config.layer_heights)?;
        let mut grid = Grid::new(
            self.domain(),
            layers.clone(),
            n_species,
            self.population.columns().to_vec(),
        );
        let (nx, ny) = (self.config.nx, self.config.ny);

        let cells: Vec<Cell> = (0..layers.len() * ny * nx)
            .into_par_iter()
            .map(|n| {
                let k = n / (nx * ny);
                let j = (n / nx) % ny;
                let i = n % nx;
                let mut cell = Cell::new(
                    self.coarse_rect(i, j),
                    k,
                    layers.bottom(k),
                    layers.thickness(k),
                    n_species,
                );
                self.populate(&mut cell);
                cell
            })
            .collect();
        for cell in cells {
            grid.insert_cell(cell)?;
        }
        grid.link_all()?;
        check_invariants(&grid)?;
        log::info!(
            "网格构建完成: {} 个内部单元, {} 层",
            grid.n_interior(),
            grid.n_layers()
        );
        Ok(grid)
    }

    fn populate(&self, cell: &mut Cell) {
        cell.coeffs = self.background.coefficients(&cell.rect, cell.layer);
        // 只有地面层单元有人口
        if cell.layer == 0 {
            cell.population = self.population.population(&cell.rect);
            cell.mortality_rate = self.population.mortality_rate(&cell.rect);
            cell.above_density_threshold =
                cell.population_of(self.pop_index) / cell.area() > self.config.pop_density_threshold;
        } else {
            cell.population = vec![0.0; self.population.columns().len()];
            cell.mortality_rate = 0.0;
            cell.above_density_threshold = false;
        }
    }
}
