// crates/ag_physics/src/engine/mutator.rs

//! 网格变异
//!
//! [`GridMutator`] 判断单元是否需要加密，[`MutateGrid`] 反复分裂满足条件的
//! 单元，直到没有单元再分裂或都到达最大嵌套级数。分裂后子单元继承父单元
//! 浓度，由构建器重新填充系数与人口，并重新计算排放。可选地把不再需要
//! 加密的完整兄弟组合并回父单元。

use super::simulation::{Domain, Stage};
use crate::emissions::EmissionsSource;
use crate::mechanism::Mechanism;
use ag_config::VarGridConfig;
use ag_foundation::error::{AgError, AgResult};
use ag_grid::{check_invariants, Cell, CellId, Direction, Grid, GridBuilder};
use glam::DVec2;
use std::collections::BTreeMap;
use std::sync::Arc;

// ============================================================================
// 判据
// ============================================================================

/// 全域总量
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MutationTotals {
    /// Σ(Cf·V)，全部物种
    pub mass: f64,
    /// 地面层总人口
    pub population: f64,
}

/// 全域总质量与地面层总人口
pub fn total_mass_population(grid: &Grid, pop_index: usize) -> MutationTotals {
    let mut totals = MutationTotals::default();
    for (_, cell) in grid.interior_cells() {
        let v = cell.volume();
        totals.mass += cell.cf().iter().map(|c| c * v).sum::<f64>();
        if cell.layer == 0 {
            totals.population += cell.population_of(pop_index);
        }
    }
    totals
}

/// 单元正下方地面层的人口，按重叠面积分摊
pub fn ground_population(grid: &Grid, cell: &Cell, pop_index: usize) -> f64 {
    if cell.layer == 0 {
        return cell.population_of(pop_index);
    }
    cell.neighbors
        .ground_level
        .iter()
        .filter_map(|e| grid.cell(e.target))
        .map(|g| g.population_of(pop_index) * g.rect.overlap_area(&cell.rect) / g.area())
        .sum()
}

/// 加密判据
pub trait GridMutator: Send + Sync {
    /// 名称
    fn name(&self) -> &str;

    /// 使用的人口列
    fn pop_column(&self) -> &str;

    /// 单元是否应当分裂
    fn should_divide(&self, grid: &Grid, cell: &Cell, pop_index: usize, totals: MutationTotals) -> bool;
}

/// 按人口数或人口密度加密
#[derive(Debug, Clone)]
pub struct PopulationMutator {
    hi_res_layers: usize,
    pop_column: String,
    pop_threshold: f64,
}

impl PopulationMutator {
    /// 由网格配置创建；人口阈值与密度阈值都必须为正
    pub fn new(config: &VarGridConfig) -> AgResult<Self> {
        if !(config.pop_threshold > 0.0) {
            return Err(AgError::config(format!(
                "pop_threshold 必须为正: {}",
                config.pop_threshold
            )));
        }
        if !(config.pop_density_threshold > 0.0) {
            return Err(AgError::config(format!(
                "pop_density_threshold 必须为正: {}",
                config.pop_density_threshold
            )));
        }
        Ok(Self {
            hi_res_layers: config.hi_res_layers,
            pop_column: config.pop_grid_column.clone(),
            pop_threshold: config.pop_threshold,
        })
    }
}

impl GridMutator for PopulationMutator {
    fn name(&self) -> &str {
        "population"
    }

    fn pop_column(&self) -> &str {
        &self.pop_column
    }

    fn should_divide(&self, grid: &Grid, cell: &Cell, pop_index: usize, _totals: MutationTotals) -> bool {
        if cell.layer >= self.hi_res_layers {
            return false;
        }
        if ground_population(grid, cell, pop_index) > self.pop_threshold {
            return true;
        }
        if cell.layer == 0 {
            return cell.above_density_threshold;
        }
        cell.neighbors
            .ground_level
            .iter()
            .filter_map(|e| grid.cell(e.target))
            .any(|g| g.above_density_threshold && g.rect.overlap_area(&cell.rect) > 0.0)
    }
}

/// 按浓度差与人口差的乘积加密
#[derive(Debug, Clone)]
pub struct PopConcMutator {
    hi_res_layers: usize,
    pop_column: String,
    threshold: f64,
}

impl PopConcMutator {
    /// 由网格配置创建
    pub fn new(config: &VarGridConfig) -> AgResult<Self> {
        if !(config.pop_conc_threshold > 0.0) {
            return Err(AgError::config(format!(
                "pop_conc_threshold 必须为正: {}",
                config.pop_conc_threshold
            )));
        }
        Ok(Self {
            hi_res_layers: config.hi_res_layers,
            pop_column: config.pop_grid_column.clone(),
            threshold: config.pop_conc_threshold,
        })
    }
}

impl GridMutator for PopConcMutator {
    fn name(&self) -> &str {
        "pop_conc"
    }

    fn pop_column(&self) -> &str {
        &self.pop_column
    }

    fn should_divide(&self, grid: &Grid, cell: &Cell, pop_index: usize, totals: MutationTotals) -> bool {
        if cell.layer >= self.hi_res_layers {
            return false;
        }
        let norm = totals.mass * totals.population;
        if !(norm > 0.0) {
            return false;
        }
        let cf = cell.cf();
        let v = cell.volume();
        let pop = ground_population(grid, cell, pop_index);
        Direction::LATERAL.iter().any(|&dir| {
            cell.neighbors
                .get(dir)
                .iter()
                .filter_map(|e| grid.cell(e.target))
                .filter(|n| !n.is_boundary())
                .any(|n| {
                    let dc: f64 = cf.iter().zip(n.cf()).map(|(a, b)| (a - b).abs()).sum();
                    let dp = (pop - ground_population(grid, n, pop_index)).abs();
                    dc * (v + n.volume()) * dp / norm > self.threshold
                })
        })
    }
}

// ============================================================================
// 变异阶段
// ============================================================================

/// 一次变异的统计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MutationSummary {
    /// 被分裂的单元数
    pub divided: usize,
    /// 新增的单元数（子单元数减去父单元数）
    pub added: usize,
    /// 合并的兄弟组数
    pub merged: usize,
}

/// 分裂/合并网格的阶段
pub struct MutateGrid {
    mutator: Box<dyn GridMutator>,
    builder: Arc<dyn GridBuilder>,
    xnests: Vec<usize>,
    ynests: Vec<usize>,
    origin: DVec2,
    coarse: DVec2,
    emissions: Option<Arc<EmissionsSource>>,
    merge: bool,
}

impl std::fmt::Debug for MutateGrid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutateGrid")
            .field("mutator", &self.mutator.name())
            .field("xnests", &self.xnests)
            .field("ynests", &self.ynests)
            .field("has_emissions", &self.emissions.is_some())
            .field("merge", &self.merge)
            .finish()
    }
}

impl MutateGrid {
    /// 创建
    pub fn new(
        config: &VarGridConfig,
        builder: Arc<dyn GridBuilder>,
        mutator: impl GridMutator + 'static,
    ) -> AgResult<Self> {
        if config.xnests.len() != config.ynests.len() {
            return Err(AgError::config("xnests 与 ynests 长度必须一致"));
        }
        if config.xnests.iter().chain(&config.ynests).any(|&n| n == 0) {
            return Err(AgError::config("嵌套分裂因子必须为正"));
        }
        Ok(Self {
            mutator: Box::new(mutator),
            builder,
            xnests: config.xnests.clone(),
            ynests: config.ynests.clone(),
            origin: DVec2::new(config.x0, config.y0),
            coarse: DVec2::new(config.dx, config.dy),
            emissions: None,
            merge: false,
        })
    }

    /// 为新单元重新计算排放
    #[must_use]
    pub fn with_emissions(mut self, source: Arc<EmissionsSource>) -> Self {
        self.emissions = Some(source);
        self
    }

    /// 是否合并不再需要加密的兄弟组
    #[must_use]
    pub fn with_merge(mut self, merge: bool) -> Self {
        self.merge = merge;
        self
    }

    fn max_level(&self) -> usize {
        self.xnests.len()
    }

    fn factor(&self, level: usize) -> (usize, usize) {
        (self.xnests[level], self.ynests[level])
    }

    /// 单元所属的粗网格列与行
    fn coarse_index(&self, cell: &Cell) -> (i64, i64) {
        let c = (cell.centroid() - self.origin) / self.coarse;
        (c.x.floor() as i64, c.y.floor() as i64)
    }

    /// 执行一次变异
    pub fn mutate(&self, grid: &mut Grid, mechanism: &dyn Mechanism) -> AgResult<MutationSummary> {
        let pop_index = grid.pop_column_index(self.mutator.pop_column())?;
        let mut summary = MutationSummary::default();
        let mut created: Vec<CellId> = Vec::new();

        loop {
            let totals = total_mass_population(grid, pop_index);
            let mut by_level: BTreeMap<usize, Vec<CellId>> = BTreeMap::new();
            for (id, cell) in grid.interior_cells() {
                let level = cell.nest.len();
                if level < self.max_level() && self.mutator.should_divide(grid, cell, pop_index, totals) {
                    by_level.entry(level).or_default().push(id);
                }
            }
            if by_level.is_empty() {
                break;
            }
            for (level, ids) in by_level {
                let (nx, ny) = self.factor(level);
                let builder = &self.builder;
                let children = grid.split_cells(&ids, nx, ny, |c| builder.populate(c))?;
                summary.divided += ids.len();
                summary.added += children.len() - ids.len();
                created.retain(|id| !ids.contains(id));
                created.extend(children);
            }
        }

        if self.merge {
            let merged = self.merge_siblings(grid, pop_index, &created)?;
            summary.merged = merged.len();
            created.extend(merged);
        }

        if summary.divided > 0 || summary.merged > 0 {
            check_invariants(grid)?;
            if let Some(source) = &self.emissions {
                created.retain(|id| grid.cell(*id).is_some());
                source.apply(grid, mechanism, &created)?;
            }
        }
        Ok(summary)
    }

    /// 合并完整且都不需要加密的兄弟组，每组最多合并一级
    fn merge_siblings(&self, grid: &mut Grid, pop_index: usize, created: &[CellId]) -> AgResult<Vec<CellId>> {
        let totals = total_mass_population(grid, pop_index);
        // 嵌套路径相对于粗网格单元，分组键需带上粗网格位置
        type Key = (usize, (i64, i64), Vec<(u16, u16)>);
        let mut groups: BTreeMap<Key, Vec<CellId>> = BTreeMap::new();
        let mut blocked: Vec<Key> = Vec::new();
        for (id, cell) in grid.interior_cells() {
            let Some((_, prefix)) = cell.nest.split_last() else {
                continue;
            };
            let key = (cell.layer, self.coarse_index(cell), prefix.to_vec());
            if created.contains(&id) || self.mutator.should_divide(grid, cell, pop_index, totals) {
                blocked.push(key.clone());
            }
            groups.entry(key).or_default().push(id);
        }

        let mut parents = Vec::new();
        for (key, ids) in groups {
            if blocked.contains(&key) {
                continue;
            }
            let (nx, ny) = self.factor(key.2.len());
            if ids.len() != nx * ny {
                continue;
            }
            let builder = &self.builder;
            parents.push(grid.merge_cells(&ids, |c| builder.populate(c))?);
        }
        Ok(parents)
    }
}

impl Stage for MutateGrid {
    fn name(&self) -> &str {
        "mutate_grid"
    }

    fn run(&mut self, domain: &mut Domain) -> AgResult<()> {
        let mechanism = domain.mechanism().clone();
        let grid = domain.grid_mut()?;
        let before = grid.n_interior();
        let summary = self.mutate(grid, mechanism.as_ref())?;
        log::info!(
            "网格变异({}): 分裂 {} 个单元, 新增 {} 个, 合并 {} 组, 内部单元 {} → {}",
            self.mutator.name(),
            summary.divided,
            summary.added,
            summary.merged,
            before,
            grid.n_interior()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mechanism::SimpleChem;
    use ag_grid::{CellCoefficients, NestedGridBuilder, PopulationPatches, Rect, UniformBackground};

    fn config() -> VarGridConfig {
        VarGridConfig {
            x0: 0.0,
            y0: 0.0,
            dx: 1000.0,
            dy: 1000.0,
            nx: 2,
            ny: 2,
            xnests: vec![2, 2],
            ynests: vec![2, 2],
            layer_heights: vec![50.0, 100.0, 200.0],
            hi_res_layers: 2,
            pop_threshold: 5000.0,
            pop_density_threshold: 1.0,
            ..Default::default()
        }
    }

    fn builder(config: &VarGridConfig) -> Arc<NestedGridBuilder> {
        let background = UniformBackground::constant(
            CellCoefficients {
                kxxyy: 10.0,
                kzz: 1.0,
                ..Default::default()
            },
            config.n_layers(),
        )
        .unwrap();
        // 西南角单元人口 1e4，其余极少
        let pop = PopulationPatches::uniform(vec!["TotalPop".into()], vec![1e-6], 500.0)
            .unwrap()
            .with_patch(Rect::new(0.0, 0.0, 1000.0, 1000.0), vec![1e-2])
            .unwrap();
        Arc::new(NestedGridBuilder::new(config.clone(), Arc::new(background), Arc::new(pop)).unwrap())
    }

    #[test]
    fn test_population_mutator_refines_dense_corner() {
        let config = config();
        let builder = builder(&config);
        let mut grid = builder.build(9).unwrap();
        let before = grid.n_interior();
        let stage = MutateGrid::new(&config, builder.clone(), PopulationMutator::new(&config).unwrap()).unwrap();
        let summary = stage.mutate(&mut grid, &SimpleChem::new()).unwrap();

        // 第一级：两层各 1 个单元分裂为 4；子单元人口 2500 不再超过阈值
        assert_eq!(summary.divided, 2);
        assert_eq!(summary.added, 6);
        assert_eq!(grid.n_interior(), before + 6);
        // 第三层不加密
        assert_eq!(grid.layer_cells(2).count(), 4);
        check_invariants(&grid).unwrap();
    }

    #[test]
    fn test_mutation_preserves_mass() {
        let config = config();
        let builder = builder(&config);
        let mut grid = builder.build(9).unwrap();
        let ids = grid.interior().to_vec();
        for (k, id) in ids.into_iter().enumerate() {
            grid.cell_mut(id).unwrap().set_concentration(&[k as f64; 9]);
        }
        let before = grid.interior_mass();
        let stage = MutateGrid::new(&config, builder.clone(), PopulationMutator::new(&config).unwrap()).unwrap();
        stage.mutate(&mut grid, &SimpleChem::new()).unwrap();
        for (a, b) in before.iter().zip(grid.interior_mass()) {
            assert!((a - b).abs() <= 1e-9 * a.abs().max(1.0));
        }
    }

    #[test]
    fn test_thresholds_must_be_positive() {
        let mut config = config();
        config.pop_density_threshold = 0.0;
        assert!(PopulationMutator::new(&config).unwrap_err().is_configuration());
        config.pop_conc_threshold = -1.0;
        assert!(PopConcMutator::new(&config).is_err());
    }

    #[test]
    fn test_pop_conc_mutator_needs_gradient() {
        let config = VarGridConfig {
            pop_conc_threshold: 1e-3,
            ..config()
        };
        let builder = builder(&config);
        let mut grid = builder.build(9).unwrap();
        let stage = MutateGrid::new(&config, builder.clone(), PopConcMutator::new(&config).unwrap()).unwrap();

        // 浓度均匀：不分裂
        let summary = stage.mutate(&mut grid, &SimpleChem::new()).unwrap();
        assert_eq!(summary.divided, 0);

        // 人口密集的单元浓度高：它和邻居之间出现乘积梯度
        let hot = grid.layer_cells(0).next().map(|(id, _)| id).unwrap();
        grid.cell_mut(hot).unwrap().set_concentration(&[1.0; 9]);
        let summary = stage.mutate(&mut grid, &SimpleChem::new()).unwrap();
        assert!(summary.divided > 0);
        check_invariants(&grid).unwrap();
    }

    #[test]
    fn test_pop_conc_mutator_ignores_vertical_gradient() {
        let config = VarGridConfig {
            pop_conc_threshold: 1e-3,
            ..config()
        };
        let builder = builder(&config);
        let mut grid = builder.build(9).unwrap();
        MutateGrid::new(&config, builder.clone(), PopulationMutator::new(&config).unwrap())
            .unwrap()
            .mutate(&mut grid, &SimpleChem::new())
            .unwrap();

        // 西南角下两层已加密，第三层仍是粗单元；只有第三层有浓度。
        // 加密子单元与其上方粗单元之间浓度差和人口差都很大，但水平方向均匀
        let top: Vec<_> = grid.layer_cells(2).map(|(id, _)| id).collect();
        for id in top {
            grid.cell_mut(id).unwrap().set_concentration(&[1.0; 9]);
        }
        let before = grid.n_interior();
        let stage = MutateGrid::new(&config, builder.clone(), PopConcMutator::new(&config).unwrap()).unwrap();
        let summary = stage.mutate(&mut grid, &SimpleChem::new()).unwrap();
        assert_eq!(summary.divided, 0);
        assert_eq!(grid.n_interior(), before);
    }

    #[test]
    fn test_merge_restores_coarse_cells() {
        let config = config();
        let builder = builder(&config);
        let mut grid = builder.build(9).unwrap();
        let before = grid.n_interior();
        let split = MutateGrid::new(&config, builder.clone(), PopulationMutator::new(&config).unwrap()).unwrap();
        split.mutate(&mut grid, &SimpleChem::new()).unwrap();

        // 阈值调高后不再需要加密，兄弟组合并回去
        let relaxed = VarGridConfig {
            pop_threshold: 1e9,
            pop_density_threshold: 1e9,
            ..config.clone()
        };
        let merge = MutateGrid::new(&relaxed, builder.clone(), PopulationMutator::new(&relaxed).unwrap())
            .unwrap()
            .with_merge(true);
        let summary = merge.mutate(&mut grid, &SimpleChem::new()).unwrap();
        assert_eq!(summary.merged, 2);
        assert_eq!(grid.n_interior(), before);
    }
}
