// crates/ag_physics/tests/common/mod.rs

//! 集成测试共用的网格与系数

#![allow(dead_code)]

use ag_config::VarGridConfig;
use ag_grid::{
    CellCoefficients, CellId, Grid, GridBuilder, NestedGridBuilder, PopulationPatches, Rect,
    UniformBackground,
};
use std::sync::Arc;

/// 相对误差
pub fn rel_err(actual: f64, expected: f64) -> f64 {
    if expected == 0.0 {
        actual.abs()
    } else {
        ((actual - expected) / expected).abs()
    }
}

/// 3×3 粗网格、三层，带人口密集块
pub fn config() -> VarGridConfig {
    VarGridConfig {
        x0: 0.0,
        y0: 0.0,
        dx: 1000.0,
        dy: 1000.0,
        nx: 3,
        ny: 3,
        xnests: vec![2, 2],
        ynests: vec![2, 2],
        layer_heights: vec![50.0, 100.0, 200.0],
        hi_res_layers: 2,
        pop_threshold: 5000.0,
        pop_density_threshold: 1.0,
        pop_conc_threshold: 1e-6,
        ..Default::default()
    }
}

/// 典型的逐层系数
pub fn coefficients(layer: usize) -> CellCoefficients {
    let k = layer as f64;
    CellCoefficients {
        u_avg: 2.0 + 0.5 * k,
        v_avg: -1.0,
        w_avg: 0.01,
        u_deviation: 0.4,
        v_deviation: 0.3,
        kxxyy: 150.0,
        kzz: 5.0 + k,
        m2u: 1e-4,
        so2_oxidation: 2e-6,
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

/// 对流守恒的背景场
pub fn background(config: &VarGridConfig) -> UniformBackground {
    let profile = (0..config.n_layers()).map(coefficients).collect();
    UniformBackground::new(profile)
        .unwrap()
        .with_balanced_convection(&config.layer_heights)
}

/// 中心粗单元人口密集的人口数据
pub fn population() -> PopulationPatches {
    PopulationPatches::uniform(vec!["TotalPop".into()], vec![1e-4], 800.0)
        .unwrap()
        .with_patch(Rect::new(1000.0, 1000.0, 2000.0, 2000.0), vec![1e-2])
        .unwrap()
}

/// 网格构建器
pub fn builder(config: &VarGridConfig) -> Arc<NestedGridBuilder> {
    Arc::new(
        NestedGridBuilder::new(config.clone(), Arc::new(background(config)), Arc::new(population()))
            .unwrap(),
    )
}

/// 构建好的粗网格
pub fn grid(n_species: usize) -> Grid {
    let config = config();
    builder(&config).build(n_species).unwrap()
}

/// 包含点的某层单元
pub fn cell_at(grid: &Grid, x: f64, y: f64, layer: usize) -> CellId {
    grid.index()
        .locate_point(glam::DVec2::new(x, y), layer)
        .into_iter()
        .next()
        .unwrap()
}

/// 全部物种的总质量（含边界与已拆除边界）
pub fn total_mass(grid: &Grid) -> f64 {
    grid.total_mass().iter().sum()
}
