// crates/ag_grid/tests/invariants.rs

//! 单元图不变量测试
//! 构建、分裂、合并后覆盖率、反向边、地面自环与地面可达性均成立

use ag_config::VarGridConfig;
use ag_grid::geometry::{Geometry, Polygon};
use ag_grid::{
    check_invariants, validate_grid, CellCoefficients, Direction, Grid, GridBuilder,
    NestedGridBuilder, PopulationPatches, Rect, UniformBackground,
};
use glam::DVec2;
use std::sync::Arc;

fn build(nx: usize, ny: usize, layers: Vec<f64>) -> (NestedGridBuilder, Grid) {
    let config = VarGridConfig {
        dx: 1000.0,
        dy: 1000.0,
        nx,
        ny,
        layer_heights: layers.clone(),
        ..Default::default()
    };
    let profile: Vec<CellCoefficients> = (0..layers.len())
        .map(|k| CellCoefficients {
            kxxyy: 40.0 + k as f64,
            kzz: 3.0 + 2.0 * k as f64,
            ..Default::default()
        })
        .collect();
    let background = UniformBackground::new(profile).unwrap();
    let pop = PopulationPatches::uniform(vec!["TotalPop".into()], vec![1e-3], 700.0).unwrap();
    let builder = NestedGridBuilder::new(config, Arc::new(background), Arc::new(pop)).unwrap();
    let grid = builder.build(3).unwrap();
    (builder, grid)
}

fn assert_valid(grid: &Grid) {
    let report = validate_grid(grid);
    assert!(report.is_valid(), "{report}");
}

/// 所有方向覆盖率之和为 1
#[test]
fn test_coverage_sums_after_build() {
    let (_, grid) = build(3, 3, vec![20.0, 40.0, 80.0]);
    for (_, cell) in grid.interior_cells() {
        for dir in Direction::ALL {
            let sum: f64 = cell.neighbors.get(dir).iter().map(|e| e.info.cover_frac).sum();
            assert!((sum - 1.0).abs() < 1e-10, "{} sum = {sum}", dir.name());
        }
    }
    assert_valid(&grid);
}

/// 地面层单元的下方邻居是自身
#[test]
fn test_ground_self_loop() {
    let (_, grid) = build(2, 2, vec![20.0, 40.0]);
    for (id, cell) in grid.layer_cells(0) {
        assert_eq!(cell.neighbors.below.len(), 1);
        assert_eq!(cell.neighbors.below[0].target, id);
    }
}

/// 分裂地面单元后，上层粗单元的 below 与 ground_level 被重推
#[test]
fn test_split_ground_cell_relinks_upper_layers() {
    let (builder, mut grid) = build(2, 2, vec![20.0, 40.0, 80.0]);
    let target = grid.layer_cells(0).next().map(|(id, _)| id).unwrap();
    let rect = grid.cell(target).unwrap().rect;
    let kids = grid.split_cell(target, 2, 2, |c| builder.populate(c)).unwrap();
    assert_eq!(kids.len(), 4);
    assert_valid(&grid);

    let upper = grid
        .index()
        .locate_point(rect.center(), 1)
        .into_iter()
        .next()
        .unwrap();
    let up = grid.cell(upper).unwrap();
    assert_eq!(up.neighbors.below.len(), 4);
    assert_eq!(up.neighbors.ground_level.len(), 4);
    for e in &up.neighbors.below {
        assert!((e.info.cover_frac - 0.25).abs() < 1e-12);
    }

    // 粗邻居东侧看到两个子单元，各占一半
    let east = grid.index().locate_point(DVec2::new(1500.0, 500.0), 0)[0];
    let west_edges = &grid.cell(east).unwrap().neighbors.west;
    assert_eq!(west_edges.len(), 2);
    assert!(west_edges.iter().all(|e| (e.info.cover_frac - 0.5).abs() < 1e-12));
}

/// 两级嵌套与相邻粗单元混合时不变量仍成立
#[test]
fn test_two_level_nesting() {
    let (builder, mut grid) = build(3, 2, vec![20.0, 40.0]);
    let first = grid.layer_cells(0).nth(1).map(|(id, _)| id).unwrap();
    let kids = grid.split_cell(first, 2, 2, |c| builder.populate(c)).unwrap();
    grid.split_cell(kids[3], 2, 2, |c| builder.populate(c)).unwrap();
    let upper = grid.layer_cells(1).next().map(|(id, _)| id).unwrap();
    grid.split_cell(upper, 2, 2, |c| builder.populate(c)).unwrap();
    assert_valid(&grid);
    assert!(check_invariants(&grid).is_ok());
    assert_eq!(grid.n_interior(), 6 + 3 + 3 + 6 + 3);
}

/// 合并恢复原拓扑
#[test]
fn test_merge_round_trip_restores_topology() {
    let (builder, mut grid) = build(2, 2, vec![20.0, 40.0]);
    let n_before = grid.n_interior();
    let n_boundary_before = grid.boundary_ids().count();
    let target = grid.layer_cells(0).next().map(|(id, _)| id).unwrap();
    let kids = grid.split_cell(target, 2, 2, |c| builder.populate(c)).unwrap();
    assert_eq!(grid.n_interior(), n_before + 3);
    grid.merge_cells(&kids, |c| builder.populate(c)).unwrap();
    assert_eq!(grid.n_interior(), n_before);
    assert_eq!(grid.boundary_ids().count(), n_boundary_before);
    assert_valid(&grid);
}

/// 非兄弟单元不能合并
#[test]
fn test_merge_rejects_non_siblings() {
    let (_, mut grid) = build(2, 1, vec![20.0]);
    let ids: Vec<_> = grid.interior().to_vec();
    let err = grid.merge_cells(&ids, |_| {}).unwrap_err();
    assert!(err.is_topology());
}

/// 多边形查询按面积分摊
#[test]
fn test_polygon_query_fractions() {
    let (_, grid) = build(2, 2, vec![20.0]);
    let poly = Polygon::from_rect(&Rect::new(500.0, 500.0, 1500.0, 1500.0));
    let hits = grid.index().intersect(&Geometry::Polygon(poly), 0);
    assert_eq!(hits.len(), 4);
    for (_, f) in hits {
        assert!((f - 0.25).abs() < 1e-12);
    }
}

/// 边界伪单元的数量与位置
#[test]
fn test_boundary_lists() {
    let (_, grid) = build(3, 2, vec![20.0, 40.0]);
    assert_eq!(grid.boundary(Direction::West).unwrap().len(), 2 * 2);
    assert_eq!(grid.boundary(Direction::East).unwrap().len(), 2 * 2);
    assert_eq!(grid.boundary(Direction::South).unwrap().len(), 3 * 2);
    assert_eq!(grid.boundary(Direction::North).unwrap().len(), 3 * 2);
    assert_eq!(grid.boundary(Direction::Above).unwrap().len(), 3 * 2);
    for id in grid.boundary_ids() {
        let cell = grid.cell(id).unwrap();
        assert!(cell.is_boundary());
        assert!(!grid.domain().contains_point(cell.centroid()) || cell.layer == grid.n_layers());
    }
}
