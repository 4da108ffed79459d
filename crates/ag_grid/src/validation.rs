// crates/ag_grid/src/validation.rs

//! 单元图不变量校验
//!
//! 检查项：
//! - 每个内部单元六个方向及地面投影的覆盖率之和为 1
//! - 非边界边存在反向边，且扩散系数与中心距一致
//! - 地面层单元的下方邻居为自身
//! - 从地面投影单元沿上方边可以到达本单元
//! - 邻居引用均有效，浓度与系数均为有限值

use crate::cell::{CellId, Direction};
use crate::grid::Grid;
use ag_foundation::error::AgResult;
use ag_foundation::tolerance::{COVER_FRAC_TOL, RECIPROCITY_TOL};
use ag_foundation::validation::{ValidationError, ValidationReport};
use std::collections::{HashSet, VecDeque};

/// 反向边记录的数值是否一致（绝对容差）
fn reciprocal(a: f64, b: f64) -> bool {
    (a - b).abs() <= RECIPROCITY_TOL
}

/// 校验全部内部单元
pub fn validate_grid(grid: &Grid) -> ValidationReport {
    let mut report = ValidationReport::new();
    for (id, _) in grid.interior_cells() {
        validate_cell(grid, id, &mut report);
    }
    report
}

/// 校验失败时返回 [`AgError::InvariantViolation`](ag_foundation::AgError)
pub fn check_invariants(grid: &Grid) -> AgResult<()> {
    validate_grid(grid).into_result()
}

/// 校验单个内部单元
pub fn validate_cell(grid: &Grid, id: CellId, report: &mut ValidationReport) {
    let Some(cell) = grid.cell(id) else {
        report.add_error(ValidationError::DanglingReference {
            cell: "interior list".into(),
            target: id.to_string(),
        });
        return;
    };
    let name = || format!("{id} (layer {}, {:?})", cell.layer, cell.centroid());

    // 覆盖率
    for dir in Direction::ALL {
        let sum: f64 = cell.neighbors.get(dir).iter().map(|e| e.info.cover_frac).sum();
        if (sum - 1.0).abs() > COVER_FRAC_TOL {
            report.add_error(ValidationError::CoverageSum {
                cell: name(),
                direction: dir.name(),
                sum,
            });
        }
    }
    let ground_sum: f64 = cell.neighbors.ground_level.iter().map(|e| e.info.cover_frac).sum();
    if (ground_sum - 1.0).abs() > COVER_FRAC_TOL {
        report.add_error(ValidationError::CoverageSum {
            cell: name(),
            direction: "ground_level",
            sum: ground_sum,
        });
    }

    // 悬垂引用与反向边
    for dir in Direction::ALL {
        for edge in cell.neighbors.get(dir) {
            let Some(other) = grid.cell(edge.target) else {
                report.add_error(ValidationError::DanglingReference {
                    cell: name(),
                    target: edge.target.to_string(),
                });
                continue;
            };
            if other.is_boundary() || edge.target == id {
                continue;
            }
            let back = other
                .neighbors
                .get(dir.opposite())
                .iter()
                .find(|e| e.target == id);
            match back {
                None => report.add_error(ValidationError::Reciprocity {
                    cell: name(),
                    neighbor: edge.target.to_string(),
                    direction: dir.name(),
                    message: "缺少反向边".into(),
                }),
                Some(back) => {
                    if !reciprocal(back.info.diff, edge.info.diff) {
                        report.add_error(ValidationError::Reciprocity {
                            cell: name(),
                            neighbor: edge.target.to_string(),
                            direction: dir.name(),
                            message: format!("diff {} != {}", edge.info.diff, back.info.diff),
                        });
                    }
                    if !reciprocal(back.info.center_distance, edge.info.center_distance) {
                        report.add_error(ValidationError::Reciprocity {
                            cell: name(),
                            neighbor: edge.target.to_string(),
                            direction: dir.name(),
                            message: format!(
                                "center_distance {} != {}",
                                edge.info.center_distance, back.info.center_distance
                            ),
                        });
                    }
                }
            }
        }
    }

    // 地面自环
    if cell.layer == 0 {
        let ok = cell.neighbors.below.len() == 1 && cell.neighbors.below[0].target == id;
        if !ok {
            report.add_error(ValidationError::GroundSelfLoop { cell: name() });
        }
    }

    // 地面投影沿上方边可达
    for g in &cell.neighbors.ground_level {
        if !reaches_via_above(grid, g.target, id, cell.layer) {
            report.add_error(ValidationError::GroundLevelReach {
                cell: name(),
                ground: g.target.to_string(),
            });
        }
    }

    // 非有限值
    if let Some((field, value)) = cell.coeffs.first_non_finite() {
        report.add_error(ValidationError::NonFinite {
            field,
            cell: name(),
            value,
        });
    }
    if let Some(value) = cell.ci.iter().copied().find(|v| !v.is_finite()) {
        report.add_error(ValidationError::NonFinite {
            field: "ci",
            cell: name(),
            value,
        });
    }
    if let Some(value) = cell.lock().cf.iter().copied().find(|v| !v.is_finite()) {
        report.add_error(ValidationError::NonFinite {
            field: "cf",
            cell: name(),
            value,
        });
    }
}

/// 从 `start` 出发沿上方边（零次或多次）能否到达 `target`
fn reaches_via_above(grid: &Grid, start: CellId, target: CellId, max_layer: usize) -> bool {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([start]);
    while let Some(id) = queue.pop_front() {
        if id == target {
            return true;
        }
        if !seen.insert(id) {
            continue;
        }
        let Some(cell) = grid.cell(id) else {
            continue;
        };
        if cell.is_boundary() || cell.layer >= max_layer {
            continue;
        }
        queue.extend(cell.neighbors.above.iter().map(|e| e.target));
    }
    false
}
