// crates/ag_physics/src/emissions.rs

//! 排放源
//!
//! 排放记录是一个几何体（点、折线或多边形）加上各排放物种的速率 [μg/s]。
//! 记录按包围盒放进 R-Tree；对某个单元，查出包围盒相交的记录，按几何体
//! 落在单元内的比例分摊：
//!
//! - 点：点在单元内时为 1；恰在 k 个单元公共边上时各 1/k
//! - 折线：单元内长度 / 总长度
//! - 多边形：重叠面积 / 总面积
//!
//! 抬升高度决定记录进入哪一层，超出顶层时归入顶层。

use crate::engine::simulation::{Domain, Stage};
use crate::mechanism::Mechanism;
use ag_foundation::error::{AgError, AgResult};
use ag_grid::{Cell, CellId, Geometry, Grid, LayerStack, Rect};
use rstar::{RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ============================================================================
// 排放记录
// ============================================================================

/// 单条排放记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmisRecord {
    /// 几何体
    pub geometry: Geometry,
    /// 有效排放高度 [m]，0 表示地面源
    #[serde(default)]
    pub height: f64,
    /// VOC [μg/s]
    #[serde(rename = "VOC", default)]
    pub voc: f64,
    /// NOx [μg/s]
    #[serde(rename = "NOx", default)]
    pub nox: f64,
    /// NH3 [μg/s]
    #[serde(rename = "NH3", default)]
    pub nh3: f64,
    /// SOx [μg/s]
    #[serde(rename = "SOx", default)]
    pub sox: f64,
    /// 一次 PM2.5 [μg/s]
    #[serde(rename = "PM2_5", default)]
    pub pm25: f64,
}

impl EmisRecord {
    /// 各物种速率全为零的记录
    pub fn new(geometry: Geometry, height: f64) -> Self {
        Self {
            geometry,
            height,
            voc: 0.0,
            nox: 0.0,
            nh3: 0.0,
            sox: 0.0,
            pm25: 0.0,
        }
    }

    /// 五个物种取相同速率
    #[must_use]
    pub fn with_all(mut self, rate: f64) -> Self {
        self.voc = rate;
        self.nox = rate;
        self.nh3 = rate;
        self.sox = rate;
        self.pm25 = rate;
        self
    }

    /// (物种名, 速率)
    pub fn rates(&self) -> [(&'static str, f64); 5] {
        [
            ("VOC", self.voc),
            ("NOx", self.nox),
            ("NH3", self.nh3),
            ("SOx", self.sox),
            ("PM2_5", self.pm25),
        ]
    }

    /// 该记录进入的层
    pub fn layer(&self, layers: &LayerStack) -> usize {
        let n = layers.len();
        if self.height <= 0.0 || n == 0 {
            return 0;
        }
        (0..n)
            .find(|&k| self.height < layers.bottom(k) + layers.thickness(k))
            .unwrap_or(n - 1)
    }

    /// 记录落在某层某单元内的比例
    pub fn fraction_in(&self, grid: &Grid, rect: &Rect, layer: usize) -> f64 {
        match &self.geometry {
            Geometry::Point(p) => {
                if !rect.contains_point(*p) {
                    return 0.0;
                }
                let k = grid.index().locate_point(*p, layer).len().max(1);
                1.0 / k as f64
            }
            Geometry::Line(line) => {
                let total = line.length();
                if total > 0.0 {
                    line.length_within(rect) / total
                } else {
                    0.0
                }
            }
            Geometry::Polygon(poly) => {
                let total = poly.area();
                if total > 0.0 {
                    poly.overlap_area(rect) / total
                } else {
                    0.0
                }
            }
        }
    }
}

// ============================================================================
// 排放源
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
struct RecordEnvelope {
    index: usize,
    bounds: Rect,
}

impl RTreeObject for RecordEnvelope {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(
            [self.bounds.min.x, self.bounds.min.y],
            [self.bounds.max.x, self.bounds.max.y],
        )
    }
}

/// 可按单元查询的排放源
#[derive(Debug, Default)]
pub struct EmissionsSource {
    records: Vec<EmisRecord>,
    tree: RTree<RecordEnvelope>,
}

impl EmissionsSource {
    /// 建立索引并检查记录
    pub fn new(records: Vec<EmisRecord>) -> AgResult<Self> {
        let mut envelopes = Vec::with_capacity(records.len());
        for (index, record) in records.iter().enumerate() {
            let bounds = record
                .geometry
                .bounds()
                .ok_or_else(|| AgError::invalid_input(format!("排放记录 {index} 的几何体为空")))?;
            if !record.height.is_finite() || record.height < 0.0 {
                return Err(AgError::invalid_input(format!(
                    "排放记录 {index} 的高度无效: {}",
                    record.height
                )));
            }
            for (name, rate) in record.rates() {
                if !rate.is_finite() {
                    return Err(AgError::non_finite(format!("排放记录 {index} 的 {name}"), rate));
                }
            }
            envelopes.push(RecordEnvelope { index, bounds });
        }
        Ok(Self {
            tree: RTree::bulk_load(envelopes),
            records,
        })
    }

    /// 记录数
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// 全部记录
    pub fn records(&self) -> &[EmisRecord] {
        &self.records
    }

    /// 各物种分摊到某个单元的排放速率 [μg/s]
    pub fn cell_rates(&self, grid: &Grid, cell: &Cell) -> [(&'static str, f64); 5] {
        let mut totals = [("VOC", 0.0), ("NOx", 0.0), ("NH3", 0.0), ("SOx", 0.0), ("PM2_5", 0.0)];
        let query = AABB::from_corners(
            [cell.rect.min.x, cell.rect.min.y],
            [cell.rect.max.x, cell.rect.max.y],
        );
        let mut hits: Vec<usize> = self
            .tree
            .locate_in_envelope_intersecting(&query)
            .map(|e| e.index)
            .collect();
        // 求和顺序固定，结果与树结构无关
        hits.sort_unstable();
        for index in hits {
            let record = &self.records[index];
            if record.layer(grid.layers()) != cell.layer {
                continue;
            }
            let frac = record.fraction_in(grid, &cell.rect, cell.layer);
            if frac <= 0.0 {
                continue;
            }
            for (total, (_, rate)) in totals.iter_mut().zip(record.rates()) {
                total.1 += rate * frac;
            }
        }
        totals
    }

    /// 重新计算指定单元的排放通量
    pub fn apply(&self, grid: &mut Grid, mechanism: &dyn Mechanism, ids: &[CellId]) -> AgResult<()> {
        for &id in ids {
            let rates = self.cell_rates(grid, grid.try_cell(id)?);
            let cell = grid
                .cell_mut(id)
                .ok_or_else(|| AgError::invalid_index(format!("cell {id}")))?;
            cell.emis_flux.iter_mut().for_each(|e| *e = 0.0);
            for (name, rate) in rates {
                if rate != 0.0 {
                    mechanism.add_emis_flux(cell, name, rate)?;
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// 阶段
// ============================================================================

/// 为全部内部单元设置排放通量
#[derive(Debug)]
pub struct SetEmissionsFlux {
    source: Arc<EmissionsSource>,
}

impl SetEmissionsFlux {
    /// 创建
    pub fn new(source: Arc<EmissionsSource>) -> Self {
        Self { source }
    }
}

impl Stage for SetEmissionsFlux {
    fn name(&self) -> &str {
        "set_emissions_flux"
    }

    fn run(&mut self, domain: &mut Domain) -> AgResult<()> {
        let mechanism = domain.mechanism().clone();
        let grid = domain.grid_mut()?;
        let ids = grid.interior().to_vec();
        self.source.apply(grid, mechanism.as_ref(), &ids)?;
        log::info!("排放已分配: {} 条记录, {} 个单元", self.source.len(), ids.len());
        Ok(())
    }
}

/// 步间交接：`Cf += 排放·dt`，然后 `Ci = Cf`
///
/// 交接时检查浓度，出现非有限值即报错。
#[derive(Debug, Default)]
pub struct AddEmissionsFlux;

impl AddEmissionsFlux {
    /// 创建
    pub fn new() -> Self {
        Self
    }
}

impl Stage for AddEmissionsFlux {
    fn name(&self) -> &str {
        "add_emissions_flux"
    }

    fn run(&mut self, domain: &mut Domain) -> AgResult<()> {
        let dt = domain.dt;
        let grid = domain.grid_mut()?;
        for id in grid.interior().to_vec() {
            let cell = grid
                .cell_mut(id)
                .ok_or_else(|| AgError::invalid_index(format!("cell {id}")))?;
            let emis = std::mem::take(&mut cell.emis_flux);
            let state = cell.state_mut();
            for (k, (c, e)) in state.cf.iter_mut().zip(&emis).enumerate() {
                *c += e * dt;
                if !c.is_finite() {
                    return Err(AgError::non_finite(format!("单元 {id} 物种 {k} 浓度"), *c));
                }
            }
            let cf = state.cf.clone();
            cell.ci = cf;
            cell.emis_flux = emis;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::test_grid::{at, strip};
    use crate::mechanism::SimpleChem;
    use ag_grid::{CellCoefficients, LineString, Polygon};
    use glam::DVec2;

    fn grid() -> Grid {
        strip(CellCoefficients::default(), 9)
    }

    #[test]
    fn test_point_on_shared_edge_is_split() {
        let g = grid();
        let record = EmisRecord::new(Geometry::Point(DVec2::new(1000.0, 500.0)), 0.0).with_all(2.0);
        let source = EmissionsSource::new(vec![record]).unwrap();
        let west = g.cell(at(&g, 0, 0)).unwrap();
        let mid = g.cell(at(&g, 0, 1)).unwrap();
        let east = g.cell(at(&g, 0, 2)).unwrap();
        assert_eq!(source.cell_rates(&g, west)[0].1, 1.0);
        assert_eq!(source.cell_rates(&g, mid)[0].1, 1.0);
        assert_eq!(source.cell_rates(&g, east)[0].1, 0.0);
    }

    #[test]
    fn test_line_and_polygon_fractions_sum_to_one() {
        let g = grid();
        let line = EmisRecord::new(
            Geometry::Line(LineString::new(vec![DVec2::new(500.0, 500.0), DVec2::new(2500.0, 500.0)])),
            0.0,
        )
        .with_all(1.0);
        let poly = EmisRecord::new(
            Geometry::Polygon(Polygon::from_rect(&Rect::new(0.0, 0.0, 1500.0, 1000.0))),
            0.0,
        )
        .with_all(1.0);
        let source = EmissionsSource::new(vec![line, poly]).unwrap();
        let total: f64 = (0..3)
            .map(|i| source.cell_rates(&g, g.cell(at(&g, 0, i)).unwrap())[1].1)
            .sum();
        assert!((total - 2.0).abs() < 1e-12);
        let west = source.cell_rates(&g, g.cell(at(&g, 0, 0)).unwrap())[1].1;
        // 折线 1/4 + 多边形 2/3
        assert!((west - (0.25 + 2.0 / 3.0)).abs() < 1e-12);
    }

    #[test]
    fn test_elevated_source_goes_to_upper_layer() {
        let g = grid();
        let layers = g.layers();
        let record = EmisRecord::new(Geometry::Point(DVec2::new(500.0, 500.0)), 120.0).with_all(1.0);
        assert_eq!(record.layer(layers), 1);
        let tall = EmisRecord::new(Geometry::Point(DVec2::new(500.0, 500.0)), 1e5);
        assert_eq!(tall.layer(layers), 1);
        let ground = EmisRecord::new(Geometry::Point(DVec2::new(500.0, 500.0)), 0.0);
        assert_eq!(ground.layer(layers), 0);
    }

    #[test]
    fn test_apply_and_handoff() {
        let mech = SimpleChem::new();
        let record = EmisRecord {
            pm25: 1e6,
            ..EmisRecord::new(Geometry::Point(DVec2::new(500.0, 500.0)), 0.0)
        };
        let source = Arc::new(EmissionsSource::new(vec![record]).unwrap());
        let mut domain = Domain::new(Arc::new(mech));
        domain.set_grid(grid());
        SetEmissionsFlux::new(source).run(&mut domain).unwrap();
        domain.dt = 10.0;
        AddEmissionsFlux::new().run(&mut domain).unwrap();
        let grid = domain.grid().unwrap();
        let cell = grid.cell(at(grid, 0, 0)).unwrap();
        // 1e6 μg/s / (1000·1000·50 m³) · 10 s
        let expected = 1e6 / 5e7 * 10.0;
        assert!((cell.cf_at(2) - expected).abs() < 1e-12);
        assert_eq!(cell.ci[2], cell.cf_at(2));
    }

    #[test]
    fn test_overflowing_concentration_aborts() {
        let mut domain = Domain::new(Arc::new(SimpleChem::new()));
        let mut g = grid();
        let id = at(&g, 0, 2);
        let cell = g.cell_mut(id).unwrap();
        cell.state_mut().cf[4] = f64::MAX;
        cell.emis_flux[4] = f64::MAX;
        domain.set_grid(g);
        domain.dt = 10.0;
        let err = AddEmissionsFlux::new().run(&mut domain).unwrap_err();
        assert!(err.is_numerical());
        assert!(err.to_string().contains(&format!("单元 {id}")));
    }

    #[test]
    fn test_record_from_json() {
        let text = r#"{"geometry": {"Point": [500.0, 250.0]}, "height": 80.0, "NOx": 3.5, "PM2_5": 1.25}"#;
        let record: EmisRecord = serde_json::from_str(text).unwrap();
        assert_eq!(record.geometry, Geometry::Point(DVec2::new(500.0, 250.0)));
        assert_eq!(record.height, 80.0);
        assert_eq!((record.nox, record.pm25, record.voc), (3.5, 1.25, 0.0));
        let back: EmisRecord = serde_json::from_str(&serde_json::to_string(&record).unwrap()).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_invalid_records() {
        let empty = EmisRecord::new(Geometry::Line(LineString::new(Vec::new())), 0.0);
        assert!(EmissionsSource::new(vec![empty]).is_err());
        let nan = EmisRecord::new(Geometry::Point(DVec2::ZERO), 0.0).with_all(f64::NAN);
        assert!(EmissionsSource::new(vec![nan]).unwrap_err().is_numerical());
    }
}
