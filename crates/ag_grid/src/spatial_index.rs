// crates/ag_grid/src/spatial_index.rs

//! 网格空间索引
//!
//! 基于 R-Tree 的单元索引，用于点定位、矩形查询和几何相交比例计算。
//! 包围盒的第三维是层号，因此同一棵树可以按层查询。
//!
//! # 示例
//!
//! ```ignore
//! use ag_grid::geometry::Geometry;
//!
//! let hits = grid.index().intersect(&Geometry::Point(p), 0);
//! for (id, frac) in hits {
//!     println!("{id}: {frac}");
//! }
//! ```

use crate::cell::CellId;
use crate::geometry::{Geometry, Rect};
use glam::DVec2;
use rstar::{RTree, RTreeObject, AABB};

/// 单元包围盒
#[derive(Debug, Clone, Copy)]
pub struct CellEnvelope {
    /// 单元索引
    pub id: CellId,
    /// 层号
    pub layer: usize,
    /// 水平范围
    pub rect: Rect,
}

impl PartialEq for CellEnvelope {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl RTreeObject for CellEnvelope {
    type Envelope = AABB<[f64; 3]>;

    fn envelope(&self) -> Self::Envelope {
        let z = self.layer as f64;
        AABB::from_corners(
            [self.rect.min.x, self.rect.min.y, z],
            [self.rect.max.x, self.rect.max.y, z],
        )
    }
}

fn layer_box(rect: &Rect, layer: usize) -> AABB<[f64; 3]> {
    let z = layer as f64;
    AABB::from_corners([rect.min.x, rect.min.y, z], [rect.max.x, rect.max.y, z])
}

/// 网格空间索引
#[derive(Debug, Default)]
pub struct GridSpatialIndex {
    tree: RTree<CellEnvelope>,
}

impl GridSpatialIndex {
    /// 空索引
    pub fn new() -> Self {
        Self::default()
    }

    /// 批量构建
    pub fn bulk_load(envelopes: Vec<CellEnvelope>) -> Self {
        Self {
            tree: RTree::bulk_load(envelopes),
        }
    }

    /// 条目数
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// 插入
    pub fn insert(&mut self, id: CellId, layer: usize, rect: Rect) {
        self.tree.insert(CellEnvelope { id, layer, rect });
    }

    /// 删除；条目不存在时返回 `false`
    pub fn remove(&mut self, id: CellId, layer: usize, rect: Rect) -> bool {
        self.tree.remove(&CellEnvelope { id, layer, rect }).is_some()
    }

    /// 与矩形相交（面积或边长大于零，或包含退化点）的单元
    pub fn query_rect(&self, rect: &Rect, layer: usize) -> Vec<CellEnvelope> {
        let mut hits: Vec<CellEnvelope> = self
            .tree
            .locate_in_envelope_intersecting(&layer_box(rect, layer))
            .copied()
            .collect();
        hits.sort_by(|a, b| a.id.cmp(&b.id));
        hits
    }

    /// 包含点的单元（点恰在公共边上时可能返回多个）
    pub fn locate_point(&self, p: DVec2, layer: usize) -> Vec<CellId> {
        let probe = Rect { min: p, max: p };
        self.query_rect(&probe, layer)
            .into_iter()
            .filter(|e| e.rect.contains_point(p))
            .map(|e| e.id)
            .collect()
    }

    /// 几何体与某层单元相交，返回每个单元分摊的比例
    ///
    /// - 点：落在多个单元公共边上时平均分摊
    /// - 折线：单元内长度 / 总长度
    /// - 多边形：重叠面积 / 多边形面积
    ///
    /// 比例为零的单元不返回。
    pub fn intersect(&self, geom: &Geometry, layer: usize) -> Vec<(CellId, f64)> {
        let Some(bounds) = geom.bounds() else {
            return Vec::new();
        };
        match geom {
            Geometry::Point(p) => {
                let ids = self.locate_point(*p, layer);
                let share = 1.0 / ids.len().max(1) as f64;
                ids.into_iter().map(|id| (id, share)).collect()
            }
            Geometry::Line(line) => {
                let total = line.length();
                if total <= 0.0 {
                    return Vec::new();
                }
                self.query_rect(&bounds, layer)
                    .into_iter()
                    .map(|e| (e.id, line.length_within(&e.rect) / total))
                    .filter(|(_, f)| *f > 0.0)
                    .collect()
            }
            Geometry::Polygon(poly) => {
                let total = poly.area();
                if total <= 0.0 {
                    return Vec::new();
                }
                self.query_rect(&bounds, layer)
                    .into_iter()
                    .map(|e| (e.id, poly.overlap_area(&e.rect) / total))
                    .filter(|(_, f)| *f > 0.0)
                    .collect()
            }
        }
    }
}
