// crates/ag_grid/src/geometry.rs

//! 平面几何
//!
//! 网格单元都是轴对齐矩形，查询几何可以是点、折线或多边形。
//! 多边形与矩形求交使用 Sutherland–Hodgman 裁剪，折线使用 Liang–Barsky 裁剪。

use ag_foundation::tolerance::GEOMETRY_EPS;
use glam::DVec2;
use serde::{Deserialize, Serialize};

/// 一维区间重叠长度
#[inline]
pub fn interval_overlap(a0: f64, a1: f64, b0: f64, b1: f64) -> f64 {
    (a1.min(b1) - a0.max(b0)).max(0.0)
}

// ============================================================================
// 矩形
// ============================================================================

/// 轴对齐矩形
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    /// 西南角
    pub min: DVec2,
    /// 东北角
    pub max: DVec2,
}

impl Rect {
    /// 由两角坐标创建（自动排序）
    #[must_use]
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self {
            min: DVec2::new(x0.min(x1), y0.min(y1)),
            max: DVec2::new(x0.max(x1), y0.max(y1)),
        }
    }

    /// 由西南角与尺寸创建
    #[must_use]
    pub fn from_origin(x0: f64, y0: f64, dx: f64, dy: f64) -> Self {
        Self::new(x0, y0, x0 + dx, y0 + dy)
    }

    /// 宽度
    #[inline]
    pub fn width(&self) -> f64 {
        self.max.x - self.min.x
    }

    /// 高度
    #[inline]
    pub fn height(&self) -> f64 {
        self.max.y - self.min.y
    }

    /// 面积
    #[inline]
    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    /// 中心点
    #[inline]
    pub fn center(&self) -> DVec2 {
        (self.min + self.max) * 0.5
    }

    /// 点是否在矩形内（闭区间）
    #[inline]
    pub fn contains_point(&self, p: DVec2) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }

    /// 另一个矩形是否完全在内部（含容差）
    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.min.x >= self.min.x - GEOMETRY_EPS
            && other.min.y >= self.min.y - GEOMETRY_EPS
            && other.max.x <= self.max.x + GEOMETRY_EPS
            && other.max.y <= self.max.y + GEOMETRY_EPS
    }

    /// 交集矩形；不相交或仅边界接触时返回 `None`
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let min = self.min.max(other.min);
        let max = self.max.min(other.max);
        if max.x - min.x > GEOMETRY_EPS && max.y - min.y > GEOMETRY_EPS {
            Some(Rect { min, max })
        } else {
            None
        }
    }

    /// 重叠面积
    #[inline]
    pub fn overlap_area(&self, other: &Rect) -> f64 {
        interval_overlap(self.min.x, self.max.x, other.min.x, other.max.x)
            * interval_overlap(self.min.y, self.max.y, other.min.y, other.max.y)
    }

    /// 向外扩展
    #[must_use]
    pub fn expand(&self, amount: f64) -> Self {
        Self {
            min: self.min - DVec2::splat(amount),
            max: self.max + DVec2::splat(amount),
        }
    }

    /// 平移
    #[must_use]
    pub fn translate(&self, offset: DVec2) -> Self {
        Self {
            min: self.min + offset,
            max: self.max + offset,
        }
    }

    /// 按 `nx × ny` 等分，按行优先返回 `((i, j), 子矩形)`
    pub fn subdivide(&self, nx: usize, ny: usize) -> Vec<((usize, usize), Rect)> {
        let w = self.width() / nx as f64;
        let h = self.height() / ny as f64;
        let mut out = Vec::with_capacity(nx * ny);
        for j in 0..ny {
            for i in 0..nx {
                let x0 = self.min.x + i as f64 * w;
                let y0 = self.min.y + j as f64 * h;
                // 相邻子矩形共享同一坐标，最后一列/行贴合父边界
                let x1 = if i + 1 == nx { self.max.x } else { self.min.x + (i + 1) as f64 * w };
                let y1 = if j + 1 == ny { self.max.y } else { self.min.y + (j + 1) as f64 * h };
                out.push(((i, j), Rect::new(x0, y0, x1, y1)));
            }
        }
        out
    }

    /// 四角坐标（逆时针）
    pub fn corners(&self) -> [DVec2; 4] {
        [
            self.min,
            DVec2::new(self.max.x, self.min.y),
            self.max,
            DVec2::new(self.min.x, self.max.y),
        ]
    }
}

// ============================================================================
// 折线
// ============================================================================

/// 折线
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineString {
    /// 顶点
    pub points: Vec<DVec2>,
}

impl LineString {
    /// 创建折线
    pub fn new(points: Vec<DVec2>) -> Self {
        Self { points }
    }

    /// 总长度
    pub fn length(&self) -> f64 {
        self.points.windows(2).map(|w| w[0].distance(w[1])).sum()
    }

    /// 位于矩形内的长度
    pub fn length_within(&self, rect: &Rect) -> f64 {
        self.points
            .windows(2)
            .filter_map(|w| clip_segment(w[0], w[1], rect))
            .map(|(a, b)| a.distance(b))
            .sum()
    }

    /// 包围盒
    pub fn bounds(&self) -> Option<Rect> {
        bounds_of(&self.points)
    }
}

/// Liang–Barsky 线段裁剪
fn clip_segment(a: DVec2, b: DVec2, rect: &Rect) -> Option<(DVec2, DVec2)> {
    let d = b - a;
    let mut t0 = 0.0_f64;
    let mut t1 = 1.0_f64;
    let checks = [
        (-d.x, a.x - rect.min.x),
        (d.x, rect.max.x - a.x),
        (-d.y, a.y - rect.min.y),
        (d.y, rect.max.y - a.y),
    ];
    for (p, q) in checks {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
        } else {
            let r = q / p;
            if p < 0.0 {
                t0 = t0.max(r);
            } else {
                t1 = t1.min(r);
            }
        }
    }
    if t0 > t1 {
        return None;
    }
    Some((a + d * t0, a + d * t1))
}

// ============================================================================
// 多边形
// ============================================================================

/// 简单多边形（单外环，不含孔）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    /// 外环顶点（首尾不必重复）
    pub exterior: Vec<DVec2>,
}

impl Polygon {
    /// 创建多边形
    pub fn new(exterior: Vec<DVec2>) -> Self {
        Self { exterior }
    }

    /// 矩形转多边形
    pub fn from_rect(rect: &Rect) -> Self {
        Self::new(rect.corners().to_vec())
    }

    /// 面积（鞋带公式，取绝对值）
    pub fn area(&self) -> f64 {
        let n = self.exterior.len();
        if n < 3 {
            return 0.0;
        }
        let mut s = 0.0;
        for i in 0..n {
            let a = self.exterior[i];
            let b = self.exterior[(i + 1) % n];
            s += a.perp_dot(b);
        }
        0.5 * s.abs()
    }

    /// 包围盒
    pub fn bounds(&self) -> Option<Rect> {
        bounds_of(&self.exterior)
    }

    /// 裁剪到矩形内（Sutherland–Hodgman）
    pub fn clip_to_rect(&self, rect: &Rect) -> Polygon {
        let mut ring = self.exterior.clone();
        for side in [ClipSide::West, ClipSide::East, ClipSide::South, ClipSide::North] {
            if ring.is_empty() {
                break;
            }
            let input = std::mem::take(&mut ring);
            let n = input.len();
            for i in 0..n {
                let cur = input[i];
                let prev = input[(i + n - 1) % n];
                match (side.inside(cur, rect), side.inside(prev, rect)) {
                    (true, true) => ring.push(cur),
                    (true, false) => {
                        ring.push(side.cross(prev, cur, rect));
                        ring.push(cur);
                    }
                    (false, true) => ring.push(side.cross(prev, cur, rect)),
                    (false, false) => {}
                }
            }
        }
        Polygon::new(ring)
    }

    /// 与矩形的重叠面积
    pub fn overlap_area(&self, rect: &Rect) -> f64 {
        self.clip_to_rect(rect).area()
    }
}

/// 裁剪边
#[derive(Clone, Copy)]
enum ClipSide {
    West,
    East,
    South,
    North,
}

impl ClipSide {
    fn inside(self, p: DVec2, r: &Rect) -> bool {
        match self {
            ClipSide::West => p.x >= r.min.x,
            ClipSide::East => p.x <= r.max.x,
            ClipSide::South => p.y >= r.min.y,
            ClipSide::North => p.y <= r.max.y,
        }
    }

    fn cross(self, a: DVec2, b: DVec2, r: &Rect) -> DVec2 {
        match self {
            ClipSide::West => lerp_x(a, b, r.min.x),
            ClipSide::East => lerp_x(a, b, r.max.x),
            ClipSide::South => lerp_y(a, b, r.min.y),
            ClipSide::North => lerp_y(a, b, r.max.y),
        }
    }
}

fn lerp_x(a: DVec2, b: DVec2, x: f64) -> DVec2 {
    let t = (x - a.x) / (b.x - a.x);
    DVec2::new(x, a.y + t * (b.y - a.y))
}

fn lerp_y(a: DVec2, b: DVec2, y: f64) -> DVec2 {
    let t = (y - a.y) / (b.y - a.y);
    DVec2::new(a.x + t * (b.x - a.x), y)
}

fn bounds_of(points: &[DVec2]) -> Option<Rect> {
    let first = *points.first()?;
    let (min, max) = points
        .iter()
        .fold((first, first), |(lo, hi), p| (lo.min(*p), hi.max(*p)));
    Some(Rect { min, max })
}

// ============================================================================
// 查询几何
// ============================================================================

/// 空间查询几何
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Geometry {
    /// 点
    Point(DVec2),
    /// 折线，按长度分摊
    Line(LineString),
    /// 多边形，按面积分摊
    Polygon(Polygon),
}

impl Geometry {
    /// 包围盒
    pub fn bounds(&self) -> Option<Rect> {
        match self {
            Geometry::Point(p) => Some(Rect { min: *p, max: *p }),
            Geometry::Line(l) => l.bounds(),
            Geometry::Polygon(p) => p.bounds(),
        }
    }
}
