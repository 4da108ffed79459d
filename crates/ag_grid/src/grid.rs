// crates/ag_grid/src/grid.rs

//! 变分辨率单元图
//!
//! [`Grid`] 持有单元 Arena、按全序排列的内部单元列表、五个边界伪单元列表
//! （西、东、南、北、顶；底部由地面单元指向自身的下方边表示）以及内部
//! 单元的空间索引。
//!
//! # 拓扑维护
//!
//! 插入、删除、分裂与合并只改变几何，并把受影响区域内的单元标记为脏；
//! [`Grid::relink_dirty`] 从几何重新推导脏单元的全部邻居边。由于边属性
//! 只依赖两侧单元的几何与系数，且两侧都会被重推，反向边自动一致。
//!
//! # 边界质量账本
//!
//! 流入边界伪单元的质量在物理步内记入源单元的账本，步后由
//! [`Grid::settle_boundary_ledgers`] 顺序结转到边界单元的 `Cf`。
//! 被拆除的边界单元的质量累加到 `retired_boundary_mass`，全域质量守恒
//! 检查因此不受网格变异影响。

use crate::cell::{BoundaryOwner, Cell, CellId, CellTag, Direction, Edge, NeighborInfo, Neighbors};
use crate::cell_list::{CellList, SortKey};
use crate::geometry::{interval_overlap, Rect};
use crate::spatial_index::GridSpatialIndex;
use ag_foundation::arena::Arena;
use ag_foundation::error::{AgError, AgResult};
use ag_foundation::tolerance::{harmonic_mean, GEOMETRY_EPS};
use glam::DVec2;
use rayon::prelude::*;
use smallvec::SmallVec;
use std::collections::BTreeSet;

// ============================================================================
// 垂直分层
// ============================================================================

/// 垂直分层描述
#[derive(Debug, Clone, PartialEq)]
pub struct LayerStack {
    bottoms: Vec<f64>,
    thickness: Vec<f64>,
}

impl LayerStack {
    /// 从层厚度创建，地面为 0 m
    pub fn from_thickness(thickness: &[f64]) -> AgResult<Self> {
        if thickness.is_empty() {
            return Err(AgError::config("至少需要一层"));
        }
        let mut bottoms = Vec::with_capacity(thickness.len());
        let mut z = 0.0;
        for (k, &dz) in thickness.iter().enumerate() {
            if !(dz.is_finite() && dz > 0.0) {
                return Err(AgError::config(format!("第 {k} 层厚度无效: {dz}")));
            }
            bottoms.push(z);
            z += dz;
        }
        Ok(Self {
            bottoms,
            thickness: thickness.to_vec(),
        })
    }

    /// 层数
    #[inline]
    pub fn len(&self) -> usize {
        self.thickness.len()
    }

    /// 是否为空
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.thickness.is_empty()
    }

    /// 第 k 层底面高度
    #[inline]
    pub fn bottom(&self, k: usize) -> f64 {
        self.bottoms[k]
    }

    /// 第 k 层厚度
    #[inline]
    pub fn thickness(&self, k: usize) -> f64 {
        self.thickness[k]
    }

    /// 全部层厚度
    pub fn thicknesses(&self) -> &[f64] {
        &self.thickness
    }
}

// ============================================================================
// 单元图
// ============================================================================

const BOUNDARY_SIDES: [Direction; 5] = [
    Direction::West,
    Direction::East,
    Direction::South,
    Direction::North,
    Direction::Above,
];

fn boundary_slot(side: Direction) -> Option<usize> {
    BOUNDARY_SIDES.iter().position(|d| *d == side)
}

/// 变分辨率单元图
#[derive(Debug)]
pub struct Grid {
    cells: Arena<Cell, CellTag>,
    interior: CellList,
    boundaries: [CellList; 5],
    index: GridSpatialIndex,
    domain: Rect,
    layers: LayerStack,
    n_species: usize,
    pop_columns: Vec<String>,
    dirty: BTreeSet<CellId>,
    retired_boundary_mass: Vec<f64>,
}

/// 一个单元的邻居推导结果，尚未创建边界伪单元
struct PendingLink {
    id: CellId,
    neighbors: Neighbors,
    boundary_sides: SmallVec<[Direction; 3]>,
}

impl Grid {
    /// 创建空网格
    pub fn new(domain: Rect, layers: LayerStack, n_species: usize, pop_columns: Vec<String>) -> Self {
        Self {
            cells: Arena::new(),
            interior: CellList::new(),
            boundaries: Default::default(),
            index: GridSpatialIndex::new(),
            domain,
            layers,
            n_species,
            pop_columns,
            dirty: BTreeSet::new(),
            retired_boundary_mass: vec![0.0; n_species],
        }
    }

    // ------------------------------------------------------------------------
    // 只读访问
    // ------------------------------------------------------------------------

    /// 计算域
    #[inline]
    pub fn domain(&self) -> &Rect {
        &self.domain
    }

    /// 垂直分层
    #[inline]
    pub fn layers(&self) -> &LayerStack {
        &self.layers
    }

    /// 层数
    #[inline]
    pub fn n_layers(&self) -> usize {
        self.layers.len()
    }

    /// 物种数
    #[inline]
    pub fn n_species(&self) -> usize {
        self.n_species
    }

    /// 人口列名
    pub fn pop_columns(&self) -> &[String] {
        &self.pop_columns
    }

    /// 人口列索引
    pub fn pop_column_index(&self, name: &str) -> AgResult<usize> {
        self.pop_columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| AgError::missing_population_column(name))
    }

    /// 取单元
    #[inline]
    pub fn cell(&self, id: CellId) -> Option<&Cell> {
        self.cells.get(id)
    }

    /// 可变取单元（仅允许修改非拓扑字段）
    #[inline]
    pub fn cell_mut(&mut self, id: CellId) -> Option<&mut Cell> {
        self.cells.get_mut(id)
    }

    /// 取单元，过期索引返回错误
    pub fn try_cell(&self, id: CellId) -> AgResult<&Cell> {
        self.cells
            .get(id)
            .ok_or_else(|| AgError::invalid_index(format!("cell {id}")))
    }

    /// 内部单元列表
    #[inline]
    pub fn interior(&self) -> &CellList {
        &self.interior
    }

    /// 内部单元数
    #[inline]
    pub fn n_interior(&self) -> usize {
        self.interior.len()
    }

    /// 某一侧的边界伪单元列表；`Below` 没有独立列表
    pub fn boundary(&self, side: Direction) -> Option<&CellList> {
        boundary_slot(side).map(|s| &self.boundaries[s])
    }

    /// 全部边界伪单元
    pub fn boundary_ids(&self) -> impl Iterator<Item = CellId> + '_ {
        self.boundaries.iter().flat_map(|l| l.iter())
    }

    /// 空间索引（仅内部单元）
    #[inline]
    pub fn index(&self) -> &GridSpatialIndex {
        &self.index
    }

    /// 全部单元（含边界）
    pub fn iter(&self) -> impl Iterator<Item = (CellId, &Cell)> + '_ {
        self.cells.iter()
    }

    /// 全部单元可变迭代（含边界），供步间顺序交接使用
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (CellId, &mut Cell)> + '_ {
        self.cells.iter_mut()
    }

    /// 内部单元，按全序
    pub fn interior_cells(&self) -> impl Iterator<Item = (CellId, &Cell)> + '_ {
        self.interior
            .iter()
            .filter_map(move |id| self.cells.get(id).map(|c| (id, c)))
    }

    /// 某层内部单元，按全序
    pub fn layer_cells(&self, layer: usize) -> impl Iterator<Item = (CellId, &Cell)> + '_ {
        let range = self.interior.layer_range(layer);
        range.filter_map(move |pos| {
            let id = self.interior.get(pos)?;
            self.cells.get(id).map(|c| (id, c))
        })
    }

    /// 被拆除的边界单元累计带走的质量 [μg]
    pub fn retired_boundary_mass(&self) -> &[f64] {
        &self.retired_boundary_mass
    }

    /// 内部单元总质量 Σ(Cf·V) [μg]
    pub fn interior_mass(&self) -> Vec<f64> {
        let mut mass = vec![0.0; self.n_species];
        for (_, cell) in self.interior_cells() {
            let v = cell.volume();
            let state = cell.lock();
            for (m, c) in mass.iter_mut().zip(&state.cf) {
                *m += c * v;
            }
        }
        mass
    }

    /// 边界伪单元总质量（含已拆除部分）[μg]
    pub fn boundary_mass(&self) -> Vec<f64> {
        let mut mass = self.retired_boundary_mass.clone();
        for id in self.boundary_ids() {
            if let Some(cell) = self.cells.get(id) {
                let v = cell.volume();
                let state = cell.lock();
                for (m, c) in mass.iter_mut().zip(&state.cf) {
                    *m += c * v;
                }
            }
        }
        mass
    }

    /// 全域质量：内部 + 边界 [μg]
    pub fn total_mass(&self) -> Vec<f64> {
        self.interior_mass()
            .into_iter()
            .zip(self.boundary_mass())
            .map(|(a, b)| a + b)
            .collect()
    }

    // ------------------------------------------------------------------------
    // 插入与删除
    // ------------------------------------------------------------------------

    /// 插入内部单元，邻居待 [`Grid::relink_dirty`] 推导
    pub fn insert_cell(&mut self, mut cell: Cell) -> AgResult<CellId> {
        if cell.layer >= self.n_layers() {
            return Err(AgError::invalid_input(format!(
                "层号 {} 超出层数 {}",
                cell.layer,
                self.n_layers()
            )));
        }
        if !self.domain.expand(GEOMETRY_EPS).contains_rect(&cell.rect) {
            return Err(AgError::topology(format!("单元 {:?} 超出计算域", cell.rect)));
        }
        if cell.n_species() != self.n_species {
            return Err(AgError::invalid_input(format!(
                "单元物种数 {} 与网格 {} 不符",
                cell.n_species(),
                self.n_species
            )));
        }
        cell.boundary = None;
        cell.neighbors = Neighbors::default();
        let rect = cell.rect;
        let layer = cell.layer;
        let key = SortKey::of(&cell);
        let id = self.cells.insert(cell);
        self.interior.insert(key, id);
        self.index.insert(id, layer, rect);
        self.dirty.insert(id);
        self.mark_region_dirty(&rect);
        Ok(id)
    }

    /// 删除内部单元，同时拆除它拥有的边界伪单元
    pub fn remove_cell(&mut self, id: CellId) -> AgResult<Cell> {
        let cell = self
            .cells
            .get(id)
            .ok_or_else(|| AgError::invalid_index(format!("cell {id}")))?;
        if cell.is_boundary() {
            return Err(AgError::invalid_input(format!("{id} 是边界伪单元，不能直接删除")));
        }
        let owned: Vec<CellId> = self.owned_boundaries(id).into_iter().map(|(_, b)| b).collect();
        for b in owned {
            self.retire_boundary(b);
        }
        let mut cell = self
            .cells
            .remove(id)
            .ok_or_else(|| AgError::invalid_index(format!("cell {id}")))?;
        self.interior.remove(SortKey::of(&cell), id);
        self.index.remove(id, cell.layer, cell.rect);
        self.dirty.remove(&id);
        self.mark_region_dirty(&cell.rect);
        cell.neighbors = Neighbors::default();
        Ok(cell)
    }

    /// 将与矩形接触的各层内部单元标记为脏
    fn mark_region_dirty(&mut self, rect: &Rect) {
        let probe = rect.expand(GEOMETRY_EPS);
        for layer in 0..self.n_layers() {
            for e in self.index.query_rect(&probe, layer) {
                self.dirty.insert(e.id);
            }
        }
    }

    /// 将全部内部单元标记为脏
    pub fn mark_all_dirty(&mut self) {
        self.dirty.extend(self.interior.iter());
    }

    /// 待重推的单元数
    pub fn dirty_count(&self) -> usize {
        self.dirty.len()
    }

    // ------------------------------------------------------------------------
    // 边界伪单元
    // ------------------------------------------------------------------------

    fn owned_boundaries(&self, id: CellId) -> SmallVec<[(Direction, CellId); 3]> {
        let mut out = SmallVec::new();
        let Some(cell) = self.cells.get(id) else {
            return out;
        };
        for side in BOUNDARY_SIDES {
            for e in cell.neighbors.get(side) {
                if let Some(b) = self.cells.get(e.target) {
                    if matches!(b.boundary, Some(o) if o.owner == id) {
                        out.push((side, e.target));
                    }
                }
            }
        }
        out
    }

    fn retire_boundary(&mut self, id: CellId) {
        let Some(cell) = self.cells.remove(id) else {
            return;
        };
        let v = cell.volume();
        let cf = cell.cf();
        for (m, c) in self.retired_boundary_mass.iter_mut().zip(&cf) {
            *m += c * v;
        }
        if let Some(owner) = cell.boundary {
            if let Some(slot) = boundary_slot(owner.side) {
                self.boundaries[slot].remove(SortKey::of(&cell), id);
            }
        }
    }

    fn boundary_geometry(&self, owner: &Cell, side: Direction) -> (Rect, usize, f64, f64) {
        match side {
            Direction::Above => (
                owner.rect,
                owner.layer + 1,
                owner.z_bottom + owner.dz,
                owner.dz,
            ),
            _ => {
                let off = side.outward() * DVec2::new(owner.dx(), owner.dy());
                (owner.rect.translate(off), owner.layer, owner.z_bottom, owner.dz)
            }
        }
    }

    fn make_boundary(&mut self, owner_id: CellId, side: Direction) -> AgResult<CellId> {
        let owner = self.try_cell(owner_id)?;
        let (rect, layer, z_bottom, dz) = self.boundary_geometry(owner, side);
        let mut cell = Cell::new(rect, layer, z_bottom, dz, self.n_species)
            .with_coefficients(owner.coeffs);
        cell.boundary = Some(BoundaryOwner {
            owner: owner_id,
            side,
        });
        let key = SortKey::of(&cell);
        let id = self.cells.insert(cell);
        if let Some(slot) = boundary_slot(side) {
            self.boundaries[slot].insert(key, id);
        }
        Ok(id)
    }

    // ------------------------------------------------------------------------
    // 邻居推导
    // ------------------------------------------------------------------------

    fn on_domain_edge(&self, rect: &Rect, side: Direction) -> bool {
        let d = &self.domain;
        match side {
            Direction::West => (rect.min.x - d.min.x).abs() < GEOMETRY_EPS,
            Direction::East => (rect.max.x - d.max.x).abs() < GEOMETRY_EPS,
            Direction::South => (rect.min.y - d.min.y).abs() < GEOMETRY_EPS,
            Direction::North => (rect.max.y - d.max.y).abs() < GEOMETRY_EPS,
            Direction::Below | Direction::Above => false,
        }
    }

    fn lateral_edges(&self, id: CellId, cell: &Cell, side: Direction) -> SmallVec<[Edge; 4]> {
        let r = &cell.rect;
        let eps = GEOMETRY_EPS;
        let (probe, own_len) = match side {
            Direction::West => (Rect::new(r.min.x - eps, r.min.y, r.min.x + eps, r.max.y), r.height()),
            Direction::East => (Rect::new(r.max.x - eps, r.min.y, r.max.x + eps, r.max.y), r.height()),
            Direction::South => (Rect::new(r.min.x, r.min.y - eps, r.max.x, r.min.y + eps), r.width()),
            Direction::North => (Rect::new(r.min.x, r.max.y - eps, r.max.x, r.max.y + eps), r.width()),
            Direction::Below | Direction::Above => return SmallVec::new(),
        };
        let mut edges = SmallVec::new();
        for e in self.index.query_rect(&probe, cell.layer) {
            if e.id == id {
                continue;
            }
            let n = &e.rect;
            let (touching, overlap) = match side {
                Direction::West => ((n.max.x - r.min.x).abs() < eps, interval_overlap(r.min.y, r.max.y, n.min.y, n.max.y)),
                Direction::East => ((n.min.x - r.max.x).abs() < eps, interval_overlap(r.min.y, r.max.y, n.min.y, n.max.y)),
                Direction::South => ((n.max.y - r.min.y).abs() < eps, interval_overlap(r.min.x, r.max.x, n.min.x, n.max.x)),
                Direction::North => ((n.min.y - r.max.y).abs() < eps, interval_overlap(r.min.x, r.max.x, n.min.x, n.max.x)),
                Direction::Below | Direction::Above => (false, 0.0),
            };
            if !touching || overlap <= eps {
                continue;
            }
            let Some(other) = self.cells.get(e.id) else {
                continue;
            };
            let center_distance = match side {
                Direction::West | Direction::East => 0.5 * (cell.dx() + other.dx()),
                _ => 0.5 * (cell.dy() + other.dy()),
            };
            edges.push(Edge {
                target: e.id,
                info: NeighborInfo {
                    cover_frac: overlap / own_len,
                    diff: harmonic_mean(cell.coeffs.kxxyy, other.coeffs.kxxyy),
                    center_distance,
                },
            });
        }
        edges
    }

    fn vertical_edges(&self, cell: &Cell, layer: usize) -> SmallVec<[Edge; 4]> {
        let mut edges = SmallVec::new();
        let own_area = cell.area();
        for e in self.index.query_rect(&cell.rect, layer) {
            let Some(overlap) = cell.rect.intersection(&e.rect) else {
                continue;
            };
            let Some(other) = self.cells.get(e.id) else {
                continue;
            };
            edges.push(Edge {
                target: e.id,
                info: NeighborInfo {
                    cover_frac: overlap.area() / own_area,
                    diff: harmonic_mean(cell.coeffs.kzz, other.coeffs.kzz),
                    center_distance: 0.5 * (cell.dz + other.dz),
                },
            });
        }
        edges
    }

    fn ground_edges(&self, cell: &Cell) -> SmallVec<[Edge; 4]> {
        let mut edges = SmallVec::new();
        let own_area = cell.area();
        let own_mid = cell.z_bottom + 0.5 * cell.dz;
        for e in self.index.query_rect(&cell.rect, 0) {
            let Some(overlap) = cell.rect.intersection(&e.rect) else {
                continue;
            };
            let Some(ground) = self.cells.get(e.id) else {
                continue;
            };
            edges.push(Edge {
                target: e.id,
                info: NeighborInfo {
                    cover_frac: overlap.area() / own_area,
                    diff: 0.0,
                    center_distance: own_mid - 0.5 * ground.dz,
                },
            });
        }
        edges
    }

    fn derive_links(&self, id: CellId) -> Option<PendingLink> {
        let cell = self.cells.get(id)?;
        let mut neighbors = Neighbors::default();
        let mut boundary_sides = SmallVec::new();

        for side in Direction::LATERAL {
            if self.on_domain_edge(&cell.rect, side) {
                boundary_sides.push(side);
            } else {
                *neighbors.get_mut(side) = self.lateral_edges(id, cell, side);
            }
        }

        if cell.layer + 1 >= self.n_layers() {
            boundary_sides.push(Direction::Above);
        } else {
            neighbors.above = self.vertical_edges(cell, cell.layer + 1);
        }

        if cell.layer == 0 {
            let self_loop = Edge {
                target: id,
                info: NeighborInfo {
                    cover_frac: 1.0,
                    diff: cell.coeffs.kzz,
                    center_distance: cell.dz,
                },
            };
            neighbors.below.push(self_loop);
            neighbors.ground_level.push(Edge {
                target: id,
                info: NeighborInfo {
                    cover_frac: 1.0,
                    diff: 0.0,
                    center_distance: 0.0,
                },
            });
        } else {
            neighbors.below = self.vertical_edges(cell, cell.layer - 1);
            neighbors.ground_level = self.ground_edges(cell);
        }

        Some(PendingLink {
            id,
            neighbors,
            boundary_sides,
        })
    }

    fn apply_link(&mut self, pending: PendingLink) -> AgResult<()> {
        let PendingLink {
            id,
            mut neighbors,
            boundary_sides,
        } = pending;

        let mut old = self.owned_boundaries(id);
        for side in boundary_sides {
            let owner = self.try_cell(id)?;
            let (rect, layer, _, _) = self.boundary_geometry(owner, side);
            let coeffs = owner.coeffs;
            let reuse = old.iter().position(|(s, b)| {
                *s == side
                    && self
                        .cells
                        .get(*b)
                        .is_some_and(|c| c.layer == layer && c.rect == rect)
            });
            let b = match reuse {
                Some(pos) => {
                    let (_, b) = old.remove(pos);
                    if let Some(c) = self.cells.get_mut(b) {
                        c.coeffs = coeffs;
                    }
                    b
                }
                None => self.make_boundary(id, side)?,
            };
            let owner = self.try_cell(id)?;
            let info = match side {
                Direction::Above => NeighborInfo {
                    cover_frac: 1.0,
                    diff: owner.coeffs.kzz,
                    center_distance: owner.dz,
                },
                Direction::West | Direction::East => NeighborInfo {
                    cover_frac: 1.0,
                    diff: owner.coeffs.kxxyy,
                    center_distance: owner.dx(),
                },
                _ => NeighborInfo {
                    cover_frac: 1.0,
                    diff: owner.coeffs.kxxyy,
                    center_distance: owner.dy(),
                },
            };
            neighbors.get_mut(side).push(Edge { target: b, info });
        }
        for (_, stale) in old {
            self.retire_boundary(stale);
        }

        let cell = self
            .cells
            .get_mut(id)
            .ok_or_else(|| AgError::invalid_index(format!("cell {id}")))?;
        cell.neighbors = neighbors;
        Ok(())
    }

    /// 重新推导所有脏单元的邻居边
    ///
    /// 推导阶段只读并行，创建边界伪单元与写回阶段顺序执行。
    /// 返回重推的单元数。
    pub fn relink_dirty(&mut self) -> AgResult<usize> {
        let dirty: Vec<CellId> = std::mem::take(&mut self.dirty)
            .into_iter()
            .filter(|id| self.cells.get(*id).is_some_and(|c| !c.is_boundary()))
            .collect();
        let pending: Vec<PendingLink> = dirty
            .par_iter()
            .filter_map(|id| self.derive_links(*id))
            .collect();
        let n = pending.len();
        for p in pending {
            self.apply_link(p)?;
        }
        log::trace!("重推邻居 {n} 个单元");
        Ok(n)
    }

    /// 重新推导全部内部单元的邻居边
    pub fn link_all(&mut self) -> AgResult<usize> {
        self.mark_all_dirty();
        self.relink_dirty()
    }

    // ------------------------------------------------------------------------
    // 分裂与合并
    // ------------------------------------------------------------------------

    /// 将单元分裂为 `nx × ny` 个子单元并重建受影响的邻居
    ///
    /// 子单元继承父单元的浓度、单位体积排放、系数与死亡率，人口按面积分配。
    /// `init` 在子单元插入前调用，可用于按位置重新填充系数。
    pub fn split_cell<F>(&mut self, id: CellId, nx: usize, ny: usize, init: F) -> AgResult<Vec<CellId>>
    where
        F: Fn(&mut Cell),
    {
        let children = self.split_without_relink(id, nx, ny, &init)?;
        self.relink_dirty()?;
        Ok(children)
    }

    /// 批量分裂，最后统一重建邻居
    pub fn split_cells<F>(&mut self, ids: &[CellId], nx: usize, ny: usize, init: F) -> AgResult<Vec<CellId>>
    where
        F: Fn(&mut Cell),
    {
        let mut all = Vec::new();
        for id in ids {
            all.extend(self.split_without_relink(*id, nx, ny, &init)?);
        }
        self.relink_dirty()?;
        Ok(all)
    }

    fn split_without_relink<F>(&mut self, id: CellId, nx: usize, ny: usize, init: &F) -> AgResult<Vec<CellId>>
    where
        F: Fn(&mut Cell),
    {
        if nx == 0 || ny == 0 {
            return Err(AgError::invalid_input(format!("分裂因子必须为正: {nx}×{ny}")));
        }
        let parent = self.remove_cell(id)?;
        let parent_cf = parent.cf();
        let parent_area = parent.area();
        let mut children = Vec::with_capacity(nx * ny);
        for ((i, j), rect) in parent.rect.subdivide(nx, ny) {
            let share = rect.area() / parent_area;
            let mut nest = parent.nest.clone();
            nest.push((i as u16, j as u16));
            let mut child = Cell::new(rect, parent.layer, parent.z_bottom, parent.dz, self.n_species)
                .with_coefficients(parent.coeffs)
                .with_nest(nest);
            child.set_concentration(&parent_cf);
            child.emis_flux = parent.emis_flux.clone();
            child.population = parent.population.iter().map(|p| p * share).collect();
            child.mortality_rate = parent.mortality_rate;
            child.above_density_threshold = parent.above_density_threshold;
            init(&mut child);
            children.push(self.insert_cell(child)?);
        }
        Ok(children)
    }

    /// 将同一父单元的兄弟单元合并，浓度取体积加权平均
    ///
    /// 兄弟单元必须同层、嵌套路径前缀相同，并恰好铺满它们的外包矩形。
    pub fn merge_cells<F>(&mut self, siblings: &[CellId], init: F) -> AgResult<CellId>
    where
        F: Fn(&mut Cell),
    {
        let first = siblings
            .first()
            .ok_or_else(|| AgError::invalid_input("合并需要至少一个单元"))?;
        let head = self.try_cell(*first)?;
        let layer = head.layer;
        let (z_bottom, dz) = (head.z_bottom, head.dz);
        let coeffs = head.coeffs;
        let parent_nest: Vec<(u16, u16)> = match head.nest.split_last() {
            Some((_, prefix)) => prefix.to_vec(),
            None => return Err(AgError::topology(format!("{first} 没有嵌套父单元"))),
        };

        let mut bounds = head.rect;
        let mut area_sum = 0.0;
        for id in siblings {
            let c = self.try_cell(*id)?;
            if c.is_boundary() || c.layer != layer || c.nest.len() != parent_nest.len() + 1 || c.nest[..parent_nest.len()] != parent_nest[..] {
                return Err(AgError::topology(format!("{id} 不是 {first} 的兄弟单元")));
            }
            bounds = Rect {
                min: bounds.min.min(c.rect.min),
                max: bounds.max.max(c.rect.max),
            };
            area_sum += c.area();
        }
        if (area_sum - bounds.area()).abs() > GEOMETRY_EPS * bounds.area().max(1.0) {
            return Err(AgError::topology("兄弟单元没有铺满外包矩形"));
        }

        let mut parent = Cell::new(bounds, layer, z_bottom, dz, self.n_species)
            .with_coefficients(coeffs)
            .with_nest(parent_nest);
        let mut mass = vec![0.0; self.n_species];
        let mut emis = vec![0.0; self.n_species];
        let mut population = vec![0.0; self.pop_columns.len()];
        let mut mort_weight = 0.0;
        let mut mort_sum = 0.0;
        let mut above = false;
        for id in siblings {
            let c = self.remove_cell(*id)?;
            let v = c.volume();
            for (m, x) in mass.iter_mut().zip(c.cf()) {
                *m += x * v;
            }
            for (m, x) in emis.iter_mut().zip(&c.emis_flux) {
                *m += x * v;
            }
            for (p, x) in population.iter_mut().zip(&c.population) {
                *p += x;
            }
            mort_sum += c.mortality_rate * c.area();
            mort_weight += c.area();
            above |= c.above_density_threshold;
        }
        let v = parent.volume();
        let conc: Vec<f64> = mass.iter().map(|m| m / v).collect();
        parent.set_concentration(&conc);
        parent.emis_flux = emis.iter().map(|m| m / v).collect();
        parent.population = population;
        parent.mortality_rate = if mort_weight > 0.0 { mort_sum / mort_weight } else { 0.0 };
        parent.above_density_threshold = above;
        init(&mut parent);
        let id = self.insert_cell(parent)?;
        self.relink_dirty()?;
        Ok(id)
    }

    // ------------------------------------------------------------------------
    // 边界账本
    // ------------------------------------------------------------------------

    /// 将本步各内部单元账本中的边界流出质量结转到边界伪单元的 `Cf`
    ///
    /// 必须在所有核函数执行完毕后顺序调用。
    pub fn settle_boundary_ledgers(&mut self) -> AgResult<()> {
        let mut transfers: Vec<(CellId, Vec<f64>)> = Vec::new();
        for id in self.interior.iter() {
            if let Some(cell) = self.cells.get_mut(id) {
                let state = cell.state_mut();
                transfers.extend(state.ledger.drain(..).map(|e| (e.target, e.mass)));
            }
        }
        for (target, mass) in transfers {
            let cell = self
                .cells
                .get_mut(target)
                .ok_or_else(|| AgError::invalid_index(format!("boundary {target}")))?;
            let v = cell.volume();
            let state = cell.state_mut();
            for (c, m) in state.cf.iter_mut().zip(&mass) {
                *c += m / v;
            }
        }
        Ok(())
    }

    /// 清零全部单元（含边界）的 `Ci`、`Cf`、排放与账本，以及已拆除边界的累计质量
    pub fn reset_concentrations(&mut self) {
        let n = self.n_species;
        for (_, cell) in self.cells.iter_mut() {
            cell.ci = vec![0.0; n];
            cell.emis_flux = vec![0.0; n];
            let state = cell.state_mut();
            state.cf = vec![0.0; n];
            state.ledger.clear();
        }
        self.retired_boundary_mass = vec![0.0; n];
    }
}
