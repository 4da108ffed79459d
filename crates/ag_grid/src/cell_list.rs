// crates/ag_grid/src/cell_list.rs

//! 有序单元集合
//!
//! 按 (层号, 形心 y, 形心 x) 的全序排序，迭代顺序与调度无关，
//! 从而保证并行执行与收敛判断的确定性。

use crate::cell::{Cell, CellId};
use std::cmp::Ordering;

/// 单元排序键
#[derive(Debug, Clone, Copy)]
pub struct SortKey {
    /// 层号
    pub layer: usize,
    /// 形心 y
    pub y: f64,
    /// 形心 x
    pub x: f64,
}

impl SortKey {
    /// 从单元计算排序键
    pub fn of(cell: &Cell) -> Self {
        let c = cell.centroid();
        Self {
            layer: cell.layer,
            y: c.y,
            x: c.x,
        }
    }
}

impl PartialEq for SortKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SortKey {}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.layer
            .cmp(&other.layer)
            .then_with(|| self.y.total_cmp(&other.y))
            .then_with(|| self.x.total_cmp(&other.x))
    }
}

/// 有序单元列表
///
/// 同一键下可能有多个单元（例如同一内部单元两侧的顶面伪单元不会同键，
/// 但不同侧的伪单元可能共享形心），因此以 `(键, 索引)` 作为全序。
#[derive(Debug, Clone, Default)]
pub struct CellList {
    entries: Vec<(SortKey, CellId)>,
}

impl CellList {
    /// 空列表
    pub fn new() -> Self {
        Self::default()
    }

    /// 元素数
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 是否为空
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn search(&self, key: SortKey, id: CellId) -> Result<usize, usize> {
        self.entries
            .binary_search_by(|(k, i)| k.cmp(&key).then_with(|| i.cmp(&id)))
    }

    /// 插入；已存在时返回 `false`
    pub fn insert(&mut self, key: SortKey, id: CellId) -> bool {
        match self.search(key, id) {
            Ok(_) => false,
            Err(pos) => {
                self.entries.insert(pos, (key, id));
                true
            }
        }
    }

    /// 删除；不存在时返回 `false`
    pub fn remove(&mut self, key: SortKey, id: CellId) -> bool {
        match self.search(key, id) {
            Ok(pos) => {
                self.entries.remove(pos);
                true
            }
            Err(_) => false,
        }
    }

    /// 是否包含
    pub fn contains(&self, key: SortKey, id: CellId) -> bool {
        self.search(key, id).is_ok()
    }

    /// 按位置取单元
    #[inline]
    pub fn get(&self, pos: usize) -> Option<CellId> {
        self.entries.get(pos).map(|(_, id)| *id)
    }

    /// 线性遍历
    pub fn iter(&self) -> impl Iterator<Item = CellId> + '_ {
        self.entries.iter().map(|(_, id)| *id)
    }

    /// 某层在列表中的位置区间
    pub fn layer_range(&self, layer: usize) -> std::ops::Range<usize> {
        let start = self.entries.partition_point(|(k, _)| k.layer < layer);
        let end = self.entries.partition_point(|(k, _)| k.layer <= layer);
        start..end
    }

    /// 收集为向量
    pub fn to_vec(&self) -> Vec<CellId> {
        self.iter().collect()
    }

    /// 清空
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
