// crates/ag_foundation/src/arena.rs

//! 带代际验证的泛型 Arena
//!
//! 网格单元之间互相引用（邻居表），因此用稳定索引而不是引用来表示。
//! 单元在网格变异时会被删除，槽位随后被复用，所以每个索引携带代际号，
//! 过期索引在访问时返回 `None` 而不是静默指向新单元。
//!
//! # 设计目标
//!
//! - **O(1)**: 插入、删除、查找均为常数时间
//! - **类型安全**: 通过标记类型防止不同 Arena 的索引混用
//! - **悬垂检测**: 代际号不匹配的索引视为无效
//!
//! # 示例
//!
//! ```
//! use ag_foundation::arena::{Arena, ArenaTag};
//!
//! #[derive(Debug, Clone, Copy)]
//! struct CellTag;
//! impl ArenaTag for CellTag {}
//!
//! let mut arena: Arena<f64, CellTag> = Arena::new();
//! let a = arena.insert(1.0);
//! assert_eq!(arena.remove(a), Some(1.0));
//!
//! let b = arena.insert(2.0);
//! assert_eq!(a.index(), b.index()); // 槽位复用
//! assert_eq!(arena.get(a), None);   // 旧索引已过期
//! assert_eq!(arena.get(b), Some(&2.0));
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

// ============================================================================
// 标记类型
// ============================================================================

/// Arena 标记 trait，用于区分不同用途的 Arena
pub trait ArenaTag: 'static + Copy + Send + Sync {}

// ============================================================================
// 索引类型
// ============================================================================

/// 带代际号的类型安全索引（8 字节）
#[repr(C)]
pub struct Idx<Tag> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> Tag>,
}

impl<Tag> Copy for Idx<Tag> {}

impl<Tag> Clone for Idx<Tag> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<Tag> PartialEq for Idx<Tag> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<Tag> Eq for Idx<Tag> {}

impl<Tag> Hash for Idx<Tag> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<Tag> PartialOrd for Idx<Tag> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<Tag> Ord for Idx<Tag> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.index, self.generation).cmp(&(other.index, other.generation))
    }
}

impl<Tag> fmt::Debug for Idx<Tag> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Idx({}v{})", self.index, self.generation)
    }
}

impl<Tag> fmt::Display for Idx<Tag> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.index)
    }
}

impl<Tag> Idx<Tag> {
    /// 无效索引常量
    pub const INVALID: Self = Self {
        index: u32::MAX,
        generation: 0,
        _marker: PhantomData,
    };

    #[inline]
    const fn new(index: u32, generation: u32) -> Self {
        Self {
            index,
            generation,
            _marker: PhantomData,
        }
    }

    /// 槽位索引值
    #[inline]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// 代际号
    #[inline]
    pub const fn generation(self) -> u32 {
        self.generation
    }

    /// 转换为 `usize`
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.index as usize
    }

    /// 是否为 INVALID
    #[inline]
    pub const fn is_invalid(self) -> bool {
        self.index == u32::MAX
    }
}

impl<Tag> Default for Idx<Tag> {
    fn default() -> Self {
        Self::INVALID
    }
}

// ============================================================================
// Slot 定义
// ============================================================================

#[derive(Debug, Clone)]
enum Slot<T> {
    Occupied { generation: u32, value: T },
    Vacant { generation: u32, next_free: Option<u32> },
}

impl<T> Slot<T> {
    #[inline]
    fn generation(&self) -> u32 {
        match self {
            Slot::Occupied { generation, .. } | Slot::Vacant { generation, .. } => *generation,
        }
    }
}

// ============================================================================
// Arena 实现
// ============================================================================

/// 带代际验证的内存池
pub struct Arena<T, Tag: ArenaTag> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    len: usize,
    _marker: PhantomData<Tag>,
}

impl<T, Tag: ArenaTag> Default for Arena<T, Tag> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug, Tag: ArenaTag> fmt::Debug for Arena<T, Tag> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<T, Tag: ArenaTag> Arena<T, Tag> {
    /// 创建空 Arena
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            len: 0,
            _marker: PhantomData,
        }
    }

    /// 创建指定容量的 Arena
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free_head: None,
            len: 0,
            _marker: PhantomData,
        }
    }

    /// 有效元素数量
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// 是否为空
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 当前槽位数（含空闲槽位）
    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// 插入元素并返回索引
    ///
    /// 优先复用空闲槽位；复用时代际号已在删除时递增。
    pub fn insert(&mut self, value: T) -> Idx<Tag> {
        match self.free_head {
            Some(free) => {
                let slot = &mut self.slots[free as usize];
                let (generation, next_free) = match slot {
                    Slot::Vacant { generation, next_free } => (*generation, *next_free),
                    Slot::Occupied { .. } => unreachable!("Arena 空闲链表指向已占用槽位"),
                };
                *slot = Slot::Occupied { generation, value };
                self.free_head = next_free;
                self.len += 1;
                Idx::new(free, generation)
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot::Occupied { generation: 0, value });
                self.len += 1;
                Idx::new(index, 0)
            }
        }
    }

    /// 获取不可变引用，过期或无效索引返回 `None`
    #[inline]
    pub fn get(&self, idx: Idx<Tag>) -> Option<&T> {
        match self.slots.get(idx.as_usize())? {
            Slot::Occupied { generation, value } if *generation == idx.generation => Some(value),
            _ => None,
        }
    }

    /// 获取可变引用
    #[inline]
    pub fn get_mut(&mut self, idx: Idx<Tag>) -> Option<&mut T> {
        match self.slots.get_mut(idx.as_usize())? {
            Slot::Occupied { generation, value } if *generation == idx.generation => Some(value),
            _ => None,
        }
    }

    /// 同时获取两个不同元素的可变引用
    pub fn get2_mut(&mut self, a: Idx<Tag>, b: Idx<Tag>) -> Option<(&mut T, &mut T)> {
        if a.index == b.index || !self.contains(a) || !self.contains(b) {
            return None;
        }
        let (lo, hi, swapped) = if a.index < b.index { (a, b, false) } else { (b, a, true) };
        let (left, right) = self.slots.split_at_mut(hi.as_usize());
        let first = match &mut left[lo.as_usize()] {
            Slot::Occupied { value, .. } => value,
            Slot::Vacant { .. } => return None,
        };
        let second = match &mut right[0] {
            Slot::Occupied { value, .. } => value,
            Slot::Vacant { .. } => return None,
        };
        if swapped {
            Some((second, first))
        } else {
            Some((first, second))
        }
    }

    /// 索引是否有效
    #[inline]
    pub fn contains(&self, idx: Idx<Tag>) -> bool {
        self.get(idx).is_some()
    }

    /// 删除元素，递增代际号并回收槽位
    pub fn remove(&mut self, idx: Idx<Tag>) -> Option<T> {
        if !self.contains(idx) {
            return None;
        }
        let slot = &mut self.slots[idx.as_usize()];
        let next_generation = slot.generation().wrapping_add(1);
        let old = std::mem::replace(
            slot,
            Slot::Vacant {
                generation: next_generation,
                next_free: self.free_head,
            },
        );
        self.free_head = Some(idx.index);
        self.len -= 1;
        match old {
            Slot::Occupied { value, .. } => Some(value),
            Slot::Vacant { .. } => None,
        }
    }

    /// 清空 Arena
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free_head = None;
        self.len = 0;
    }

    /// 遍历所有有效元素（按槽位顺序）
    pub fn iter(&self) -> impl Iterator<Item = (Idx<Tag>, &T)> + '_ {
        self.slots.iter().enumerate().filter_map(|(i, slot)| match slot {
            Slot::Occupied { generation, value } => Some((Idx::new(i as u32, *generation), value)),
            Slot::Vacant { .. } => None,
        })
    }

    /// 可变遍历
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Idx<Tag>, &mut T)> + '_ {
        self.slots.iter_mut().enumerate().filter_map(|(i, slot)| match slot {
            Slot::Occupied { generation, value } => Some((Idx::new(i as u32, *generation), value)),
            Slot::Vacant { .. } => None,
        })
    }
}

impl<T, Tag: ArenaTag> std::ops::Index<Idx<Tag>> for Arena<T, Tag> {
    type Output = T;

    fn index(&self, idx: Idx<Tag>) -> &T {
        match self.get(idx) {
            Some(v) => v,
            None => panic!("无效的 Arena 索引: {:?}", idx),
        }
    }
}

impl<T, Tag: ArenaTag> std::ops::IndexMut<Idx<Tag>> for Arena<T, Tag> {
    fn index_mut(&mut self, idx: Idx<Tag>) -> &mut T {
        match self.get_mut(idx) {
            Some(v) => v,
            None => panic!("无效的 Arena 索引: {:?}", idx),
        }
    }
}

// ============================================================================
// 测试
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy)]
    struct TestTag;
    impl ArenaTag for TestTag {}

    #[test]
    fn test_insert_get_remove() {
        let mut arena: Arena<i32, TestTag> = Arena::new();
        let a = arena.insert(1);
        let b = arena.insert(2);
        assert_eq!(arena.len(), 2);
        assert_eq!(arena[a], 1);
        assert_eq!(arena.remove(b), Some(2));
        assert_eq!(arena.remove(b), None);
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_stale_index_rejected() {
        let mut arena: Arena<i32, TestTag> = Arena::new();
        let a = arena.insert(1);
        arena.remove(a);
        let b = arena.insert(5);
        assert_eq!(a.index(), b.index());
        assert_ne!(a, b);
        assert!(arena.get(a).is_none());
        assert_eq!(arena.get(b), Some(&5));
    }

    #[test]
    fn test_get2_mut() {
        let mut arena: Arena<i32, TestTag> = Arena::new();
        let a = arena.insert(1);
        let b = arena.insert(2);
        {
            let (x, y) = arena.get2_mut(b, a).unwrap();
            *x += 10;
            *y += 20;
        }
        assert_eq!(arena[a], 21);
        assert_eq!(arena[b], 12);
        assert!(arena.get2_mut(a, a).is_none());
    }

    #[test]
    fn test_iter_skips_vacant() {
        let mut arena: Arena<i32, TestTag> = Arena::new();
        let ids: Vec<_> = (0..5).map(|i| arena.insert(i)).collect();
        arena.remove(ids[1]);
        arena.remove(ids[3]);
        let values: Vec<i32> = arena.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![0, 2, 4]);
    }
}
