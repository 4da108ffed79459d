// crates/ag_grid/src/lib.rs

//! AirGrid 变分辨率网格
//!
//! 轴对齐嵌套矩形组成的三维单元图。
//!
//! # 模块
//!
//! - [`geometry`]: 矩形、折线、多边形与裁剪
//! - [`cell`]: 单元、方向、邻居边与受锁保护的可变状态
//! - [`cell_list`]: 按 (层, y, x) 全序排列的单元列表
//! - [`spatial_index`]: R-Tree 空间索引与相交比例查询
//! - [`grid`]: 单元图，插入/删除/分裂/合并与邻居推导
//! - [`validation`]: 覆盖率、反向边、地面自环等不变量校验
//! - [`builder`]: 背景场、人口数据与嵌套网格构建器

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod builder;
pub mod cell;
pub mod cell_list;
pub mod geometry;
pub mod grid;
pub mod spatial_index;
pub mod validation;

pub use builder::{
    BackgroundFields, GridBuilder, NestedGridBuilder, PopulationPatches, PopulationSource,
    UniformBackground,
};
pub use cell::{
    Cell, CellCoefficients, CellId, CellState, Direction, Edge, NeighborInfo, Neighbors,
};
pub use cell_list::{CellList, SortKey};
pub use geometry::{Geometry, LineString, Polygon, Rect};
pub use grid::{Grid, LayerStack};
pub use spatial_index::GridSpatialIndex;
pub use validation::{check_invariants, validate_grid};
