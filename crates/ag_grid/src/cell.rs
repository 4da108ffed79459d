// crates/ag_grid/src/cell.rs

//! 单元与邻居边
//!
//! 单元是矩形棱柱控制体。邻居关系以 [`CellId`] 列表表示，每条有向边
//! 携带 [`NeighborInfo`]。
//!
//! # 并发约定
//!
//! - `ci`、系数和邻居表在物理步内只读，无需加锁即可被其它单元的核函数读取
//! - `Cf` 与边界账本放在 [`CellState`] 中，受单元自身的互斥锁保护
//! - 修改 `ci` 或拓扑需要 `&mut Grid`，因此与物理步在类型层面互斥

use crate::geometry::Rect;
use ag_foundation::arena::{ArenaTag, Idx};
use glam::DVec2;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// 单元 Arena 标记
#[derive(Debug, Clone, Copy)]
pub struct CellTag;
impl ArenaTag for CellTag {}

/// 单元稳定索引
pub type CellId = Idx<CellTag>;

// ============================================================================
// 方向
// ============================================================================

/// 六个邻居方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Direction {
    /// 西 (-x)
    West,
    /// 东 (+x)
    East,
    /// 南 (-y)
    South,
    /// 北 (+y)
    North,
    /// 下 (-z)
    Below,
    /// 上 (+z)
    Above,
}

impl Direction {
    /// 全部方向
    pub const ALL: [Direction; 6] = [
        Direction::West,
        Direction::East,
        Direction::South,
        Direction::North,
        Direction::Below,
        Direction::Above,
    ];

    /// 水平四方向
    pub const LATERAL: [Direction; 4] = [
        Direction::West,
        Direction::East,
        Direction::South,
        Direction::North,
    ];

    /// 反方向
    pub fn opposite(self) -> Direction {
        match self {
            Direction::West => Direction::East,
            Direction::East => Direction::West,
            Direction::South => Direction::North,
            Direction::North => Direction::South,
            Direction::Below => Direction::Above,
            Direction::Above => Direction::Below,
        }
    }

    /// 是否为水平方向
    pub fn is_lateral(self) -> bool {
        !matches!(self, Direction::Below | Direction::Above)
    }

    /// 名称
    pub fn name(self) -> &'static str {
        match self {
            Direction::West => "west",
            Direction::East => "east",
            Direction::South => "south",
            Direction::North => "north",
            Direction::Below => "below",
            Direction::Above => "above",
        }
    }

    /// 单位外法向（水平方向），用于放置边界伪单元
    pub fn outward(self) -> DVec2 {
        match self {
            Direction::West => DVec2::new(-1.0, 0.0),
            Direction::East => DVec2::new(1.0, 0.0),
            Direction::South => DVec2::new(0.0, -1.0),
            Direction::North => DVec2::new(0.0, 1.0),
            Direction::Below | Direction::Above => DVec2::ZERO,
        }
    }
}

// ============================================================================
// 邻居边
// ============================================================================

/// 有向边属性
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NeighborInfo {
    /// 该邻居占本单元此侧面（或底/顶面）的比例
    pub cover_frac: f64,
    /// 界面扩散系数（两侧扩散系数的调和平均）[m²/s]
    pub diff: f64,
    /// 两单元中心沿法向的距离 [m]
    pub center_distance: f64,
}

/// 有向边
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Edge {
    /// 邻居单元
    pub target: CellId,
    /// 边属性
    pub info: NeighborInfo,
}

/// 边列表，大多数方向只有 1–4 条边
pub type EdgeList = SmallVec<[Edge; 4]>;

/// 一个单元的全部邻居
#[derive(Debug, Clone, Default)]
pub struct Neighbors {
    /// 西侧
    pub west: EdgeList,
    /// 东侧
    pub east: EdgeList,
    /// 南侧
    pub south: EdgeList,
    /// 北侧
    pub north: EdgeList,
    /// 下方（地面层为自身）
    pub below: EdgeList,
    /// 上方
    pub above: EdgeList,
    /// 地面层投影单元
    pub ground_level: EdgeList,
}

impl Neighbors {
    /// 按方向取边列表
    #[inline]
    pub fn get(&self, dir: Direction) -> &EdgeList {
        match dir {
            Direction::West => &self.west,
            Direction::East => &self.east,
            Direction::South => &self.south,
            Direction::North => &self.north,
            Direction::Below => &self.below,
            Direction::Above => &self.above,
        }
    }

    /// 按方向取可变边列表
    #[inline]
    pub fn get_mut(&mut self, dir: Direction) -> &mut EdgeList {
        match dir {
            Direction::West => &mut self.west,
            Direction::East => &mut self.east,
            Direction::South => &mut self.south,
            Direction::North => &mut self.north,
            Direction::Below => &mut self.below,
            Direction::Above => &mut self.above,
        }
    }

    /// 所有方向上出现过的邻居（含重复）
    pub fn all_targets(&self) -> impl Iterator<Item = CellId> + '_ {
        Direction::ALL
            .iter()
            .flat_map(move |d| self.get(*d).iter().map(|e| e.target))
            .chain(self.ground_level.iter().map(|e| e.target))
    }
}

// ============================================================================
// 系数
// ============================================================================

/// 由背景场给出的单元系数
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CellCoefficients {
    /// 西侧界面 x 向风速 [m/s]
    pub u_avg: f64,
    /// 南侧界面 y 向风速 [m/s]
    pub v_avg: f64,
    /// 底部界面 z 向风速 [m/s]
    pub w_avg: f64,
    /// x 向风速偏差（蜿蜒混合）[m/s]
    pub u_deviation: f64,
    /// y 向风速偏差（蜿蜒混合）[m/s]
    pub v_deviation: f64,
    /// 水平扩散系数 [m²/s]
    pub kxxyy: f64,
    /// 垂直扩散系数 [m²/s]
    pub kzz: f64,
    /// ACM2 上行混合率 [1/s]
    pub m2u: f64,
    /// ACM2 下行混合率 [1/s]
    pub m2d: f64,
    /// SO2 氧化速率 [1/s]
    pub so2_oxidation: f64,
    /// 有机物颗粒相比例
    pub aorg_partitioning: f64,
    /// 硝酸盐颗粒相比例
    pub no_partitioning: f64,
    /// 铵盐颗粒相比例
    pub nh_partitioning: f64,
    /// 颗粒物湿沉降速率 [1/s]
    pub particle_wet_dep: f64,
    /// SO2 湿沉降速率 [1/s]
    pub so2_wet_dep: f64,
    /// 其它气体湿沉降速率 [1/s]
    pub other_gas_wet_dep: f64,
    /// 颗粒物干沉降速度 [m/s]
    pub particle_dry_dep: f64,
    /// NH3 干沉降速度 [m/s]
    pub nh3_dry_dep: f64,
    /// SO2 干沉降速度 [m/s]
    pub so2_dry_dep: f64,
    /// VOC 干沉降速度 [m/s]
    pub voc_dry_dep: f64,
    /// NOx 干沉降速度 [m/s]
    pub nox_dry_dep: f64,
}

impl CellCoefficients {
    /// 所有系数是否有限
    pub fn first_non_finite(&self) -> Option<(&'static str, f64)> {
        let fields = [
            ("u_avg", self.u_avg),
            ("v_avg", self.v_avg),
            ("w_avg", self.w_avg),
            ("u_deviation", self.u_deviation),
            ("v_deviation", self.v_deviation),
            ("kxxyy", self.kxxyy),
            ("kzz", self.kzz),
            ("m2u", self.m2u),
            ("m2d", self.m2d),
            ("so2_oxidation", self.so2_oxidation),
            ("aorg_partitioning", self.aorg_partitioning),
            ("no_partitioning", self.no_partitioning),
            ("nh_partitioning", self.nh_partitioning),
            ("particle_wet_dep", self.particle_wet_dep),
            ("so2_wet_dep", self.so2_wet_dep),
            ("other_gas_wet_dep", self.other_gas_wet_dep),
            ("particle_dry_dep", self.particle_dry_dep),
            ("nh3_dry_dep", self.nh3_dry_dep),
            ("so2_dry_dep", self.so2_dry_dep),
            ("voc_dry_dep", self.voc_dry_dep),
            ("nox_dry_dep", self.nox_dry_dep),
        ];
        fields.into_iter().find(|(_, v)| !v.is_finite())
    }
}

// ============================================================================
// 可变状态
// ============================================================================

/// 流向边界伪单元的质量记录
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    /// 边界伪单元
    pub target: CellId,
    /// 每个物种的质量 [μg]
    pub mass: Vec<f64>,
}

/// 受锁保护的单元可变状态
#[derive(Debug, Clone, Default)]
pub struct CellState {
    /// 步末浓度 [μg/m³]
    pub cf: Vec<f64>,
    /// 本步流入边界伪单元的质量
    pub ledger: SmallVec<[LedgerEntry; 1]>,
}

impl CellState {
    /// 创建指定物种数的零状态
    pub fn zeros(n_species: usize) -> Self {
        Self {
            cf: vec![0.0; n_species],
            ledger: SmallVec::new(),
        }
    }

    /// 记录流向边界伪单元 `target` 的质量
    pub fn book(&mut self, target: CellId, species: usize, mass: f64) {
        if mass == 0.0 {
            return;
        }
        let n = self.cf.len();
        let entry = match self.ledger.iter_mut().position(|e| e.target == target) {
            Some(pos) => &mut self.ledger[pos],
            None => {
                self.ledger.push(LedgerEntry {
                    target,
                    mass: vec![0.0; n],
                });
                let last = self.ledger.len() - 1;
                &mut self.ledger[last]
            }
        };
        entry.mass[species] += mass;
    }
}

// ============================================================================
// 单元
// ============================================================================

/// 边界伪单元所属关系
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundaryOwner {
    /// 与之相邻的内部单元
    pub owner: CellId,
    /// 位于内部单元的哪一侧
    pub side: Direction,
}

/// 矩形棱柱控制体
#[derive(Debug)]
pub struct Cell {
    /// 水平范围
    pub rect: Rect,
    /// 层号（地面层为 0）
    pub layer: usize,
    /// 底面高度 [m]
    pub z_bottom: f64,
    /// 厚度 [m]
    pub dz: f64,
    /// 嵌套路径：每级的 (i, j)
    pub nest: Vec<(u16, u16)>,
    /// 边界伪单元所属关系；内部单元为 `None`
    pub boundary: Option<BoundaryOwner>,
    /// 系数
    pub coeffs: CellCoefficients,
    /// 邻居
    pub neighbors: Neighbors,
    /// 步初浓度 [μg/m³]
    pub ci: Vec<f64>,
    /// 排放通量 [μg/m³/s]
    pub emis_flux: Vec<f64>,
    /// 各人口列的人数 [人]
    pub population: Vec<f64>,
    /// 基线死亡率 [每 10 万人每年]
    pub mortality_rate: f64,
    /// 地面单元是否超过人口密度阈值
    pub above_density_threshold: bool,
    state: Mutex<CellState>,
}

impl Clone for Cell {
    fn clone(&self) -> Self {
        Self {
            rect: self.rect,
            layer: self.layer,
            z_bottom: self.z_bottom,
            dz: self.dz,
            nest: self.nest.clone(),
            boundary: self.boundary,
            coeffs: self.coeffs,
            neighbors: self.neighbors.clone(),
            ci: self.ci.clone(),
            emis_flux: self.emis_flux.clone(),
            population: self.population.clone(),
            mortality_rate: self.mortality_rate,
            above_density_threshold: self.above_density_threshold,
            state: Mutex::new(self.state.lock().clone()),
        }
    }
}

impl Cell {
    /// 创建没有邻居的单元，浓度为零
    pub fn new(rect: Rect, layer: usize, z_bottom: f64, dz: f64, n_species: usize) -> Self {
        Self {
            rect,
            layer,
            z_bottom,
            dz,
            nest: Vec::new(),
            boundary: None,
            coeffs: CellCoefficients::default(),
            neighbors: Neighbors::default(),
            ci: vec![0.0; n_species],
            emis_flux: vec![0.0; n_species],
            population: Vec::new(),
            mortality_rate: 0.0,
            above_density_threshold: false,
            state: Mutex::new(CellState::zeros(n_species)),
        }
    }

    /// 设置系数
    #[must_use]
    pub fn with_coefficients(mut self, coeffs: CellCoefficients) -> Self {
        self.coeffs = coeffs;
        self
    }

    /// 设置嵌套路径
    #[must_use]
    pub fn with_nest(mut self, nest: Vec<(u16, u16)>) -> Self {
        self.nest = nest;
        self
    }

    /// x 向宽度 [m]
    #[inline]
    pub fn dx(&self) -> f64 {
        self.rect.width()
    }

    /// y 向宽度 [m]
    #[inline]
    pub fn dy(&self) -> f64 {
        self.rect.height()
    }

    /// 水平面积 [m²]
    #[inline]
    pub fn area(&self) -> f64 {
        self.rect.area()
    }

    /// 体积 [m³]
    #[inline]
    pub fn volume(&self) -> f64 {
        self.rect.area() * self.dz
    }

    /// 水平形心
    #[inline]
    pub fn centroid(&self) -> DVec2 {
        self.rect.center()
    }

    /// 是否为边界伪单元
    #[inline]
    pub fn is_boundary(&self) -> bool {
        self.boundary.is_some()
    }

    /// 物种数
    #[inline]
    pub fn n_species(&self) -> usize {
        self.ci.len()
    }

    /// 加锁获取可变状态
    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, CellState> {
        self.state.lock()
    }

    /// 独占访问可变状态（无需加锁）
    #[inline]
    pub fn state_mut(&mut self) -> &mut CellState {
        self.state.get_mut()
    }

    /// 步末浓度快照
    pub fn cf(&self) -> Vec<f64> {
        self.state.lock().cf.clone()
    }

    /// 步末浓度的单个物种
    pub fn cf_at(&self, species: usize) -> f64 {
        self.state.lock().cf[species]
    }

    /// 同时设置 `Ci` 与 `Cf`
    pub fn set_concentration(&mut self, conc: &[f64]) {
        self.ci.clear();
        self.ci.extend_from_slice(conc);
        let state = self.state.get_mut();
        state.cf.clear();
        state.cf.extend_from_slice(conc);
    }

    /// 某人口列的人数
    pub fn population_of(&self, column: usize) -> f64 {
        self.population.get(column).copied().unwrap_or(0.0)
    }
}
