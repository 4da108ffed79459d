// crates/ag_config/src/model_config.rs

//! 模型配置
//!
//! 所有字段都有默认值，JSON 文件中只需写出需要覆盖的项。

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 模型总配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModelConfig {
    /// 变分辨率网格
    #[serde(default)]
    pub grid: VarGridConfig,

    /// 运行控制
    #[serde(default)]
    pub run: RunConfig,

    /// 化学机制
    #[serde(default)]
    pub mechanism: MechanismConfig,

    /// 输出
    #[serde(default)]
    pub output: OutputConfig,
}

// ============================================================
// 网格
// ============================================================

/// 变分辨率网格配置
///
/// 基础网格为 `nx × ny` 个 `dx × dy` 的粗单元；第 i 级嵌套把一个单元
/// 划分为 `xnests[i] × ynests[i]` 个子单元。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VarGridConfig {
    /// 域西南角 x [m]
    #[serde(default)]
    pub x0: f64,
    /// 域西南角 y [m]
    #[serde(default)]
    pub y0: f64,
    /// 粗单元宽度 [m]
    #[serde(default = "default_cell_size")]
    pub dx: f64,
    /// 粗单元高度 [m]
    #[serde(default = "default_cell_size")]
    pub dy: f64,
    /// x 方向粗单元数
    #[serde(default = "default_n")]
    pub nx: usize,
    /// y 方向粗单元数
    #[serde(default = "default_n")]
    pub ny: usize,
    /// 每级嵌套的 x 方向划分数
    #[serde(default = "default_nests")]
    pub xnests: Vec<usize>,
    /// 每级嵌套的 y 方向划分数
    #[serde(default = "default_nests")]
    pub ynests: Vec<usize>,
    /// 各层厚度 [m]，自下而上
    #[serde(default = "default_layer_heights")]
    pub layer_heights: Vec<f64>,
    /// 允许加密的最高层数（层号小于此值的单元才会被划分）
    #[serde(default = "default_hi_res_layers")]
    pub hi_res_layers: usize,
    /// 用于网格加密与收敛判断的人口列
    #[serde(default = "default_pop_column")]
    pub pop_grid_column: String,
    /// 人口阈值 [人/单元]
    #[serde(default = "default_pop_threshold")]
    pub pop_threshold: f64,
    /// 人口密度阈值 [人/m²]
    #[serde(default = "default_pop_density_threshold")]
    pub pop_density_threshold: f64,
    /// 浓度-人口梯度阈值（无量纲）
    #[serde(default = "default_pop_conc_threshold")]
    pub pop_conc_threshold: f64,
}

fn default_cell_size() -> f64 { 12_000.0 }
fn default_n() -> usize { 4 }
fn default_nests() -> Vec<usize> { vec![2, 2] }
fn default_layer_heights() -> Vec<f64> { vec![50.0, 100.0, 200.0, 400.0] }
fn default_hi_res_layers() -> usize { 2 }
fn default_pop_column() -> String { "TotalPop".to_string() }
fn default_pop_threshold() -> f64 { 40_000.0 }
fn default_pop_density_threshold() -> f64 { 0.0055 }
fn default_pop_conc_threshold() -> f64 { 1e-9 }

impl Default for VarGridConfig {
    fn default() -> Self {
        Self {
            x0: 0.0,
            y0: 0.0,
            dx: default_cell_size(),
            dy: default_cell_size(),
            nx: default_n(),
            ny: default_n(),
            xnests: default_nests(),
            ynests: default_nests(),
            layer_heights: default_layer_heights(),
            hi_res_layers: default_hi_res_layers(),
            pop_grid_column: default_pop_column(),
            pop_threshold: default_pop_threshold(),
            pop_density_threshold: default_pop_density_threshold(),
            pop_conc_threshold: default_pop_conc_threshold(),
        }
    }
}

impl VarGridConfig {
    /// 最大嵌套级数
    pub fn max_nest_level(&self) -> usize {
        self.xnests.len()
    }

    /// 层数
    pub fn n_layers(&self) -> usize {
        self.layer_heights.len()
    }
}

// ============================================================
// 运行控制
// ============================================================

/// 运行控制配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// 固定迭代次数；0 表示按收敛判据停止
    #[serde(default)]
    pub num_iterations: usize,
    /// 收敛检查周期 [s]（模拟时间）
    #[serde(default = "default_check_period")]
    pub convergence_check_period: f64,
    /// 收敛相对容差
    #[serde(default = "default_tolerance")]
    pub convergence_tolerance: f64,
    /// 网格变异与时间步重算周期 [s]（模拟时间）
    #[serde(default = "default_check_period")]
    pub mutate_interval: f64,
    /// 是否在运行中动态变异网格
    #[serde(default)]
    pub dynamic_grid: bool,
    /// CFL 时间步的缩减系数
    #[serde(default = "default_advection_factor")]
    pub advection_factor: f64,
    /// 最小时间步 [s]
    #[serde(default = "default_dt_min")]
    pub dt_min: f64,
    /// 最大时间步 [s]
    #[serde(default = "default_dt_max")]
    pub dt_max: f64,
    /// 工作线程数；0 表示使用可用并行度
    #[serde(default)]
    pub workers: usize,
}

fn default_check_period() -> f64 { 3.0 * 3600.0 }
fn default_tolerance() -> f64 { 0.001 }
fn default_advection_factor() -> f64 { 2.0 }
fn default_dt_min() -> f64 { 1e-3 }
fn default_dt_max() -> f64 { 3600.0 }

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            num_iterations: 0,
            convergence_check_period: default_check_period(),
            convergence_tolerance: default_tolerance(),
            mutate_interval: default_check_period(),
            dynamic_grid: false,
            advection_factor: default_advection_factor(),
            dt_min: default_dt_min(),
            dt_max: default_dt_max(),
            workers: 0,
        }
    }
}

impl RunConfig {
    /// 实际工作线程数
    pub fn resolved_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }
}

// ============================================================
// 化学机制
// ============================================================

/// 机制配置：沉降方案名称由机制解释
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MechanismConfig {
    /// 干沉降方案
    #[serde(default = "default_dry_dep")]
    pub dry_dep: String,
    /// 湿沉降方案
    #[serde(default = "default_wet_dep")]
    pub wet_dep: String,
}

fn default_dry_dep() -> String { "simple".to_string() }
fn default_wet_dep() -> String { "emep".to_string() }

impl Default for MechanismConfig {
    fn default() -> Self {
        Self {
            dry_dep: default_dry_dep(),
            wet_dep: default_wet_dep(),
        }
    }
}

// ============================================================
// 输出
// ============================================================

/// 输出配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// 输出目录
    #[serde(default = "default_output_dir")]
    pub directory: PathBuf,
    /// 输出所有层（否则仅地面层）
    #[serde(default)]
    pub all_layers: bool,
    /// 输出变量
    #[serde(default = "default_output_variables")]
    pub variables: Vec<String>,
}

fn default_output_dir() -> PathBuf { PathBuf::from("output") }
fn default_output_variables() -> Vec<String> { vec!["TotalPM25".to_string()] }

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_dir(),
            all_layers: false,
            variables: default_output_variables(),
        }
    }
}

// ============================================================
// 加载与验证
// ============================================================

impl ModelConfig {
    /// 从 JSON 文件加载配置并验证
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_json(&content)?;
        log::debug!("已加载配置: {}", path.as_ref().display());
        Ok(config)
    }

    /// 从 JSON 字符串解析配置并验证
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: ModelConfig =
            serde_json::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// 保存配置到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content =
            serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<(), ConfigError> {
        let g = &self.grid;
        if !(g.dx > 0.0) || !(g.dy > 0.0) {
            return Err(ConfigError::invalid(
                "grid.dx/dy",
                format!("{}/{}", g.dx, g.dy),
                "单元尺寸必须为正",
            ));
        }
        if g.nx == 0 || g.ny == 0 {
            return Err(ConfigError::invalid(
                "grid.nx/ny",
                format!("{}/{}", g.nx, g.ny),
                "单元数必须为正",
            ));
        }
        if g.xnests.len() != g.ynests.len() {
            return Err(ConfigError::invalid(
                "grid.xnests",
                format!("{:?} vs {:?}", g.xnests, g.ynests),
                "xnests 与 ynests 长度必须一致",
            ));
        }
        if g.xnests.iter().chain(g.ynests.iter()).any(|&n| n == 0) {
            return Err(ConfigError::invalid("grid.xnests", format!("{:?}", g.xnests), "划分数必须 >= 1"));
        }
        if g.layer_heights.is_empty() {
            return Err(ConfigError::Missing("grid.layer_heights".to_string()));
        }
        if let Some(h) = g.layer_heights.iter().find(|h| !(**h > 0.0)) {
            return Err(ConfigError::invalid("grid.layer_heights", h, "层厚必须为正"));
        }
        if g.pop_grid_column.is_empty() {
            return Err(ConfigError::Missing("grid.pop_grid_column".to_string()));
        }

        let r = &self.run;
        if !(r.convergence_check_period > 0.0) {
            return Err(ConfigError::invalid(
                "run.convergence_check_period",
                r.convergence_check_period,
                "周期必须为正",
            ));
        }
        if !(r.mutate_interval > 0.0) {
            return Err(ConfigError::invalid("run.mutate_interval", r.mutate_interval, "周期必须为正"));
        }
        if !(r.convergence_tolerance > 0.0) {
            return Err(ConfigError::invalid(
                "run.convergence_tolerance",
                r.convergence_tolerance,
                "容差必须为正",
            ));
        }
        if !(r.advection_factor > 0.0) {
            return Err(ConfigError::invalid("run.advection_factor", r.advection_factor, "必须为正"));
        }
        if !(r.dt_min > 0.0) || r.dt_min > r.dt_max {
            return Err(ConfigError::invalid(
                "run.dt_min/dt_max",
                format!("{}/{}", r.dt_min, r.dt_max),
                "需满足 0 < dt_min <= dt_max",
            ));
        }

        if self.mechanism.dry_dep.is_empty() || self.mechanism.wet_dep.is_empty() {
            return Err(ConfigError::Missing("mechanism.dry_dep/wet_dep".to_string()));
        }
        Ok(())
    }
}
