// crates/ag_foundation/src/lib.rs

//! AirGrid Foundation Layer
//!
//! 基础层，提供整个项目共享的抽象。
//!
//! # 模块概览
//!
//! - [`arena`]: 带代际验证的泛型 Arena，单元图以稳定索引互相引用
//! - [`error`]: 统一错误类型（配置 / 拓扑 / 数值三类）
//! - [`validation`]: 网格不变量校验报告
//! - [`tolerance`]: 数值容差与比较工具
//!
//! # 设计原则
//!
//! 1. **最少依赖**: 仅依赖 thiserror
//! 2. **类型安全**: 标记类型防止不同 Arena 的索引混用
//! 3. **悬垂检测**: 网格变异后过期的单元索引在访问时被拒绝

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod arena;
pub mod error;
pub mod tolerance;
pub mod validation;

// 重导出常用类型
pub use arena::{Arena, ArenaTag, Idx};
pub use error::{AgError, AgResult};
pub use validation::{ValidationError, ValidationReport, ValidationWarning};

/// Prelude 模块，包含常用类型
pub mod prelude {
    pub use crate::arena::{Arena, ArenaTag, Idx};
    pub use crate::error::{ensure_finite, AgError, AgResult};
    pub use crate::tolerance::{approx_eq, harmonic_mean, relative_difference};
    pub use crate::validation::{ValidationError, ValidationReport, ValidationWarning};
}
