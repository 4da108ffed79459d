// crates/ag_foundation/src/validation.rs

//! 运行时验证工具
//!
//! 网格不变量校验会一次性收集所有违反项，而不是在第一处失败时返回，
//! 便于定位构建器的缺陷。
//!
//! # 示例
//!
//! ```
//! use ag_foundation::validation::{ValidationReport, ValidationError};
//!
//! let mut report = ValidationReport::new();
//! report.add_error(ValidationError::CoverageSum {
//!     cell: "#3".into(),
//!     direction: "west",
//!     sum: 0.5,
//! });
//! assert!(!report.is_valid());
//! assert!(report.into_result().is_err());
//! ```

use crate::error::{AgError, AgResult};
use std::fmt;

/// 验证报告
#[derive(Debug, Default)]
pub struct ValidationReport {
    /// 错误列表
    pub errors: Vec<ValidationError>,
    /// 警告列表
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationReport {
    /// 创建空的验证报告
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加错误
    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    /// 添加警告
    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    /// 是否有错误
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// 错误数量
    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// 是否通过（无错误）
    pub fn is_valid(&self) -> bool {
        !self.has_errors()
    }

    /// 合并另一个报告
    pub fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// 转换为结果：有错误时返回 [`AgError::InvariantViolation`]
    pub fn into_result(self) -> AgResult<()> {
        match self.errors.first() {
            None => Ok(()),
            Some(first) => Err(AgError::InvariantViolation {
                count: self.errors.len(),
                summary: first.to_string(),
            }),
        }
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "验证报告:")?;
        writeln!(f, "  错误: {} 个", self.errors.len())?;
        writeln!(f, "  警告: {} 个", self.warnings.len())?;
        for (i, err) in self.errors.iter().enumerate() {
            writeln!(f, "  {}. {}", i + 1, err)?;
        }
        for (i, warn) in self.warnings.iter().enumerate() {
            writeln!(f, "  W{}. {}", i + 1, warn)?;
        }
        Ok(())
    }
}

/// 验证错误类型
#[derive(Debug, Clone)]
pub enum ValidationError {
    /// 某方向覆盖率之和不为 1
    CoverageSum {
        /// 单元描述
        cell: String,
        /// 方向名
        direction: &'static str,
        /// 实际和
        sum: f64,
    },
    /// 缺少反向邻居或反向记录不一致
    Reciprocity {
        /// 单元描述
        cell: String,
        /// 邻居描述
        neighbor: String,
        /// 方向名
        direction: &'static str,
        /// 说明
        message: String,
    },
    /// 地面层单元的下方邻居不是自身
    GroundSelfLoop {
        /// 单元描述
        cell: String,
    },
    /// 地面投影单元沿上方链无法到达本单元
    GroundLevelReach {
        /// 单元描述
        cell: String,
        /// 地面单元描述
        ground: String,
    },
    /// 非有限值
    NonFinite {
        /// 字段名称
        field: &'static str,
        /// 单元描述
        cell: String,
        /// 非有限的数值
        value: f64,
    },
    /// 引用了不存在的单元
    DanglingReference {
        /// 单元描述
        cell: String,
        /// 悬垂引用描述
        target: String,
    },
    /// 自定义错误
    Custom {
        /// 自定义消息
        message: String,
    },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CoverageSum { cell, direction, sum } => {
                write!(f, "单元{}: {} 方向覆盖率之和={} (应为 1)", cell, direction, sum)
            }
            Self::Reciprocity {
                cell,
                neighbor,
                direction,
                message,
            } => write!(f, "单元{} -> {} ({}): {}", cell, neighbor, direction, message),
            Self::GroundSelfLoop { cell } => {
                write!(f, "地面单元{}: 下方邻居不是自身", cell)
            }
            Self::GroundLevelReach { cell, ground } => {
                write!(f, "单元{}: 地面单元{}沿上方链不可达", cell, ground)
            }
            Self::NonFinite { field, cell, value } => {
                write!(f, "单元{}: 字段{}={} (非有限值)", cell, field, value)
            }
            Self::DanglingReference { cell, target } => {
                write!(f, "单元{}: 引用了不存在的单元{}", cell, target)
            }
            Self::Custom { message } => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for ValidationError {}

/// 验证警告类型
#[derive(Debug, Clone)]
pub enum ValidationWarning {
    /// 系数超出常见范围
    UnusualValue {
        /// 字段名称
        field: &'static str,
        /// 单元描述
        cell: String,
        /// 实际值
        value: f64,
    },
    /// 自定义警告
    Custom {
        /// 自定义消息
        message: String,
    },
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnusualValue { field, cell, value } => {
                write!(f, "单元{}: 字段{}={} 不常见", cell, field, value)
            }
            Self::Custom { message } => write!(f, "{}", message),
        }
    }
}
