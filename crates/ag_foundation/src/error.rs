// crates/ag_foundation/src/error.rs

//! 错误处理模块，定义统一错误类型
//!
//! 错误分三类，与运行循环的处理方式一一对应：
//!
//! 1. **配置错误**: 时间步为零、请求了不存在的物种或人口列，立即终止运行
//! 2. **拓扑错误**: 网格构建器或变异器的结果违反网格不变量，不做自动修正
//! 3. **数值异常**: 浓度或收敛比出现 NaN/Inf，作为错误上报而不是继续传播
//!
//! 核函数本身不返回错误；错误只在阶段边界（构建、变异、收敛判断）产生，
//! 并同步向上传播到运行循环，遇到第一个错误即停止。
//!
//! # 示例
//!
//! ```
//! use ag_foundation::error::{AgError, AgResult};
//!
//! fn check_dt(dt: f64) -> AgResult<()> {
//!     if dt == 0.0 {
//!         return Err(AgError::ZeroTimestep);
//!     }
//!     Ok(())
//! }
//!
//! assert!(check_dt(0.0).unwrap_err().is_configuration());
//! ```

use thiserror::Error;

/// 统一结果类型
pub type AgResult<T> = Result<T, AgError>;

/// AirGrid 错误类型
#[derive(Error, Debug)]
pub enum AgError {
    // ========================================================================
    // 配置错误
    // ========================================================================
    /// 配置错误
    #[error("配置错误: {message}")]
    Config {
        /// 具体错误信息
        message: String,
    },

    /// 时间步为零，周期动作的累加器将永远不前进
    #[error("时间步长为零")]
    ZeroTimestep,

    /// 请求的物种不存在
    #[error("物种不存在: {name}")]
    MissingSpecies {
        /// 物种或输出变量名
        name: String,
    },

    /// 请求的人口列不存在
    #[error("人口列不存在: {name}")]
    MissingPopulationColumn {
        /// 列名
        name: String,
    },

    // ========================================================================
    // 拓扑错误
    // ========================================================================
    /// 网格拓扑错误
    #[error("网格拓扑错误: {message}")]
    Topology {
        /// 具体错误信息
        message: String,
    },

    /// 网格不变量校验失败
    #[error("网格不变量校验失败 ({count} 项): {summary}")]
    InvariantViolation {
        /// 违反项数量
        count: usize,
        /// 首条违反项描述
        summary: String,
    },

    // ========================================================================
    // 数值异常
    // ========================================================================
    /// 非有限值
    #[error("数值异常: {what} = {value}")]
    NonFinite {
        /// 出现异常的量
        what: String,
        /// 异常值
        value: f64,
    },

    // ========================================================================
    // 通用错误
    // ========================================================================
    /// 无效输入
    #[error("无效的输入数据: {message}")]
    InvalidInput {
        /// 说明无效原因
        message: String,
    },

    /// 无效索引（代际不匹配或已删除）
    #[error("无效索引: {what}")]
    InvalidIndex {
        /// 索引描述
        what: String,
    },

    /// IO 错误
    #[error("IO错误: {message}")]
    Io {
        /// 描述性错误信息
        message: String,
        /// 底层 IO 错误
        #[source]
        source: Option<std::io::Error>,
    },

    /// 通道发送失败
    #[error("通道发送失败")]
    ChannelSendError,
}

// ========================================================================
// 便捷构造方法
// ========================================================================

impl AgError {
    /// 配置错误
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// 物种不存在
    pub fn missing_species(name: impl Into<String>) -> Self {
        Self::MissingSpecies { name: name.into() }
    }

    /// 人口列不存在
    pub fn missing_population_column(name: impl Into<String>) -> Self {
        Self::MissingPopulationColumn { name: name.into() }
    }

    /// 拓扑错误
    pub fn topology(message: impl Into<String>) -> Self {
        Self::Topology {
            message: message.into(),
        }
    }

    /// 非有限值
    pub fn non_finite(what: impl Into<String>, value: f64) -> Self {
        Self::NonFinite {
            what: what.into(),
            value,
        }
    }

    /// 无效输入
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// 无效索引
    pub fn invalid_index(what: impl Into<String>) -> Self {
        Self::InvalidIndex { what: what.into() }
    }

    /// IO 错误（带源）
    pub fn io_with_source(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source: Some(source),
        }
    }

    /// 是否为配置类错误
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Config { .. }
                | Self::ZeroTimestep
                | Self::MissingSpecies { .. }
                | Self::MissingPopulationColumn { .. }
        )
    }

    /// 是否为拓扑类错误
    pub fn is_topology(&self) -> bool {
        matches!(self, Self::Topology { .. } | Self::InvariantViolation { .. })
    }

    /// 是否为数值异常
    pub fn is_numerical(&self) -> bool {
        matches!(self, Self::NonFinite { .. })
    }
}

impl From<std::io::Error> for AgError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl<T> From<std::sync::mpsc::SendError<T>> for AgError {
    fn from(_: std::sync::mpsc::SendError<T>) -> Self {
        Self::ChannelSendError
    }
}

/// 若值非有限则返回 [`AgError::NonFinite`]
#[inline]
pub fn ensure_finite(what: impl FnOnce() -> String, value: f64) -> AgResult<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(AgError::non_finite(what(), value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy() {
        assert!(AgError::ZeroTimestep.is_configuration());
        assert!(AgError::missing_species("pSO4").is_configuration());
        assert!(AgError::topology("缺少反向邻居").is_topology());
        assert!(AgError::non_finite("Cf", f64::NAN).is_numerical());
        assert!(!AgError::invalid_input("x").is_numerical());
    }

    #[test]
    fn test_display() {
        let err = AgError::missing_population_column("TotalPop");
        assert!(err.to_string().contains("TotalPop"));
    }

    #[test]
    fn test_ensure_finite() {
        assert_eq!(ensure_finite(|| "a".into(), 1.5).unwrap(), 1.5);
        let err = ensure_finite(|| "total mass".into(), f64::INFINITY).unwrap_err();
        assert!(err.is_numerical());
        assert!(err.to_string().contains("total mass"));
    }
}
