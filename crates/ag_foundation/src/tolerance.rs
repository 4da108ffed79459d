// crates/ag_foundation/src/tolerance.rs

//! 数值容差常量与比较工具

/// 覆盖率之和的容差
pub const COVER_FRAC_TOL: f64 = 1e-10;

/// 反向邻居记录（扩散系数、中心距）的一致性容差
pub const RECIPROCITY_TOL: f64 = 1e-8;

/// 几何重叠判断的长度容差 [m]
pub const GEOMETRY_EPS: f64 = 1e-6;

/// 绝对容差比较
#[inline]
pub fn approx_eq(a: f64, b: f64, tol: f64) -> bool {
    (a - b).abs() <= tol
}

/// 相对差 `(new - old) / old`
///
/// 两者都为零时返回 0；旧值为零而新值非零时返回 ±∞。
#[inline]
pub fn relative_difference(new: f64, old: f64) -> f64 {
    if new == old {
        0.0
    } else {
        (new - old) / old
    }
}

/// 调和平均 `2ab/(a+b)`，两者之和为零时返回 0
#[inline]
pub fn harmonic_mean(a: f64, b: f64) -> f64 {
    let s = a + b;
    if s == 0.0 {
        0.0
    } else {
        2.0 * a * b / s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_difference() {
        assert_eq!(relative_difference(0.0, 0.0), 0.0);
        assert!(relative_difference(1.0, 0.0).is_infinite());
        assert!(approx_eq(relative_difference(1.01, 1.0), 0.01, 1e-12));
    }

    #[test]
    fn test_harmonic_mean_symmetric() {
        assert_eq!(harmonic_mean(2.0, 6.0), harmonic_mean(6.0, 2.0));
        assert!(approx_eq(harmonic_mean(2.0, 6.0), 3.0, 1e-12));
        assert_eq!(harmonic_mean(0.0, 0.0), 0.0);
    }
}
