// crates/ag_physics/src/mechanism/simple_chem.rs

//! 简化化学机制
//!
//! 九个模型物种：有机物、铵、硫、硝酸盐各分气相与颗粒相，加一次 PM2.5。
//! 氮、硫按元素质量计，输出时换算回分子质量。
//!
//! 化学过程：
//! 1. SO2 一阶氧化为硫酸盐，`ΔS = k·Ci[gS]·Δt`，不超过当前气相硫
//! 2. 有机物、铵、硝酸盐按背景分配系数在气/颗粒相间瞬时重分配

use crate::kernels::{
    CellKernel, DryDepGroup, DryDeposition, KernelContext, WetDepGroup, WetDeposition,
};
use crate::mechanism::Mechanism;
use ag_foundation::error::{AgError, AgResult};
use ag_grid::{Cell, CellState};

// ============================================================================
// 物种与换算
// ============================================================================

/// 气相有机物
pub const G_ORG: usize = 0;
/// 颗粒相有机物
pub const P_ORG: usize = 1;
/// 一次 PM2.5
pub const PM2_5: usize = 2;
/// 气相铵（以 N 计）
pub const G_NH: usize = 3;
/// 颗粒相铵（以 N 计）
pub const P_NH: usize = 4;
/// 气相硫（以 S 计）
pub const G_S: usize = 5;
/// 颗粒相硫（以 S 计）
pub const P_S: usize = 6;
/// 气相硝酸盐（以 N 计）
pub const G_NO: usize = 7;
/// 颗粒相硝酸盐（以 N 计）
pub const P_NO: usize = 8;

const N_SPECIES: usize = 9;

/// 摩尔质量 [g/mol]
pub mod molar_mass {
    /// NOx（以 NO2 计）
    pub const NOX: f64 = 46.0055;
    /// N
    pub const N: f64 = 14.0067;
    /// NO3
    pub const NO3: f64 = 62.00501;
    /// NH3
    pub const NH3: f64 = 17.03056;
    /// NH4
    pub const NH4: f64 = 18.03851;
    /// S
    pub const S: f64 = 32.0655;
    /// SO2
    pub const SO2: f64 = 64.0644;
    /// SO4
    pub const SO4: f64 = 96.0632;
}

/// NOx → N
pub const NOX_TO_N: f64 = molar_mass::N / molar_mass::NOX;
/// N → NO3
pub const N_TO_NO3: f64 = molar_mass::NO3 / molar_mass::N;
/// SOx → S
pub const SOX_TO_S: f64 = molar_mass::S / molar_mass::SO2;
/// S → SO4
pub const S_TO_SO4: f64 = molar_mass::SO4 / molar_mass::S;
/// NH3 → N
pub const NH3_TO_N: f64 = molar_mass::N / molar_mass::NH3;
/// N → NH4
pub const N_TO_NH4: f64 = molar_mass::NH4 / molar_mass::N;

/// 排放物种：(名称, 模型物种, 换算系数)
const EMISSIONS: [(&str, usize, f64); 5] = [
    ("VOC", G_ORG, 1.0),
    ("NOx", G_NO, NOX_TO_N),
    ("NH3", G_NH, NH3_TO_N),
    ("SOx", G_S, SOX_TO_S),
    ("PM2_5", PM2_5, 1.0),
];

/// 排放输出变量：(名称, 模型物种)
const EMISSION_OUTPUTS: [(&str, usize); 5] = [
    ("VOCEmissions", G_ORG),
    ("NOxEmissions", G_NO),
    ("NH3Emissions", G_NH),
    ("SOxEmissions", G_S),
    ("PM25Emissions", PM2_5),
];

/// 浓度输出变量：(名称, [(模型物种, 换算系数)])
const OUTPUTS: [(&str, &[(usize, f64)]); 10] = [
    (
        "TotalPM25",
        &[
            (PM2_5, 1.0),
            (P_ORG, 1.0),
            (P_NH, N_TO_NH4),
            (P_S, S_TO_SO4),
            (P_NO, N_TO_NO3),
        ],
    ),
    ("VOC", &[(G_ORG, 1.0)]),
    ("SOA", &[(P_ORG, 1.0)]),
    ("PrimaryPM25", &[(PM2_5, 1.0)]),
    ("NH3", &[(G_NH, 1.0 / NH3_TO_N)]),
    ("pNH4", &[(P_NH, N_TO_NH4)]),
    ("SOx", &[(G_S, 1.0 / SOX_TO_S)]),
    ("pSO4", &[(P_S, S_TO_SO4)]),
    ("NOx", &[(G_NO, 1.0 / NOX_TO_N)]),
    ("pNO3", &[(P_NO, N_TO_NO3)]),
];

fn output_terms(variable: &str) -> Option<&'static [(usize, f64)]> {
    OUTPUTS
        .iter()
        .find(|(n, _)| *n == variable)
        .map(|(_, terms)| *terms)
}

const SPECIES: [&str; 9] = [
    "VOC",
    "SOA",
    "PrimaryPM25",
    "NH3",
    "pNH4",
    "SOx",
    "pSO4",
    "NOx",
    "pNO3",
];

const PARTICLES: [usize; 5] = [P_ORG, PM2_5, P_NH, P_S, P_NO];

// ============================================================================
// 机制
// ============================================================================

/// 简化化学机制
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleChem;

impl SimpleChem {
    /// 创建
    pub fn new() -> Self {
        Self
    }
}

impl Mechanism for SimpleChem {
    fn name(&self) -> &str {
        "simple_chem"
    }

    fn len(&self) -> usize {
        N_SPECIES
    }

    fn species(&self) -> Vec<&'static str> {
        SPECIES.to_vec()
    }

    fn add_emis_flux(&self, cell: &mut Cell, name: &str, value: f64) -> AgResult<()> {
        let (_, index, factor) = EMISSIONS
            .iter()
            .find(|(n, _, _)| *n == name)
            .ok_or_else(|| AgError::missing_species(name))?;
        if cell.emis_flux.len() != N_SPECIES {
            return Err(AgError::invalid_input(format!(
                "单元排放向量长度 {} 与机制物种数 {N_SPECIES} 不符",
                cell.emis_flux.len()
            )));
        }
        let scale = 1.0 / (cell.dx() * cell.dy() * cell.dz);
        cell.emis_flux[*index] += value * factor * scale;
        Ok(())
    }

    fn dry_dep(&self, option: &str) -> AgResult<Box<dyn CellKernel>> {
        match option {
            "simple" => Ok(Box::new(DryDeposition::new(vec![
                (DryDepGroup::SOx, vec![G_S]),
                (DryDepGroup::NH3, vec![G_NH]),
                (DryDepGroup::NOx, vec![G_NO]),
                (DryDepGroup::VOC, vec![G_ORG]),
                (DryDepGroup::Particle, PARTICLES.to_vec()),
            ]))),
            other => Err(AgError::config(format!("未知的干沉降方案: {other}"))),
        }
    }

    fn wet_dep(&self, option: &str) -> AgResult<Box<dyn CellKernel>> {
        match option {
            "emep" => Ok(Box::new(WetDeposition::new(vec![
                (WetDepGroup::SO2, vec![G_S]),
                (WetDepGroup::OtherGas, vec![G_NH, G_NO, G_ORG]),
                (WetDepGroup::Particle, PARTICLES.to_vec()),
            ]))),
            other => Err(AgError::config(format!("未知的湿沉降方案: {other}"))),
        }
    }

    fn chemistry(&self) -> Box<dyn CellKernel> {
        Box::new(SimpleChemistry)
    }

    fn value(&self, cell: &Cell, variable: &str) -> AgResult<f64> {
        if let Some((_, index)) = EMISSION_OUTPUTS.iter().find(|(n, _)| *n == variable) {
            let (_, _, factor) = EMISSIONS
                .iter()
                .find(|(_, i, _)| i == index)
                .ok_or_else(|| AgError::missing_species(variable))?;
            return Ok(cell.emis_flux.get(*index).copied().unwrap_or(0.0) / factor);
        }
        let terms = output_terms(variable).ok_or_else(|| AgError::missing_species(variable))?;
        let state = cell.lock();
        Ok(terms
            .iter()
            .map(|(i, f)| state.cf.get(*i).copied().unwrap_or(0.0) * f)
            .sum())
    }

    fn units(&self, variable: &str) -> AgResult<&'static str> {
        if EMISSION_OUTPUTS.iter().any(|(n, _)| *n == variable) {
            Ok("μg/m³/s")
        } else if output_terms(variable).is_some() {
            Ok("μg/m³")
        } else {
            Err(AgError::missing_species(variable))
        }
    }
}

// ============================================================================
// 化学核函数
// ============================================================================

/// SO2 氧化与气/颗粒相分配
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleChemistry;

/// 按颗粒相比例重分配一对气/颗粒相物种
#[inline]
fn partition(cf: &mut [f64], gas: usize, particle: usize, frac: f64) {
    let total = cf[gas] + cf[particle];
    cf[particle] = total * frac;
    cf[gas] = total * (1.0 - frac);
}

impl CellKernel for SimpleChemistry {
    fn name(&self) -> &str {
        "simple_chemistry"
    }

    fn apply(&self, ctx: &KernelContext<'_>, state: &mut CellState, dt: f64) {
        let c = ctx.cell;
        let k = &c.coeffs;
        let cf = &mut state.cf;

        let ds = (k.so2_oxidation * c.ci[G_S] * dt).min(cf[G_S].max(0.0));
        cf[G_S] -= ds;
        cf[P_S] += ds;

        partition(cf, G_NH, P_NH, k.nh_partitioning);
        partition(cf, G_NO, P_NO, k.no_partitioning);
        partition(cf, G_ORG, P_ORG, k.aorg_partitioning);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ag_grid::{CellCoefficients, Rect};

    fn cell() -> Cell {
        Cell::new(Rect::new(0.0, 0.0, 1000.0, 1000.0), 0, 0.0, 50.0, N_SPECIES)
    }

    #[test]
    fn test_emission_conversion() {
        let m = SimpleChem::new();
        let mut c = cell();
        m.add_emis_flux(&mut c, "SOx", 1.0).unwrap();
        let v = 1000.0 * 1000.0 * 50.0;
        assert!((c.emis_flux[G_S] - SOX_TO_S / v).abs() < 1e-20);
        assert!((m.value(&c, "SOxEmissions").unwrap() - 1.0 / v).abs() < 1e-20);
        assert!(m.add_emis_flux(&mut c, "CO", 1.0).unwrap_err().is_configuration());
    }

    #[test]
    fn test_total_pm25_value() {
        let m = SimpleChem::new();
        let mut c = cell();
        let mut conc = vec![0.0; N_SPECIES];
        conc[PM2_5] = 1.0;
        conc[P_S] = 1.0;
        c.set_concentration(&conc);
        let total = m.value(&c, "TotalPM25").unwrap();
        assert!((total - (1.0 + S_TO_SO4)).abs() < 1e-12);
        assert_eq!(m.units("TotalPM25").unwrap(), "μg/m³");
        assert_eq!(m.units("PM25Emissions").unwrap(), "μg/m³/s");
        assert!(m.value(&c, "Ozone").is_err());
    }

    #[test]
    fn test_unknown_deposition_option() {
        let m = SimpleChem::new();
        assert!(m.dry_dep("simple").is_ok());
        assert!(m.wet_dep("emep").is_ok());
        assert!(m.dry_dep("wesely").unwrap_err().is_configuration());
        assert!(m.wet_dep("none").is_err());
    }

    #[test]
    fn test_partition_conserves_pair() {
        let mut cf = vec![0.0; N_SPECIES];
        cf[G_NH] = 3.0;
        cf[P_NH] = 1.0;
        partition(&mut cf, G_NH, P_NH, 0.25);
        assert!((cf[G_NH] + cf[P_NH] - 4.0).abs() < 1e-15);
        assert!((cf[P_NH] - 1.0).abs() < 1e-15);
    }

    #[test]
    fn test_sulfur_oxidation_clamped() {
        let layers = ag_grid::LayerStack::from_thickness(&[50.0]).unwrap();
        let mut grid = ag_grid::Grid::new(Rect::new(0.0, 0.0, 1000.0, 1000.0), layers, N_SPECIES, vec![]);
        let mut c = cell().with_coefficients(CellCoefficients {
            so2_oxidation: 1.0,
            ..Default::default()
        });
        let mut conc = vec![0.0; N_SPECIES];
        conc[G_S] = 2.0;
        c.set_concentration(&conc);
        let id = grid.insert_cell(c).unwrap();
        grid.link_all().unwrap();

        let cell = grid.cell(id).unwrap();
        SimpleChemistry.apply(&KernelContext::new(&grid, id, cell), &mut cell.lock(), 10.0);
        let cf = cell.cf();
        assert_eq!(cf[G_S], 0.0);
        assert_eq!(cf[P_S], 2.0);
    }
}
