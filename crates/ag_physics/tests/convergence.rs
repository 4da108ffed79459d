// crates/ag_physics/tests/convergence.rs

//! 运行循环与收敛测试
//! 固定迭代数精确停止，判据模式在有限步内停止、结果与线程数无关，
//! 并与记录的参考值一致

mod common;

use ag_foundation::error::AgError;
use ag_grid::{CellCoefficients, CellState, Geometry, NestedGridBuilder, UniformBackground};
use ag_physics::{
    AddEmissionsFlux, BuildGrid, Calculations, CellKernel, CflTimestep, CollectOutputter,
    ConvergenceStatus, Domain, EmisRecord, EmissionsSource, FnStage, KernelContext, LogStatus,
    MeanderMixing,
    Mechanism, Mixing, Output, RunPeriodically, SetEmissionsFlux, SetTimestepCfl, SimpleChem,
    Simulation, SteadyStateConvergenceCheck, UpwindAdvection,
};
use glam::DVec2;
use std::sync::mpsc::{channel, Receiver};
use std::sync::Arc;

const MAX_ITERATIONS: usize = 5000;

fn emissions() -> Arc<EmissionsSource> {
    let ground = EmisRecord::new(Geometry::Point(DVec2::new(1500.0, 1500.0)), 0.0).with_all(1e6);
    let stack = EmisRecord::new(Geometry::Point(DVec2::new(500.0, 2500.0)), 120.0).with_all(5e5);
    Arc::new(EmissionsSource::new(vec![ground, stack]).unwrap())
}

fn kernels(mech: &dyn Mechanism) -> Vec<Box<dyn CellKernel>> {
    vec![
        Box::new(UpwindAdvection::new()),
        Box::new(Mixing::new()),
        Box::new(MeanderMixing::new()),
        mech.dry_dep("simple").unwrap(),
        mech.wet_dep("emep").unwrap(),
        mech.chemistry(),
    ]
}

fn simulation(
    num_iterations: usize,
    workers: usize,
) -> (Simulation, Receiver<ConvergenceStatus>, CollectOutputter) {
    let config = common::config();
    let builder = common::builder(&config);
    let mech: Arc<dyn Mechanism> = Arc::new(SimpleChem::new());
    let rule = CflTimestep::new(2.0, 1e-3, 3600.0).unwrap();
    let (tx, rx) = channel();
    let sink = CollectOutputter::new();

    let sim = Simulation::new(mech.clone())
        .with_init(BuildGrid::new(builder))
        .with_init(SetEmissionsFlux::new(emissions()))
        .with_init(SetTimestepCfl::new(rule))
        .with_run(AddEmissionsFlux::new())
        .with_run(Calculations::new(kernels(mech.as_ref())).with_workers(workers))
        .with_run(RunPeriodically::new(3600.0, SetTimestepCfl::new(rule)).unwrap())
        .with_run(SteadyStateConvergenceCheck::new(num_iterations, "TotalPop").with_status(tx))
        .with_run(FnStage::new("iteration_guard", |d: &mut Domain| {
            if d.iteration > MAX_ITERATIONS {
                return Err(AgError::config("超出迭代上限"));
            }
            Ok(())
        }))
        .with_run(LogStatus::new())
        .with_cleanup(Output::new(sink.clone(), true, vec!["TotalPM25".into()]));
    (sim, rx, sink)
}

/// 静风场景：无水平输送，只有垂直对流、扩散、沉降与化学，各柱互不影响
fn still_air_simulation(workers: usize) -> (Simulation, Receiver<ConvergenceStatus>) {
    let config = common::config();
    let profile = (0..config.n_layers())
        .map(|k| CellCoefficients {
            u_avg: 0.0,
            v_avg: 0.0,
            w_avg: 0.0,
            u_deviation: 0.0,
            v_deviation: 0.0,
            kxxyy: 0.0,
            ..common::coefficients(k)
        })
        .collect();
    let background = UniformBackground::new(profile)
        .unwrap()
        .with_balanced_convection(&config.layer_heights);
    let builder = Arc::new(
        NestedGridBuilder::new(config, Arc::new(background), Arc::new(common::population())).unwrap(),
    );
    let mech: Arc<dyn Mechanism> = Arc::new(SimpleChem::new());
    let rule = CflTimestep::new(2.0, 1e-3, 3600.0).unwrap();
    let (tx, rx) = channel();

    let sim = Simulation::new(mech.clone())
        .with_init(BuildGrid::new(builder))
        .with_init(SetEmissionsFlux::new(emissions()))
        .with_init(SetTimestepCfl::new(rule))
        .with_run(AddEmissionsFlux::new())
        .with_run(Calculations::new(kernels(mech.as_ref())).with_workers(workers))
        .with_run(RunPeriodically::new(3600.0, SetTimestepCfl::new(rule)).unwrap())
        .with_run(SteadyStateConvergenceCheck::new(0, "TotalPop").with_status(tx));
    (sim, rx)
}

fn pop_weighted(sim: &Simulation, variable: &str) -> f64 {
    let grid = sim.grid().unwrap();
    let mech = sim.domain().mechanism();
    let pop = grid.pop_column_index("TotalPop").unwrap();
    grid.interior_cells()
        .map(|(_, c)| mech.value(c, variable).unwrap() * c.population_of(pop))
        .sum()
}

/// 固定迭代模式恰好执行指定次数
#[test]
fn test_fixed_iterations_stop_exactly() {
    let (mut sim, rx, sink) = simulation(7, 2);
    sim.execute().unwrap();
    assert_eq!(sim.domain().iteration, 7);
    assert!(sim.domain().done);
    // 固定模式不做判据检查
    assert!(rx.try_recv().is_err());
    assert_eq!(sink.len(), sim.grid().unwrap().n_interior());
}

/// 判据模式在有限步内达到稳态
#[test]
fn test_criterion_mode_terminates() {
    let (mut sim, rx, _) = simulation(0, 4);
    sim.execute().unwrap();
    let domain = sim.domain();
    assert!(domain.done);
    assert!(domain.iteration < MAX_ITERATIONS);

    let statuses: Vec<ConvergenceStatus> = rx.try_iter().collect();
    assert!(statuses.len() >= 2);
    // 第一次检查与零比较
    assert!(statuses[0].mass_delta.iter().any(|d| d.is_infinite()));
    let last = statuses.last().unwrap();
    assert!(last.converged);
    for (dm, dp) in last.mass_delta.iter().zip(&last.pop_delta) {
        assert!(dm.abs() <= 0.001 && dp.abs() <= 0.001);
    }
    assert!(pop_weighted(&sim, "TotalPM25") > 0.0);
}

/// 结果与工作线程数无关
#[test]
fn test_result_is_deterministic() {
    let (mut one, _, _) = simulation(0, 1);
    let (mut many, _, _) = simulation(0, 4);
    one.execute().unwrap();
    many.execute().unwrap();
    assert_eq!(one.domain().iteration, many.domain().iteration);
    assert_eq!(pop_weighted(&one, "TotalPM25"), pop_weighted(&many, "TotalPM25"));

    let vars = vec!["TotalPM25".to_string(), "pSO4".to_string()];
    assert_eq!(one.results(true, &vars).unwrap(), many.results(true, &vars).unwrap());
}

/// 静风场景的判据模式结果与记录的参考值一致
///
/// 第一层 kzz = 5 m²/s 限制时间步为 50²/(2·5)/2 = 125 s；每 10800 s 检查
/// 一次，第 9 次检查（第 783 次迭代）时全部相对差低于 1e-3。参考值是
/// 中心单元与烟囱所在单元两柱地面层 TotalPM25 的人口加权和。
#[test]
fn test_criterion_mode_matches_recorded_reference() {
    const REFERENCE: f64 = 971_836.447_802_192_8;

    let (mut sim, rx) = still_air_simulation(3);
    sim.execute().unwrap();
    assert_eq!(sim.domain().dt, 125.0);
    assert_eq!(sim.domain().iteration, 783);

    let statuses: Vec<ConvergenceStatus> = rx.try_iter().collect();
    assert_eq!(statuses.len(), 9);
    assert!(!statuses[7].converged);
    assert!(statuses[8].converged);

    let actual = pop_weighted(&sim, "TotalPM25");
    assert!(
        common::rel_err(actual, REFERENCE) < 1e-8,
        "人口加权 TotalPM25 = {actual}, 参考值 {REFERENCE}"
    );
}

/// 在第一层写入 NaN 的核函数
struct NanAloft;

impl CellKernel for NanAloft {
    fn name(&self) -> &str {
        "nan_aloft"
    }

    fn apply(&self, ctx: &KernelContext<'_>, state: &mut CellState, _dt: f64) {
        if ctx.cell.layer == 1 {
            state.cf[0] = f64::NAN;
        }
    }
}

/// 最后一步产生的非有限浓度终止运行，不会交给输出器
#[test]
fn test_non_finite_last_step_never_reaches_outputter() {
    let config = common::config();
    let mech: Arc<dyn Mechanism> = Arc::new(SimpleChem::new());
    let sink = CollectOutputter::new();
    let mut sim = Simulation::new(mech)
        .with_init(BuildGrid::new(common::builder(&config)))
        .with_run(FnStage::new("fixed_dt", |d: &mut Domain| {
            d.dt = 60.0;
            Ok(())
        }))
        .with_run(Calculations::new(vec![Box::new(NanAloft)]).with_workers(2))
        .with_run(SteadyStateConvergenceCheck::new(1, "TotalPop"))
        .with_cleanup(Output::new(sink.clone(), false, vec!["TotalPM25".into()]));

    let err = sim.execute().unwrap_err();
    assert!(err.is_numerical(), "{err}");
    assert_eq!(sim.domain().iteration, 0);
    assert!(sink.is_empty());
}

/// 没有运行阶段时报错
#[test]
fn test_run_without_stages_is_error() {
    let mut sim = Simulation::new(Arc::new(SimpleChem::new())).with_grid(common::grid(9));
    assert!(sim.run().unwrap_err().is_configuration());
}

/// 阶段错误立即终止运行
#[test]
fn test_stage_error_aborts_run() {
    let mut sim = Simulation::new(Arc::new(SimpleChem::new()))
        .with_grid(common::grid(9))
        .with_run(RunPeriodically::new(60.0, LogStatus::new()).unwrap());
    let err = sim.run().unwrap_err();
    assert!(matches!(err, AgError::ZeroTimestep));
    assert_eq!(sim.domain().iteration, 0);
}

/// 结果按变量、层、单元全序排列；点查询按公共边平均分摊
#[test]
fn test_results_and_point_query() {
    let (mut sim, _, _) = simulation(3, 2);
    sim.execute().unwrap();
    let vars = vec!["TotalPM25".to_string()];
    let ground = sim.results(false, &vars).unwrap();
    assert_eq!(ground["TotalPM25"].len(), 1);
    assert_eq!(ground["TotalPM25"][0].len(), 9);
    let all = sim.results(true, &vars).unwrap();
    assert_eq!(all["TotalPM25"].len(), 3);

    let inside = sim.cell_values(DVec2::new(1500.0, 1500.0), "TotalPM25").unwrap();
    assert_eq!(inside.len(), 1);
    assert_eq!(inside[0].fraction, 1.0);
    assert!(inside[0].value > 0.0);

    let corner = sim.cell_values(DVec2::new(1000.0, 1000.0), "TotalPM25").unwrap();
    assert_eq!(corner.len(), 4);
    assert!(corner.iter().all(|p| p.fraction == 0.25));

    assert!(sim.results(false, &["Ozone".to_string()]).is_err());
}
