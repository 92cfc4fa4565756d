use approx::assert_relative_eq;
use ys_stats::{GammaParams, Observable, ToyConfig, ToyMode, calc_kappa};

fn single(n: f64, w: f64, power: f64) -> Observable {
    Observable::new(vec![GammaParams::new(n, w)], power)
}

fn run_in_pool<T: Send>(threads: usize, f: impl FnOnce() -> T + Send) -> T {
    rayon::ThreadPoolBuilder::new().num_threads(threads).build().unwrap().install(f)
}

#[test]
fn toys_do_not_depend_on_thread_count() {
    let observables = [single(40.0, 0.5, 1.0), single(12.0, 2.0, -1.0), single(7.0, 1.0, 1.0)];
    let cfg = ToyConfig { n_toys: 2_000, seed: 99, ..ToyConfig::default() };
    let one = run_in_pool(1, || calc_kappa(&observables, &cfg).unwrap());
    let four = run_in_pool(4, || calc_kappa(&observables, &cfg).unwrap());
    assert_eq!(one, four);
}

#[test]
fn exact_yields_reproduce_the_deterministic_ratio() {
    let observables = [
        Observable::new(vec![GammaParams::from_yield_and_uncertainty(10.0, 0.0)], 1.0),
        Observable::new(vec![GammaParams::from_yield_and_uncertainty(5.0, 0.0)], -1.0),
    ];
    let k = calc_kappa(&observables, &ToyConfig { n_toys: 500, ..ToyConfig::default() }).unwrap();
    assert_eq!(k.value, 2.0);
    assert_eq!(k.n_discarded, 0);
    assert_relative_eq!(k.median, 2.0, max_relative = 1e-9);
    assert!(k.down < 1e-9 && k.up < 1e-9, "down={} up={}", k.down, k.up);
}

#[test]
fn interval_matches_poisson_width_for_large_counts() {
    let cfg = ToyConfig { n_toys: 20_000, ..ToyConfig::default() };
    let k = calc_kappa(&[single(10_000.0, 1.0, 1.0)], &cfg).unwrap();
    assert_eq!(k.value, 10_000.0);
    assert_eq!(k.n_discarded, 0);
    assert_relative_eq!(k.down, 100.0, max_relative = 0.15);
    assert_relative_eq!(k.up, 100.0, max_relative = 0.15);
    assert_relative_eq!(k.mean, 10_001.0, max_relative = 1e-3);
}

#[test]
fn systematic_widens_interval() {
    let observables = [single(1e6, 1e-3, 1.0)];
    let base = ToyConfig { n_toys: 5_000, ..ToyConfig::default() };
    let plain = calc_kappa(&observables, &base).unwrap();
    let syst = calc_kappa(&observables, &ToyConfig { systematic: Some(0.2), ..base }).unwrap();
    assert!(syst.up + syst.down > 10.0 * (plain.up + plain.down));
}

#[test]
fn data_mode_fluctuates_observed_total() {
    // In data mode the weights do not matter, only the summed yield.
    let observables = [Observable::new(
        vec![GammaParams::new(50.0, 2.0), GammaParams::new(100.0, 0.0)],
        1.0,
    )];
    let cfg = ToyConfig { n_toys: 10_000, mode: ToyMode::Data, ..ToyConfig::default() };
    let k = calc_kappa(&observables, &cfg).unwrap();
    assert_eq!(k.value, 100.0);
    assert_relative_eq!(k.mean, 101.0, max_relative = 0.02);
    assert_relative_eq!(k.up + k.down, 2.0 * 101f64.sqrt(), max_relative = 0.15);
}
