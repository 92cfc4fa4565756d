use approx::assert_relative_eq;
use proptest::prelude::*;
use ys_stats::GammaParams;

proptest! {
    #[test]
    fn addition_sums_yields_and_hypots_uncertainties(
        n1 in 0.1f64..1e4,
        w1 in 0.01f64..100.0,
        n2 in 0.1f64..1e4,
        w2 in 0.01f64..100.0,
    ) {
        let a = GammaParams::new(n1, w1);
        let b = GammaParams::new(n2, w2);
        let sum = a + b;
        assert_relative_eq!(
            sum.yield_value(),
            a.yield_value() + b.yield_value(),
            max_relative = 1e-9
        );
        assert_relative_eq!(
            sum.uncertainty(),
            a.uncertainty().hypot(b.uncertainty()),
            max_relative = 1e-9
        );
    }

    #[test]
    fn zero_count_addition_hypots_weights(w1 in 0.0f64..100.0, w2 in 0.0f64..100.0) {
        let sum = GammaParams::new(0.0, w1) + GammaParams::new(0.0, w2);
        prop_assert_eq!(sum.n_effective(), 0.0);
        assert_relative_eq!(sum.weight(), w1.hypot(w2), max_relative = 1e-12);
    }

    #[test]
    fn back_solve_preserves_yield_and_uncertainty(y in 1e-3f64..1e6, rel in 1e-4f64..10.0) {
        let u = y * rel;
        let g = GammaParams::from_yield_and_uncertainty(y, u);
        assert_relative_eq!(g.yield_value(), y, max_relative = 1e-9);
        assert_relative_eq!(g.uncertainty(), u, max_relative = 1e-9);
    }

    #[test]
    fn scaling_is_linear(n in 0.0f64..1e4, w in 0.0f64..100.0, k in 0.0f64..10.0) {
        let g = GammaParams::new(n, w);
        let scaled = g * k;
        prop_assert_eq!(scaled.n_effective(), n);
        assert_relative_eq!(scaled.yield_value(), g.yield_value() * k, max_relative = 1e-12);
    }
}

#[test]
fn accumulating_unit_weight_events_counts_them() {
    let total: GammaParams = (0..100).map(|_| GammaParams::new(1.0, 1.0)).sum();
    assert_relative_eq!(total.yield_value(), 100.0, max_relative = 1e-9);
    assert_relative_eq!(total.uncertainty(), 10.0, max_relative = 1e-9);
    assert_relative_eq!(total.n_effective(), 100.0, max_relative = 1e-9);
}
