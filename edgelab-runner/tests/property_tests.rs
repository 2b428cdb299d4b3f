//! Property tests for parameter spaces, grid enumeration and metric helpers.
//!
//! Uses proptest to verify:
//! 1. Sampled parameter sets always lie inside their space
//! 2. Grid search yields every combination exactly once
//! 3. Drawdowns are fractions in [0, 1]
//! 4. Percentiles are monotone in p and bounded by the data

use std::collections::HashSet;

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

use edgelab_runner::metrics::{drawdown_series, percentile_sorted};
use edgelab_runner::{GridSearch, ParamSpace, ParamSpec, SearchStrategy};

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_discrete(name: String) -> impl Strategy<Value = ParamSpec> {
    (-20i32..20, 1u32..6, 0u32..5).prop_map(move |(min, step, steps)| {
        let min = min as f64;
        let step = step as f64;
        ParamSpec::discrete(name.clone(), min, min + step * steps as f64, step)
    })
}

fn arb_grid_space() -> impl Strategy<Value = ParamSpace> {
    (1usize..4).prop_flat_map(|dims| {
        (0..dims)
            .map(|d| arb_discrete(format!("p{d}")))
            .collect::<Vec<_>>()
            .prop_map(ParamSpace::new)
    })
}

fn arb_mixed_space() -> impl Strategy<Value = ParamSpace> {
    (
        arb_discrete("n".into()),
        (-10.0..10.0_f64, 0.1..5.0_f64),
        (1e-4..1e-2_f64, 1.0..100.0_f64),
        prop::collection::btree_set(0i32..20, 1..5),
    )
        .prop_map(|(discrete, (low, width), (log_low, log_mult), choices)| {
            ParamSpace::new(vec![
                discrete,
                ParamSpec::continuous("x", low, low + width),
                ParamSpec::log_uniform("lr", log_low, log_low * log_mult),
                ParamSpec::choice("c", choices.into_iter().map(f64::from).collect()),
            ])
        })
}

// ── Properties ───────────────────────────────────────────────────────

proptest! {
    #[test]
    fn samples_stay_in_space(space in arb_mixed_space(), seed in any::<u64>()) {
        prop_assert!(space.validate().is_ok());
        let mut rng = StdRng::seed_from_u64(seed);
        for _ in 0..32 {
            let set = space.sample(&mut rng);
            prop_assert!(space.contains(&set), "{} outside space", set);
        }
    }

    #[test]
    fn grid_is_exact_cover(space in arb_grid_space()) {
        let expected = space.grid_size().unwrap();
        let mut grid = GridSearch::new(space.clone(), None).unwrap();
        let mut keys = HashSet::new();
        while let Some(set) = grid.propose_next(&[]) {
            prop_assert!(space.contains(&set));
            prop_assert!(keys.insert(set.key()));
        }
        prop_assert_eq!(keys.len(), expected);
    }

    #[test]
    fn drawdowns_are_fractions(equity in prop::collection::vec(1.0..1e6_f64, 1..200)) {
        let dd = drawdown_series(&equity);
        prop_assert_eq!(dd.len(), equity.len());
        prop_assert_eq!(dd[0], 0.0);
        for d in dd {
            prop_assert!((0.0..=1.0).contains(&d));
        }
    }

    #[test]
    fn percentiles_are_monotone(
        mut values in prop::collection::vec(-1e3..1e3_f64, 1..100),
        a in 0.0..100.0_f64,
        b in 0.0..100.0_f64,
    ) {
        values.sort_by(f64::total_cmp);
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let (p_lo, p_hi) = (percentile_sorted(&values, lo), percentile_sorted(&values, hi));
        prop_assert!(p_lo <= p_hi + 1e-9);
        prop_assert!(p_lo >= values[0] - 1e-9);
        prop_assert!(p_hi <= values[values.len() - 1] + 1e-9);
    }
}
