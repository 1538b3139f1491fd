//! Property-based tests for lightmill-core
//!
//! - Test ordering and completion invariants
//! - Test the factor override chain
//! - Run with ProptestConfig::with_cases(100)

use chrono::Utc;
use lightmill_core::completion::{check_completable, complete_trial, CompletionRecord};
use lightmill_core::experiment::{Block, Experiment, Factor, Run, Trial, TrialPosition};
use lightmill_core::resolve::{resolve_factor_values, ResolvedFactor, ValueSource};
use lightmill_core::Error;
use proptest::prelude::*;

// ============================================================================
// Property Test Generators (Strategies)
// ============================================================================

/// Generate a run shape: one entry per block, `(practice, trial count)`
fn arb_run_shape() -> impl Strategy<Value = Vec<(bool, usize)>> {
    proptest::collection::vec((any::<bool>(), 0usize..5), 0..6)
}

fn build_run(shape: &[(bool, usize)]) -> Run {
    let mut run = Run::new("S0");
    for (practice, trials) in shape {
        let block = run.push_block(*practice);
        for _ in 0..*trials {
            block.push_trial();
        }
    }
    run
}

fn complete_next(run: &mut Run) -> Option<TrialPosition> {
    let position = run.current_trial()?;
    complete_trial(run, position, CompletionRecord::default(), Utc::now()).ok()?;
    Some(position)
}

/// Optional value index for one override layer
fn arb_layer() -> impl Strategy<Value = Option<usize>> {
    proptest::option::of(0usize..3)
}

const VALUES: [&str; 3] = ["a", "b", "c"];

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: current trial is None iff the run is completed
    #[test]
    fn prop_current_none_iff_completed(shape in arb_run_shape(), steps in 0usize..25) {
        let mut run = build_run(&shape);
        for _ in 0..steps {
            if complete_next(&mut run).is_none() {
                break;
            }
        }
        prop_assert_eq!(run.current_trial().is_none(), run.completed());
    }

    /// Property: sequential completion visits every trial once, in total order
    #[test]
    fn prop_sequential_completion_follows_total_order(shape in arb_run_shape()) {
        let mut run = build_run(&shape);
        let expected: Vec<TrialPosition> = run.trials().map(|(p, _)| p).collect();
        let mut visited = Vec::new();
        while let Some(position) = complete_next(&mut run) {
            visited.push(position);
        }
        prop_assert_eq!(visited, expected);
        prop_assert!(run.completed());
    }

    /// Property: only the current trial is completable
    #[test]
    fn prop_only_current_trial_completable(shape in arb_run_shape(), steps in 0usize..10) {
        let mut run = build_run(&shape);
        for _ in 0..steps {
            complete_next(&mut run);
        }
        let current = run.current_trial();
        let positions: Vec<TrialPosition> = run.trials().map(|(p, _)| p).collect();
        for position in positions {
            let result = check_completable(&run, position);
            if Some(position) == current {
                prop_assert!(result.is_ok());
            } else {
                prop_assert!(matches!(result, Err(Error::ExperimentProgress(_))));
            }
        }
    }

    /// Property: a second completion fails and keeps the first date
    #[test]
    fn prop_double_completion_refused(shape in arb_run_shape(), steps in 1usize..10) {
        let mut run = build_run(&shape);
        let mut last = None;
        for _ in 0..steps {
            if let Some(position) = complete_next(&mut run) {
                last = Some(position);
            }
        }
        if let Some(position) = last {
            let before = run.trial(position).and_then(Trial::completion_date);
            let result = complete_trial(&mut run, position, CompletionRecord::default(), Utc::now());
            prop_assert!(matches!(result, Err(Error::ExperimentProgress(_))));
            prop_assert_eq!(run.trial(position).and_then(Trial::completion_date), before);
        }
    }

    /// Property: next and previous are inverse across block boundaries
    #[test]
    fn prop_next_previous_inverse(shape in arb_run_shape()) {
        let run = build_run(&shape);
        let positions: Vec<TrialPosition> = run.trials().map(|(p, _)| p).collect();
        for pair in positions.windows(2) {
            prop_assert_eq!(run.next_trial(pair[0]), Some(pair[1]));
            prop_assert_eq!(run.previous_trial(pair[1]), Some(pair[0]));
        }
        if let (Some(first), Some(last)) = (positions.first(), positions.last()) {
            prop_assert_eq!(run.previous_trial(*first), None);
            prop_assert_eq!(run.next_trial(*last), None);
        }
    }

    /// Property: measured block numbers count non-practice blocks densely
    #[test]
    fn prop_measured_block_numbers_dense(shape in arb_run_shape()) {
        let run = build_run(&shape);
        let measured: Vec<u32> = run
            .blocks()
            .filter_map(|block| run.measured_block_number(block.number()))
            .collect();
        let expected: Vec<u32> = (0..).take(measured.len()).collect();
        prop_assert_eq!(measured, expected);
        for block in run.blocks().filter(|b| b.is_practice()) {
            prop_assert_eq!(run.measured_block_number(block.number()), None);
        }
    }

    /// Property: trial override wins over block override wins over default
    #[test]
    fn prop_override_chain(default in arb_layer(), block_layer in arb_layer(), trial_layer in arb_layer()) {
        let mut factor = Factor::builder("f", "String");
        for value in VALUES {
            factor = factor.value(value);
        }
        if let Some(i) = default {
            factor = factor.default_value(VALUES[i]);
        }
        let mut block = Block::new(0);
        if let Some(i) = block_layer {
            block.set_factor_value("f", VALUES[i]);
        }
        let mut trial = Trial::new(0);
        if let Some(i) = trial_layer {
            trial.set_factor_value("f", VALUES[i]);
        }
        let experiment = Experiment::builder("E1", "Chain")
            .factor(factor.build().unwrap())
            .build()
            .unwrap();

        let resolution = resolve_factor_values(&experiment, &block, &trial);
        let expected = trial_layer
            .map(|i| (i, ValueSource::Trial))
            .or_else(|| block_layer.map(|i| (i, ValueSource::Block)))
            .or_else(|| default.map(|i| (i, ValueSource::Default)));
        match expected {
            Some((i, source)) => {
                prop_assert_eq!(resolution.get("f"), ResolvedFactor::Value(VALUES[i]));
                prop_assert_eq!(resolution.source("f"), Some(source));
            }
            None => {
                prop_assert_eq!(resolution.get("f"), ResolvedFactor::Missing);
                prop_assert_eq!(resolution.missing(), &["f".to_string()][..]);
            }
        }
    }
}
