//! Dry-run simulation over the topological core
//!
//! [`simulate_cycle`] clones the caller's state, runs the topological policy
//! core on the clone, and returns the result without touching the original.
//! [`simulate_plan`] chains cycles and fails fast on density or band
//! violations, reporting the failing cycle and reason. Generators use this
//! to validate multi-cycle plans before committing to them.

use std::path::Path;

use crate::canonical::CanonError;
use crate::cycle::{self, CycleInputs, CycleOutput};
use crate::overlay::EffectiveFrame;
use crate::state::InternalState;
use crate::treaty::{effective_density, DensityMetrics, TreatyRevalidationEvent};

/// Output of one simulated cycle.
#[derive(Clone, Debug)]
pub struct SimCycleOutput {
    pub next_state: InternalState,
    pub output: CycleOutput,
    pub revalidation_events: Vec<TreatyRevalidationEvent>,
    pub density: DensityMetrics,
    pub active_treaty_count: usize,
}

/// Simulate a single cycle on a clone of `state`. The caller's state is
/// never modified.
pub fn simulate_cycle(
    state: &InternalState,
    inputs: &CycleInputs,
    frame: &EffectiveFrame<'_>,
    repo_root: &Path,
) -> Result<SimCycleOutput, CanonError> {
    let state_copy = state.clone();
    let (next_state, output) = cycle::evaluate(inputs, frame, state_copy, repo_root)?;

    let active = next_state.treaty_set.active_grants(next_state.cycle_index);
    let density = effective_density(
        &frame.constitution.action_permissions(),
        &active,
        frame.constitution.action_types().len() as u64,
    );
    let active_treaty_count = active.len();
    drop(active);

    Ok(SimCycleOutput {
        revalidation_events: output.revalidation_events.clone(),
        density,
        active_treaty_count,
        next_state,
        output,
    })
}

/// Output of a whole-plan simulation.
#[derive(Clone, Debug)]
pub struct SimPlanOutput {
    pub cycle_outputs: Vec<SimCycleOutput>,
    pub final_state: InternalState,
    pub feasible: bool,
    pub failure_cycle: Option<usize>,
    pub failure_reason: String,
    pub density_series: Vec<f64>,
    pub active_treaty_count_series: Vec<usize>,
}

/// Simulate an N-cycle plan, failing fast on the first density-bound or
/// band violation.
pub fn simulate_plan(
    initial_state: &InternalState,
    cycle_plans: &[CycleInputs],
    frame: &EffectiveFrame<'_>,
    repo_root: &Path,
    density_upper_bound: Option<f64>,
    target_density_band: Option<(f64, f64)>,
) -> Result<SimPlanOutput, CanonError> {
    let mut outputs: Vec<SimCycleOutput> = Vec::with_capacity(cycle_plans.len());
    let mut density_series = Vec::with_capacity(cycle_plans.len());
    let mut treaty_count_series = Vec::with_capacity(cycle_plans.len());
    let mut current_state = initial_state.clone();

    for (cycle_idx, plan) in cycle_plans.iter().enumerate() {
        let sim = simulate_cycle(&current_state, plan, frame, repo_root)?;
        density_series.push(sim.density.density);
        treaty_count_series.push(sim.active_treaty_count);

        if let Some(bound) = density_upper_bound {
            if sim.density.density >= bound {
                let final_state = sim.next_state.clone();
                let failure_reason =
                    format!("density {:.6} >= bound {bound}", sim.density.density);
                outputs.push(sim);
                return Ok(SimPlanOutput {
                    cycle_outputs: outputs,
                    final_state,
                    feasible: false,
                    failure_cycle: Some(cycle_idx),
                    failure_reason,
                    density_series,
                    active_treaty_count_series: treaty_count_series,
                });
            }
        }

        if let Some((low, high)) = target_density_band {
            if sim.density.density < low || sim.density.density >= high {
                let final_state = sim.next_state.clone();
                let failure_reason = format!(
                    "density {:.6} outside band [{low:.6}, {high:.6})",
                    sim.density.density
                );
                outputs.push(sim);
                return Ok(SimPlanOutput {
                    cycle_outputs: outputs,
                    final_state,
                    feasible: false,
                    failure_cycle: Some(cycle_idx),
                    failure_reason,
                    density_series,
                    active_treaty_count_series: treaty_count_series,
                });
            }
        }

        current_state = sim.next_state.advance(sim.output.decision());
        outputs.push(sim);
    }

    Ok(SimPlanOutput {
        cycle_outputs: outputs,
        final_state: current_state,
        feasible: true,
        failure_cycle: None,
        failure_reason: String::new(),
        density_series,
        active_treaty_count_series: treaty_count_series,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[test]
    fn simulation_never_mutates_the_callers_state() {
        let c = fixtures::constitution();
        let ov = fixtures::overlay();
        let frame = EffectiveFrame::new(&c, Some(&ov));
        let state = fixtures::sovereign_state(&c, 0);
        let before = state.to_value();

        let mut inputs = CycleInputs {
            observations: vec![fixtures::timestamp_observation()],
            ..CycleInputs::default()
        };
        inputs.treaty_grant_candidates = vec![fixtures::notify_grant(&c, 1, 5)];

        let sim = simulate_cycle(&state, &inputs, &frame, Path::new("/repo")).unwrap();
        assert_eq!(state.to_value(), before);
        assert_eq!(sim.next_state.treaty_set.grants.len(), 1);
        assert_eq!(sim.active_treaty_count, 1);
    }

    #[test]
    fn simulated_next_state_matches_a_direct_run() {
        let c = fixtures::constitution();
        let ov = fixtures::overlay();
        let frame = EffectiveFrame::new(&c, Some(&ov));
        let state = fixtures::sovereign_state(&c, 0);
        let inputs = CycleInputs {
            observations: vec![fixtures::timestamp_observation()],
            treaty_grant_candidates: vec![fixtures::notify_grant(&c, 1, 5)],
            ..CycleInputs::default()
        };

        let sim = simulate_cycle(&state, &inputs, &frame, Path::new("/repo")).unwrap();
        let (direct_state, _) =
            crate::cycle::evaluate(&inputs, &frame, state.clone(), Path::new("/repo")).unwrap();
        assert_eq!(sim.next_state.to_value(), direct_state.to_value());
    }

    #[test]
    fn plan_simulation_fails_fast_on_band_violation() {
        let c = fixtures::constitution();
        let ov = fixtures::overlay();
        let frame = EffectiveFrame::new(&c, Some(&ov));
        let state = fixtures::sovereign_state(&c, 0);

        let quiet = CycleInputs {
            observations: vec![fixtures::timestamp_observation()],
            ..CycleInputs::default()
        };
        let granting = CycleInputs {
            observations: vec![fixtures::timestamp_observation()],
            treaty_grant_candidates: vec![fixtures::notify_grant(&c, 1, 5)],
            ..CycleInputs::default()
        };

        // One grant lands density at 5/15 ≈ 0.333, below the 0.35 floor.
        let plan = vec![granting, quiet];
        let out = simulate_plan(
            &state,
            &plan,
            &frame,
            Path::new("/repo"),
            None,
            Some((0.35, 0.5)),
        )
        .unwrap();
        assert!(!out.feasible);
        assert_eq!(out.failure_cycle, Some(0));
        assert!(out.failure_reason.contains("band"));
        assert_eq!(out.density_series.len(), out.cycle_outputs.len());
        assert_eq!(out.cycle_outputs.len(), 1);
    }

    #[test]
    fn feasible_plan_reports_series_for_every_cycle() {
        let c = fixtures::constitution();
        let ov = fixtures::overlay();
        let frame = EffectiveFrame::new(&c, Some(&ov));
        let state = fixtures::sovereign_state(&c, 0);
        let plan: Vec<CycleInputs> = (0..3)
            .map(|_| CycleInputs {
                observations: vec![fixtures::timestamp_observation()],
                ..CycleInputs::default()
            })
            .collect();
        let out =
            simulate_plan(&state, &plan, &frame, Path::new("/repo"), Some(0.5), None).unwrap();
        assert!(out.feasible);
        assert_eq!(out.density_series.len(), 3);
        assert_eq!(out.final_state.cycle_index, 3);
    }
}
