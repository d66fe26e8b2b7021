// tests/status_properties.rs

use proptest::prelude::*;

use kubelaunch::engine::{PhaseCounts, aggregate};
use kubelaunch::types::{TaskState, UnitPhase};

fn phase() -> impl Strategy<Value = UnitPhase> {
    prop_oneof![
        Just(UnitPhase::Pending),
        Just(UnitPhase::Running),
        Just(UnitPhase::Succeeded),
        Just(UnitPhase::Failed),
    ]
}

proptest! {
    #[test]
    fn aggregation_ignores_unit_order(
        (phases, shuffled) in proptest::collection::vec(phase(), 1..16)
            .prop_flat_map(|v| (Just(v.clone()), Just(v).prop_shuffle()))
    ) {
        let a = aggregate(&PhaseCounts::from_phases(phases));
        let b = aggregate(&PhaseCounts::from_phases(shuffled));
        prop_assert_eq!(a, b);
    }

    #[test]
    fn any_failure_means_failed(
        mut phases in proptest::collection::vec(phase(), 0..16),
        at in any::<prop::sample::Index>(),
    ) {
        phases.push(UnitPhase::Failed);
        let idx = at.index(phases.len());
        let last = phases.len() - 1;
        phases.swap(idx, last);
        prop_assert_eq!(aggregate(&PhaseCounts::from_phases(phases)), TaskState::Failed);
    }

    #[test]
    fn completed_only_when_all_succeeded(phases in proptest::collection::vec(phase(), 1..16)) {
        let all_succeeded = phases.iter().all(|p| *p == UnitPhase::Succeeded);
        let state = aggregate(&PhaseCounts::from_phases(phases));
        prop_assert_eq!(state == TaskState::Completed, all_succeeded);
    }
}
