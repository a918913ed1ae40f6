//! Property tests over the pure classification and phase logic.

use govcore_common::{DocumentType, MovementType, RolloutPhase};
use proptest::prelude::*;

fn movement_type() -> impl Strategy<Value = MovementType> {
    prop_oneof![
        Just(MovementType::In),
        Just(MovementType::Out),
        Just(MovementType::Adjustment),
        Just(MovementType::Transfer),
    ]
}

fn phase() -> impl Strategy<Value = RolloutPhase> {
    prop_oneof![
        Just(RolloutPhase::Disabled),
        Just(RolloutPhase::Monitoring),
        Just(RolloutPhase::Pilot),
        Just(RolloutPhase::Gradual),
        Just(RolloutPhase::Full),
    ]
}

proptest! {
    #[test]
    fn document_type_derivation_is_total(reference in ".*", mt in movement_type()) {
        // Any reference string classifies without panicking.
        let _ = DocumentType::derive(&reference, mt);
    }

    #[test]
    fn sale_reference_always_wins_over_fallback(suffix in "[A-Z0-9-]{0,12}", mt in movement_type()) {
        let reference = format!("SALE-{suffix}");
        prop_assert_eq!(DocumentType::derive(&reference, mt), DocumentType::Sale);
    }

    #[test]
    fn next_toward_is_strictly_increasing(current in phase(), target in phase()) {
        match current.next_toward(target) {
            Some(next) => {
                prop_assert!(next > current);
                prop_assert!(next <= target);
            }
            None => prop_assert!(current >= target),
        }
    }

    #[test]
    fn phase_walk_terminates(start in phase(), target in phase()) {
        let mut current = start;
        let mut steps = 0;
        while let Some(next) = current.next_toward(target) {
            current = next;
            steps += 1;
            prop_assert!(steps <= 4, "walk must finish within the ladder length");
        }
    }
}
