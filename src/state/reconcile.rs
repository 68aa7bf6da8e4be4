//! Per-device view of the shared round phase.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::state::state_machine::RoundPhase;

/// What a given player should be shown right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EffectivePhase {
    /// Answer input.
    Question,
    /// Nothing to do until the next event.
    Waiting,
    /// Ballot for the target.
    Vote,
    /// Non-target players wait for the target's pick.
    WaitingForVote,
    Results,
}

/// The three per-player facts the view depends on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CurrentUserState {
    pub has_answered: bool,
    pub has_voted: bool,
    pub is_target_player: bool,
}

/// Map the server phase and the caller's own status to the phase to render.
///
/// Must be re-run whenever any input changes; the inputs move independently.
pub fn reconcile(server_phase: RoundPhase, user: CurrentUserState) -> EffectivePhase {
    match (server_phase, user.is_target_player) {
        (RoundPhase::Question, true) => EffectivePhase::Waiting,
        (RoundPhase::Question, false) if user.has_answered => EffectivePhase::Waiting,
        (RoundPhase::Question, false) => EffectivePhase::Question,
        (RoundPhase::Answer, _) => EffectivePhase::Waiting,
        (RoundPhase::Vote, true) if user.has_voted => EffectivePhase::Waiting,
        (RoundPhase::Vote, true) => EffectivePhase::Vote,
        (RoundPhase::Vote, false) => EffectivePhase::WaitingForVote,
        (RoundPhase::Results, _) => EffectivePhase::Results,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(is_target_player: bool, has_answered: bool, has_voted: bool) -> CurrentUserState {
        CurrentUserState {
            has_answered,
            has_voted,
            is_target_player,
        }
    }

    #[test]
    fn table_matches_expected_views() {
        use EffectivePhase as E;
        use RoundPhase as R;

        let cases = [
            (R::Question, user(true, false, false), E::Waiting),
            (R::Question, user(false, true, false), E::Waiting),
            (R::Question, user(false, false, false), E::Question),
            (R::Answer, user(true, false, false), E::Waiting),
            (R::Answer, user(false, true, false), E::Waiting),
            (R::Vote, user(true, false, true), E::Waiting),
            (R::Vote, user(true, false, false), E::Vote),
            (R::Vote, user(false, true, false), E::WaitingForVote),
            (R::Vote, user(false, false, false), E::WaitingForVote),
            (R::Results, user(true, false, true), E::Results),
            (R::Results, user(false, true, false), E::Results),
        ];

        for (phase, state, expected) in cases {
            assert_eq!(reconcile(phase, state), expected, "{phase:?} {state:?}");
        }
    }

    #[test]
    fn every_input_combination_is_handled_deterministically() {
        let phases = [
            RoundPhase::Question,
            RoundPhase::Answer,
            RoundPhase::Vote,
            RoundPhase::Results,
        ];
        for phase in phases {
            for bits in 0..8u8 {
                let state = user(bits & 1 != 0, bits & 2 != 0, bits & 4 != 0);
                assert_eq!(reconcile(phase, state), reconcile(phase, state));
            }
        }
    }

    #[test]
    fn late_new_round_flips_view_without_phase_change() {
        let before = reconcile(RoundPhase::Question, user(false, false, false));
        let after = reconcile(RoundPhase::Question, user(true, false, false));
        assert_eq!(before, EffectivePhase::Question);
        assert_eq!(after, EffectivePhase::Waiting);
    }
}
