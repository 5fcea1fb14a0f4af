use strum::{Display, EnumString};

/// Why a flag resolved the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display)]
pub enum FlagResolutionReason {
    /// A rollout identified the subject and its score fell inside the enabled fraction.
    #[strum(serialize = "rollout_match")]
    RolloutMatch,
    /// A rollout identified the subject, but its score fell outside the enabled fraction.
    #[strum(serialize = "out_of_rollout_bound")]
    OutOfRolloutBound,
    /// The flag has no rollouts at all.
    #[strum(serialize = "no_rollouts")]
    NoRollouts,
    /// Every rollout abstained.
    #[strum(serialize = "no_rollout_match")]
    NoRolloutMatch,
}

impl FlagResolutionReason {
    pub fn is_default(&self) -> bool {
        matches!(
            self,
            FlagResolutionReason::NoRollouts | FlagResolutionReason::NoRolloutMatch
        )
    }
}
