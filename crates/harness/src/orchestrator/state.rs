use serde::Serialize;
use std::fmt;

/// Position of a run in the lifecycle state machine.
///
/// Runs move strictly forward through
/// `Init → Located → Loaded → LoadVerified → Unloaded → UnloadVerified → Done`.
/// `Failed` is absorbing and reachable from every non-terminal phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Phase {
    Init,
    Located,
    Loaded,
    LoadVerified,
    Unloaded,
    UnloadVerified,
    Done,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Done | Phase::Failed)
    }

    /// Returns whether `next` is a legal successor of `self`.
    pub fn can_advance_to(self, next: Phase) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Phase::Failed => true,
            _ => self.successor() == Some(next),
        }
    }

    fn successor(self) -> Option<Phase> {
        match self {
            Phase::Init => Some(Phase::Located),
            Phase::Located => Some(Phase::Loaded),
            Phase::Loaded => Some(Phase::LoadVerified),
            Phase::LoadVerified => Some(Phase::Unloaded),
            Phase::Unloaded => Some(Phase::UnloadVerified),
            Phase::UnloadVerified => Some(Phase::Done),
            Phase::Done | Phase::Failed => None,
        }
    }
}

/// The step a run was executing when it failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Step {
    Locate,
    Lock,
    Load,
    VerifyLoad,
    Unload,
    VerifyUnload,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Step::Locate => "locate",
            Step::Lock => "lock",
            Step::Load => "load",
            Step::VerifyLoad => "verify-load",
            Step::Unload => "unload",
            Step::VerifyUnload => "verify-unload",
        };
        f.write_str(s)
    }
}
