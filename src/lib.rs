pub mod abc;
pub mod abstraction;
pub mod config;
pub mod history;
pub mod lift;
pub mod multi;
pub mod portfolio;
pub mod simplify;
pub mod speculate;
pub mod split;
pub mod strategy;
pub mod tracer;

use serde::{Deserialize, Serialize};
use std::{
    fmt::{self, Display},
    time::{Duration, Instant},
};
use strum::AsRefStr;
use thiserror::Error;

/// Problem status of a network, or of a single PO.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr)]
pub enum Verdict {
    #[strum(serialize = "SAT")]
    Sat,
    #[strum(serialize = "UNSAT")]
    Unsat,
    #[default]
    #[strum(serialize = "UNKNOWN")]
    Unknown,
}

impl Verdict {
    #[inline]
    pub fn is_definite(&self) -> bool {
        !matches!(self, Verdict::Unknown)
    }

    /// -1 = unknown, 0 = unsat, 1 = sat
    #[inline]
    pub fn as_i8(&self) -> i8 {
        match self {
            Verdict::Sat => 1,
            Verdict::Unsat => 0,
            Verdict::Unknown => -1,
        }
    }
}

impl Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// Recoverable failures of a proof branch. They never abort the run.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum FlowError {
    #[error("abstraction failed to refine")]
    AbstractionFailedToRefine,
    #[error("counterexample invalid at lift")]
    CexInvalidAtLift,
    #[error("child exited without results")]
    ChildCrash,
    #[error("no significant reduction")]
    NoReduction,
    #[error("timeout")]
    Timeout,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProofResult {
    SatSpurious,
    SatTrue,
    Unsat,
    UndecidedReduction,
    UndecidedNoReduction,
    Error(FlowError),
    Restart,
}

impl ProofResult {
    #[inline]
    pub fn is_definite(&self) -> bool {
        matches!(self, ProofResult::SatTrue | ProofResult::Unsat)
    }

    pub fn verdict(&self) -> Verdict {
        match self {
            ProofResult::SatTrue => Verdict::Sat,
            ProofResult::Unsat => Verdict::Unsat,
            _ => Verdict::Unknown,
        }
    }
}

impl Display for ProofResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProofResult::SatSpurious => write!(f, "SAT_spurious"),
            ProofResult::SatTrue => write!(f, "SAT_true"),
            ProofResult::Unsat => write!(f, "UNSAT"),
            ProofResult::UndecidedReduction => write!(f, "UNDECIDED_reduction"),
            ProofResult::UndecidedNoReduction => write!(f, "UNDECIDED_no_reduction"),
            ProofResult::Error(e) => write!(f, "ERROR({e})"),
            ProofResult::Restart => write!(f, "RESTART"),
        }
    }
}

/// Wall-clock budget handed down from a caller to its stages.
#[derive(Clone, Copy, Debug)]
pub struct Budget {
    start: Instant,
    total: Duration,
}

impl Budget {
    pub fn new(total: Duration) -> Self {
        Self {
            start: Instant::now(),
            total,
        }
    }

    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    #[inline]
    pub fn remaining(&self) -> Duration {
        self.total.saturating_sub(self.start.elapsed())
    }

    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Child budget capped by `limit` and by what is left here.
    pub fn sub(&self, limit: Duration) -> Budget {
        Budget::new(limit.min(self.remaining()))
    }

    pub fn capped(&self, limit: Duration) -> Duration {
        limit.min(self.remaining())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_encoding() {
        assert_eq!(Verdict::Sat.as_i8(), 1);
        assert_eq!(Verdict::Unsat.as_i8(), 0);
        assert_eq!(Verdict::Unknown.as_i8(), -1);
        assert_eq!(Verdict::Unsat.to_string(), "UNSAT");
    }

    #[test]
    fn budget_sub_is_capped_by_parent() {
        let b = Budget::new(Duration::from_secs(10));
        let s = b.sub(Duration::from_secs(100));
        assert!(s.remaining() <= Duration::from_secs(10));
        assert!(!s.is_exhausted());
        let z = Budget::new(Duration::ZERO);
        assert!(z.is_exhausted());
        assert_eq!(z.capped(Duration::from_secs(3)), Duration::ZERO);
    }

    #[test]
    fn proof_result_display() {
        assert_eq!(
            ProofResult::Error(FlowError::CexInvalidAtLift).to_string(),
            "ERROR(counterexample invalid at lift)"
        );
        assert!(ProofResult::SatTrue.is_definite());
        assert!(!ProofResult::UndecidedReduction.is_definite());
    }
}
