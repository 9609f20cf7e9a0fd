use crate::abc::{AbcCmd, NetStats};
use serde::{Deserialize, Serialize};
use strum::AsRefStr;

/// BDD reachability is tried below these sizes.
pub const REACH_MAX_SIZE: usize = 550;
pub const REACH_MIN_DEPTH: usize = 100;
pub const REACH_SMALL_SIZE: usize = 400;
pub const REACH_FEW_LATCHES: usize = 80;

/// Frame bound of the bounded BMC variant.
pub const BMC_BOUNDED_FRAMES: usize = 1000;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr)]
pub enum EngineKind {
    #[strum(serialize = "BMC_fwd")]
    BmcFwd,
    #[strum(serialize = "BMC_seeded")]
    BmcSeeded,
    #[strum(serialize = "BMC_bounded")]
    BmcBounded,
    #[strum(serialize = "PDR_default")]
    PdrDefault,
    #[strum(serialize = "PDR_minimal")]
    PdrMinimal,
    #[strum(serialize = "PDR_abstract")]
    PdrAbstract,
    #[strum(serialize = "PDR_seeded")]
    PdrSeeded,
    #[strum(serialize = "IMC_fwd")]
    ImcFwd,
    #[strum(serialize = "IMC_bwd")]
    ImcBwd,
    #[strum(serialize = "IMC_multi")]
    ImcMulti,
    #[strum(serialize = "REACH_explicit")]
    ReachExplicit,
    #[strum(serialize = "REACH_bdd")]
    ReachBdd,
    #[strum(serialize = "RARITY_SIM")]
    RaritySim,
    #[strum(serialize = "COMB_SAT")]
    CombSat,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Family {
    Pdr,
    Bmc,
    Reach,
    Interp,
    Sim,
}

impl EngineKind {
    pub fn family(self) -> Family {
        use EngineKind::*;
        match self {
            PdrDefault | PdrMinimal | PdrAbstract | PdrSeeded => Family::Pdr,
            BmcFwd | BmcSeeded | BmcBounded | CombSat => Family::Bmc,
            ReachExplicit | ReachBdd => Family::Reach,
            ImcFwd | ImcBwd | ImcMulti => Family::Interp,
            RaritySim => Family::Sim,
        }
    }

    /// Tool commands running this engine for `timeout` seconds.
    pub fn commands(self, timeout: u64, seed: u64) -> Vec<AbcCmd> {
        use EngineKind::*;
        let cmd = match self {
            BmcFwd => AbcCmd::Bmc3 {
                timeout,
                frames: None,
                start: None,
                all: false,
            },
            BmcSeeded => AbcCmd::BmcGia { timeout },
            BmcBounded => AbcCmd::Bmc2 {
                timeout,
                frames: BMC_BOUNDED_FRAMES,
            },
            PdrDefault => AbcCmd::Pdr {
                timeout,
                seed: None,
                all: false,
            },
            PdrMinimal => AbcCmd::PdrGia { timeout },
            PdrAbstract => AbcCmd::Treb { timeout },
            PdrSeeded => AbcCmd::Pdr {
                timeout,
                seed: Some(seed),
                all: false,
            },
            ImcFwd => AbcCmd::Int {
                timeout,
                backward: false,
            },
            ImcBwd => AbcCmd::Int {
                timeout,
                backward: true,
            },
            ImcMulti => AbcCmd::Imc { timeout },
            ReachExplicit => AbcCmd::Reachx { timeout },
            ReachBdd => AbcCmd::Reachy { timeout },
            RaritySim => AbcCmd::Sim3 {
                timeout,
                seed,
                start: 0,
                all: false,
            },
            CombSat => AbcCmd::Dsat { timeout },
        };
        vec![cmd]
    }
}

/// One engine slot of a portfolio call.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EngineRun {
    pub kind: EngineKind,
    pub seed: u64,
}

impl EngineRun {
    pub fn new(kind: EngineKind, seed: u64) -> Self {
        Self { kind, seed }
    }

    pub fn name(&self) -> String {
        match self.kind {
            EngineKind::PdrSeeded | EngineKind::RaritySim => {
                format!("{}#{}", self.kind.as_ref(), self.seed)
            }
            k => k.as_ref().to_string(),
        }
    }
}

pub fn reach_applicable(stats: &NetStats, depth: Option<usize>) -> bool {
    let size = stats.pis + stats.latches;
    (size < REACH_MAX_SIZE && depth.is_some_and(|d| d > REACH_MIN_DEPTH))
        || size < REACH_SMALL_SIZE
        || stats.latches < REACH_FEW_LATCHES
}

/// Engine set for `slots` worker slots, one of which is kept for the sleeper.
pub fn select_engines(
    stats: &NetStats,
    depth: Option<usize>,
    slots: usize,
    seed: u64,
) -> Vec<EngineRun> {
    use EngineKind::*;
    let budget = slots.saturating_sub(1).max(1);
    let mut kinds = if stats.latches == 0 {
        vec![CombSat, BmcFwd]
    } else {
        vec![PdrDefault, BmcFwd, ImcFwd, RaritySim]
    };
    if stats.latches > 0 {
        if reach_applicable(stats, depth) {
            kinds.push(ReachBdd);
            if stats.latches < REACH_FEW_LATCHES {
                kinds.push(ReachExplicit);
            }
        }
        for v in [PdrMinimal, PdrAbstract, PdrSeeded, PdrSeeded] {
            if kinds.len() >= budget {
                break;
            }
            kinds.push(v);
        }
        for v in [BmcSeeded, ImcBwd, ImcMulti, BmcBounded] {
            if kinds.len() >= budget {
                break;
            }
            kinds.push(v);
        }
    }
    kinds.sort_by_key(|k| k.family());
    kinds.truncate(budget);
    kinds
        .into_iter()
        .enumerate()
        .map(|(i, k)| EngineRun::new(k, seed + i as u64))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(runs: &[EngineRun]) -> Vec<EngineKind> {
        runs.iter().map(|r| r.kind).collect()
    }

    #[test]
    fn small_networks_get_bdd_reachability() {
        let small = NetStats::new(10, 1, 50, 500);
        assert!(kinds(&select_engines(&small, None, 8, 0)).contains(&EngineKind::ReachBdd));
        let big = NetStats::new(100, 1, 600, 5000);
        assert!(!kinds(&select_engines(&big, None, 8, 0)).contains(&EngineKind::ReachBdd));
        let mid = NetStats::new(100, 1, 400, 5000);
        assert!(!reach_applicable(&mid, Some(50)));
        assert!(reach_applicable(&mid, Some(150)));
    }

    #[test]
    fn truncation_keeps_priority_order() {
        let big = NetStats::new(100, 1, 600, 5000);
        let runs = select_engines(&big, None, 8, 0);
        assert_eq!(runs.len(), 7);
        let three = kinds(&select_engines(&big, None, 4, 0));
        assert_eq!(
            three,
            vec![EngineKind::PdrDefault, EngineKind::BmcFwd, EngineKind::ImcFwd]
        );
        let two = kinds(&select_engines(&big, None, 2, 0));
        assert_eq!(two, vec![EngineKind::PdrDefault]);
        let comb = kinds(&select_engines(&NetStats::new(5, 1, 0, 30), None, 8, 0));
        assert_eq!(comb, vec![EngineKind::CombSat, EngineKind::BmcFwd]);
    }

    #[test]
    fn seeds_differ_per_slot() {
        let big = NetStats::new(100, 1, 600, 5000);
        let runs = select_engines(&big, None, 10, 10);
        let seeded: Vec<u64> = runs
            .iter()
            .filter(|r| r.kind == EngineKind::PdrSeeded)
            .map(|r| r.seed)
            .collect();
        assert_eq!(seeded.len(), 2);
        assert_ne!(seeded[0], seeded[1]);
        assert_eq!(runs[0].name(), "PDR_default");
    }
}
