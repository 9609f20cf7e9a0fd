use crate::Verdict;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::{
    fmt::Write as _,
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

/// Verdict vector over the POs of the original network. An entry is
/// resolved at most once.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoVerdicts {
    verdicts: Vec<Verdict>,
    /// Stage that resolved each PO.
    stages: Vec<Option<String>>,
}

impl PoVerdicts {
    pub fn new(n: usize) -> Self {
        Self {
            verdicts: vec![Verdict::Unknown; n],
            stages: vec![None; n],
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.verdicts.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.verdicts.is_empty()
    }

    #[inline]
    pub fn get(&self, po: usize) -> Verdict {
        self.verdicts[po]
    }

    pub fn as_slice(&self) -> &[Verdict] {
        &self.verdicts
    }

    /// Resolves `po`. Returns whether it was newly resolved; a conflicting
    /// verdict on a resolved PO is ignored.
    pub fn set(&mut self, po: usize, v: Verdict, stage: &str) -> bool {
        if !v.is_definite() {
            return false;
        }
        match self.verdicts[po] {
            Verdict::Unknown => {
                self.verdicts[po] = v;
                self.stages[po] = Some(stage.to_string());
                true
            }
            old if old != v => {
                warn!("mo: output {po} already {old}, ignoring {v} from {stage}");
                false
            }
            _ => false,
        }
    }

    pub fn unknown(&self) -> Vec<usize> {
        (0..self.len())
            .filter(|i| self.verdicts[*i] == Verdict::Unknown)
            .collect()
    }

    /// (SAT, UNSAT, UNKNOWN)
    pub fn counts(&self) -> (usize, usize, usize) {
        let count = |v| self.verdicts.iter().filter(|x| **x == v).count();
        (
            count(Verdict::Sat),
            count(Verdict::Unsat),
            count(Verdict::Unknown),
        )
    }

    /// Verdict of the whole network: SAT if some PO fails, UNSAT if all hold.
    pub fn overall(&self) -> Verdict {
        let (sat, _, unknown) = self.counts();
        if sat > 0 {
            Verdict::Sat
        } else if unknown == 0 {
            Verdict::Unsat
        } else {
            Verdict::Unknown
        }
    }

    pub fn as_i8(&self) -> Vec<i8> {
        self.verdicts.iter().map(|v| v.as_i8()).collect()
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        fs::write(path, ron::ser::to_string_pretty(self, Default::default())?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        Ok(ron::from_str(&fs::read_to_string(path)?)?)
    }

    /// One line per resolved PO: `<po> <verdict> <stage>`.
    pub fn write_results(&self, path: &Path) -> anyhow::Result<()> {
        let mut text = String::new();
        for (i, (v, s)) in self.verdicts.iter().zip(self.stages.iter()).enumerate() {
            if let Some(s) = s {
                writeln!(text, "{i} {v} {s}")?;
            }
        }
        fs::write(path, text)?;
        Ok(())
    }
}

/// Folds verdicts of a `period`-unrolled network, where copy `k` of output
/// `j` is `k * n + j`, back onto the `n` outputs: SAT if any copy fails,
/// UNSAT only if every copy holds.
pub fn fold_phase_verdicts(unrolled: &[Verdict], period: usize) -> Vec<Verdict> {
    if period <= 1 {
        return unrolled.to_vec();
    }
    let n = unrolled.len() / period;
    (0..n)
        .map(|j| {
            let copies = (0..period).map(|k| unrolled[k * n + j]);
            if copies.clone().any(|v| v == Verdict::Sat) {
                Verdict::Sat
            } else if copies.clone().all(|v| v == Verdict::Unsat) {
                Verdict::Unsat
            } else {
                Verdict::Unknown
            }
        })
        .collect()
}

/// Append-only progress log of the multi-output solver.
pub struct Progress {
    path: PathBuf,
    last: (usize, usize, usize),
}

impl Progress {
    pub fn new(path: PathBuf, verdicts: &PoVerdicts) -> Self {
        Self {
            path,
            last: verdicts.counts(),
        }
    }

    /// Logs the counts after `step` and their change since the last record.
    pub fn record(&mut self, step: &str, verdicts: &PoVerdicts) -> anyhow::Result<()> {
        let (sat, unsat, unknown) = verdicts.counts();
        let (psat, punsat, _) = self.last;
        let line = format!(
            "{step}: SAT={sat} UNSAT={unsat} UNKNOWN={unknown} (+{} SAT, +{} UNSAT)",
            sat - psat,
            unsat - punsat
        );
        info!("mo: {line}");
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(f, "{line}")?;
        self.last = (sat, unsat, unknown);
        Ok(())
    }
}
