//! Speculative reduction. Candidate sequential equivalences are merged into a
//! speculatively reduced miter (SRM) whose outputs are the original POs
//! followed by one miter per candidate pair; falsified miters drop their
//! classes until the SRM is proved or the loop stops paying off.

use crate::{
    Budget, FlowError, ProofResult, Verdict,
    abc::{AbcCmd, Cex, Tool},
    config::{Config, SpecConfig},
    portfolio::{Portfolio, StopOn, engine_secs},
};
use log::{debug, info, warn};
use std::{path::PathBuf, time::Duration};

pub struct Speculation<'a> {
    cfg: &'a SpecConfig,
    portfolio: &'a Portfolio,
}

struct SpecFiles {
    orig: PathBuf,
    db: PathBuf,
    srm: PathBuf,
}

impl<'a> Speculation<'a> {
    pub fn new(cfg: &'a Config, portfolio: &'a Portfolio) -> Self {
        Self {
            cfg: &cfg.spec,
            portfolio,
        }
    }

    fn restore(&self, tool: &mut dyn Tool, files: &SpecFiles) -> anyhow::Result<()> {
        tool.load(&files.orig)
    }

    /// Builds the SRM from the equivalence database and makes it current.
    fn rebuild(&self, tool: &mut dyn Tool, files: &SpecFiles) -> anyhow::Result<usize> {
        tool.exec(&AbcCmd::Srm {
            db: files.db.clone(),
            out: files.srm.clone(),
        })?;
        tool.load(&files.srm)?;
        Ok(tool.stats()?.pos)
    }

    /// Replays a CEX of an original PO on the pre-speculation network. The
    /// tool is left on that network.
    fn confirm(
        &self,
        tool: &mut dyn Tool,
        files: &SpecFiles,
        cex: Option<&Cex>,
    ) -> anyhow::Result<bool> {
        tool.load(&files.orig)?;
        if let Some(c) = cex {
            tool.set_cex(c, "spec")?;
        }
        Ok(tool.test_cex()?.is_some())
    }

    fn candidates(
        &self,
        tool: &mut dyn Tool,
        files: &SpecFiles,
        budget: &Budget,
    ) -> anyhow::Result<()> {
        let timeout = engine_secs(budget.capped(Duration::from_secs(self.cfg.equiv_timeout)));
        tool.exec_all(&[
            AbcCmd::Equiv3 {
                timeout,
                frames: self.cfg.equiv_frames,
            },
            AbcCmd::Semi,
            AbcCmd::Speci,
            AbcCmd::EquivScope(self.cfg.scope),
            AbcCmd::SaveEquiv(files.db.clone()),
        ])?;
        Ok(())
    }

    /// Short multi-output sweep of the initial SRM. Returns a final result
    /// when speculation should stop here.
    fn sweep(
        &self,
        tool: &mut dyn Tool,
        files: &SpecFiles,
        n_pos_before: usize,
        budget: &Budget,
    ) -> anyhow::Result<Option<ProofResult>> {
        let secs = engine_secs(budget.capped(Duration::from_secs(self.cfg.sweep_timeout)));
        let runs = vec![
            (
                "sim3".to_string(),
                vec![AbcCmd::Sim3 {
                    timeout: secs,
                    seed: 0,
                    start: 0,
                    all: true,
                }],
            ),
            (
                "bmc3".to_string(),
                vec![AbcCmd::Bmc3 {
                    timeout: secs,
                    frames: None,
                    start: None,
                    all: true,
                }],
            ),
        ];
        let sweep = self.portfolio.sweep(tool, runs, None)?;
        let failed = (0..n_pos_before).find(|i| sweep.statuses.get(*i) == Some(&Verdict::Sat));
        if let Some(po) = failed {
            let cex = sweep.cexs.get(po).cloned().flatten();
            if self.confirm(tool, files, cex.as_ref())? {
                info!("spec: sweep falsified original output {po}");
                return Ok(Some(ProofResult::SatTrue));
            }
            tool.load(&files.srm)?;
        }
        let added = sweep.statuses.len().saturating_sub(n_pos_before);
        let disproved: Vec<usize> = (n_pos_before..sweep.statuses.len())
            .filter(|i| sweep.statuses[*i] == Verdict::Sat)
            .collect();
        if disproved.is_empty() {
            return Ok(None);
        }
        if disproved.len() as f64 >= self.cfg.sweep_abandon * added as f64 {
            info!("spec: sweep disproved {} of {added} candidates", disproved.len());
            return Ok(Some(ProofResult::UndecidedNoReduction));
        }
        debug!("spec: pruning {} classes found by the sweep", disproved.len());
        tool.exec(&AbcCmd::EquivPrune {
            db: files.db.clone(),
            pos: disproved,
        })?;
        self.rebuild(tool, files)?;
        Ok(None)
    }

    /// On `UndecidedReduction` the tool is left on the last SRM; on
    /// `SatTrue` it holds the entry network with the CEX installed; otherwise
    /// the entry network is restored.
    pub fn run(
        &self,
        tool: &mut dyn Tool,
        budget: Budget,
    ) -> anyhow::Result<ProofResult> {
        let files = SpecFiles {
            orig: tool.file("spec_orig"),
            db: tool.file("gore"),
            srm: tool.file("gsrm"),
        };
        tool.save(&files.orig)?;
        let orig = tool.stats()?;
        let n_pos_before = orig.pos;
        info!("spec: start on {orig}");

        self.candidates(tool, &files, &budget)?;
        let mut n_pos = self.rebuild(tool, &files)?;
        let added = n_pos.saturating_sub(n_pos_before);
        if added <= 1 || added > self.cfg.max_added {
            info!("spec: {added} candidate equivalences, giving up");
            self.restore(tool, &files)?;
            return Ok(ProofResult::UndecidedNoReduction);
        }
        info!("spec: initial SRM adds {added} outputs");

        if let Some(res) = self.sweep(tool, &files, n_pos_before, &budget)? {
            if res != ProofResult::SatTrue {
                self.restore(tool, &files)?;
            }
            return Ok(res);
        }
        n_pos = tool.stats()?.pos;

        let mut stalls = 0;
        loop {
            if budget.is_exhausted() {
                info!("spec: budget exhausted");
                self.restore(tool, &files)?;
                return Ok(ProofResult::UndecidedNoReduction);
            }
            let latches = tool.stats()?.latches;
            if latches as f64 >= self.cfg.latch_ratio * orig.latches as f64 {
                info!("spec: SRM keeps {latches} of {} latches", orig.latches);
                self.restore(tool, &files)?;
                return Ok(ProofResult::UndecidedNoReduction);
            }

            let timeout = budget.capped(Duration::from_secs(self.cfg.iter_timeout));
            let out = self.portfolio.verify_auto(tool, timeout, StopOn::DEFINITE)?;
            match out.verdict {
                Verdict::Unsat => {
                    info!("spec: SRM proved by {:?}", out.winner);
                    self.restore(tool, &files)?;
                    return Ok(ProofResult::Unsat);
                }
                Verdict::Unknown => {
                    info!("spec: SRM undecided with {n_pos} outputs");
                    return Ok(ProofResult::UndecidedReduction);
                }
                Verdict::Sat => (),
            }
            let Some(cex) = tool.cex()? else {
                warn!("spec: SAT without a counterexample");
                self.restore(tool, &files)?;
                return Ok(ProofResult::Error(FlowError::CexInvalidAtLift));
            };
            if cex.po < n_pos_before {
                if self.confirm(tool, &files, Some(&cex))? {
                    info!("spec: output {} fails at frame {}", cex.po, cex.frame());
                    return Ok(ProofResult::SatTrue);
                }
                debug!("spec: counterexample of output {} does not replay", cex.po);
                tool.load(&files.srm)?;
                tool.set_cex(&cex, "spec")?;
            }

            tool.exec(&AbcCmd::Resim {
                db: files.db.clone(),
            })?;
            let mut next = self.rebuild(tool, &files)?;
            if next >= n_pos {
                stalls += 1;
                warn!("spec: refinement kept {next} outputs");
                if stalls >= 2 {
                    self.restore(tool, &files)?;
                    return Ok(ProofResult::Error(FlowError::NoReduction));
                }
                tool.exec(&AbcCmd::EquivPrune {
                    db: files.db.clone(),
                    pos: vec![cex.po],
                })?;
                next = self.rebuild(tool, &files)?;
                if next >= n_pos {
                    self.restore(tool, &files)?;
                    return Ok(ProofResult::UndecidedNoReduction);
                }
            } else {
                stalls = 0;
            }
            debug!("spec: SRM outputs {n_pos} -> {next}");
            n_pos = next;
        }
    }
}
