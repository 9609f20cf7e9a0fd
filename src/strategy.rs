//! Top-level proof flow: simplify, quick check, abstraction and speculation
//! in the configured order, then a last portfolio call on what is left.

use crate::{
    Budget, FlowError, ProofResult, Verdict,
    abc::{AbcCmd, Cex, Tool},
    abstraction::Abstraction,
    config::{Config, Mode},
    history::{History, Transform},
    lift::lift_cex,
    multi::MultiSolver,
    portfolio::{Portfolio, PortfolioOutcome, StopOn, engine_secs},
    simplify::Simplifier,
    speculate::Speculation,
    tracer::{LogTracer, Tracer, TracerIf},
};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

/// Summary of a run, persisted as `{base}_outcome.ron`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Outcome {
    pub result: ProofResult,
    /// Engine that produced the deciding verdict, when known.
    pub engine: Option<String>,
    /// Counterexample on the original network.
    pub cex: Option<Cex>,
    /// Per-PO verdicts of a multi-output run.
    pub po_verdicts: Vec<Verdict>,
    pub trace: Vec<(String, ProofResult)>,
}

impl Outcome {
    fn new() -> Self {
        Self {
            result: ProofResult::UndecidedNoReduction,
            engine: None,
            cex: None,
            po_verdicts: Vec::new(),
            trace: Vec::new(),
        }
    }

    #[inline]
    pub fn verdict(&self) -> Verdict {
        self.result.verdict()
    }

    /// (failing PO, frame) of a counterexample.
    pub fn failing(&self) -> Option<(usize, usize)> {
        self.cex.as_ref().map(|c| (c.po, c.frame()))
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        fs::write(path, ron::ser::to_string_pretty(self, Default::default())?)?;
        Ok(())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Reduction {
    Abstraction,
    Speculation,
}

impl Reduction {
    fn tag(self) -> &'static str {
        match self {
            Reduction::Abstraction => "abs",
            Reduction::Speculation => "spec",
        }
    }
}

/// Simplified network every reduction starts from.
struct Checkpoint {
    path: PathBuf,
    name: String,
    mark: usize,
}

pub struct Prover<'a> {
    cfg: &'a Config,
    portfolio: Portfolio,
    tracer: Tracer,
}

impl<'a> Prover<'a> {
    pub fn new(cfg: &'a Config) -> Self {
        let mut tracer = Tracer::new();
        tracer.add_tracer(Box::new(LogTracer::new("strategy")));
        Self {
            cfg,
            portfolio: Portfolio::new(cfg),
            tracer,
        }
    }

    pub fn add_tracer(&mut self, tracer: Box<dyn TracerIf>) {
        self.tracer.add_tracer(tracer);
    }

    fn order(&self, mode: Mode) -> Vec<Reduction> {
        let s = &self.cfg.strategy;
        let order = match mode {
            Mode::AbsFirst => [Reduction::Abstraction, Reduction::Speculation],
            Mode::SpecFirst => [Reduction::Speculation, Reduction::Abstraction],
        };
        order
            .into_iter()
            .filter(|r| match r {
                Reduction::Abstraction => !s.no_abs,
                Reduction::Speculation => !s.no_spec,
            })
            .collect()
    }

    fn reduce(
        &self,
        tool: &mut dyn Tool,
        history: &mut History,
        r: Reduction,
        budget: &Budget,
    ) -> anyhow::Result<ProofResult> {
        match r {
            Reduction::Abstraction => {
                let b = budget.sub(Duration::from_secs(self.cfg.abs.budget));
                Abstraction::new(self.cfg, &self.portfolio).run(tool, history, b)
            }
            Reduction::Speculation => {
                let b = budget.sub(Duration::from_secs(self.cfg.spec.budget));
                Speculation::new(self.cfg, &self.portfolio).run(tool, b)
            }
        }
    }

    /// Maps the current CEX onto the original network and replays it there,
    /// with a bounded BMC run as the fallback. `history` is left untouched.
    fn confirm(
        &self,
        tool: &mut dyn Tool,
        history: &History,
    ) -> anyhow::Result<Result<Cex, FlowError>> {
        let timeout = self.cfg.strategy.lift_timeout;
        let mut scratch = history.clone();
        let cex = match lift_cex(tool, &mut scratch, 0, timeout)? {
            Ok(c) => c,
            Err(e) => return Ok(Err(e)),
        };
        history.restore_initial(tool)?;
        let latches = tool.stats()?.latches;
        let mut replay = cex.clone();
        if replay.n_regs != latches {
            replay.init = vec![false; latches];
            replay.n_regs = latches;
        }
        tool.set_cex(&replay, "lift")?;
        if let Some(po) = tool.test_cex()? {
            replay.po = po;
            return Ok(Ok(replay));
        }
        debug!("strategy: direct replay failed, re-running BMC to frame {}", cex.frame());
        tool.exec(&AbcCmd::Bmc3 {
            timeout,
            frames: Some(cex.frame() + 1),
            start: None,
            all: false,
        })?;
        if tool.status()?.verdict == Verdict::Sat
            && let Some(po) = tool.test_cex()?
            && let Some(mut c) = tool.cex()?
        {
            c.po = po;
            return Ok(Ok(c));
        }
        Ok(Err(FlowError::CexInvalidAtLift))
    }

    /// Turns a portfolio verdict on the current network into a flow result.
    fn settle(
        &self,
        tool: &mut dyn Tool,
        history: &History,
        out: PortfolioOutcome,
        outcome: &mut Outcome,
    ) -> anyhow::Result<ProofResult> {
        Ok(match out.verdict {
            Verdict::Unsat => {
                outcome.engine = out.winner;
                ProofResult::Unsat
            }
            Verdict::Sat => match self.confirm(tool, history)? {
                Ok(cex) => {
                    outcome.engine = out.winner;
                    outcome.cex = Some(cex);
                    ProofResult::SatTrue
                }
                Err(e) => ProofResult::Error(e),
            },
            Verdict::Unknown => ProofResult::UndecidedNoReduction,
        })
    }

    fn back_to(
        &self,
        tool: &mut dyn Tool,
        history: &mut History,
        cp: &Checkpoint,
    ) -> anyhow::Result<()> {
        history.truncate(cp.mark);
        tool.load(&cp.path)?;
        tool.set_name(cp.name.clone());
        Ok(())
    }

    fn single(
        &mut self,
        tool: &mut dyn Tool,
        history: &mut History,
        budget: &Budget,
        outcome: &mut Outcome,
    ) -> anyhow::Result<ProofResult> {
        let simp_budget = budget.sub(budget.remaining() / 4);
        let report = Simplifier::new(self.cfg).run(tool, history, simp_budget)?;
        let simp = if report.after != report.before {
            ProofResult::UndecidedReduction
        } else {
            ProofResult::UndecidedNoReduction
        };
        self.tracer.trace_stage("simplify", simp);
        tool.push_name("smp");
        let cp = Checkpoint {
            path: tool.file("simplified"),
            name: tool.name().to_string(),
            mark: history.len(),
        };
        tool.save(&cp.path)?;

        let quick = budget.capped(Duration::from_secs(self.cfg.strategy.quick_timeout));
        let out = self.portfolio.verify_auto(tool, quick, StopOn::DEFINITE)?;
        let res = self.settle(tool, history, out, outcome)?;
        self.tracer.trace_stage("quick", res);
        if res.is_definite() {
            return Ok(res);
        }
        if let ProofResult::Error(_) = res {
            self.back_to(tool, history, &cp)?;
        }

        let mut order = self.order(self.cfg.strategy.mode);
        let mut retried = false;
        loop {
            let mut committed = false;
            let mut sat = None;
            for r in order.iter().copied() {
                if budget.is_exhausted() {
                    break;
                }
                let res = self.reduce(tool, history, r, budget)?;
                self.tracer.trace_stage(r.tag(), res);
                match res {
                    ProofResult::Unsat => return Ok(res),
                    ProofResult::SatTrue => {
                        let engine = tool.status()?.engine;
                        sat = Some((r.tag(), self.confirm(tool, history)?, Some(engine)));
                        break;
                    }
                    ProofResult::UndecidedReduction => {
                        committed = true;
                        tool.push_name(r.tag());
                    }
                    _ => (),
                }
            }
            if sat.is_none() {
                let out = self
                    .portfolio
                    .verify_auto(tool, budget.remaining(), StopOn::DEFINITE)?;
                match out.verdict {
                    Verdict::Unsat => {
                        self.tracer.trace_stage("final", ProofResult::Unsat);
                        outcome.engine = out.winner;
                        return Ok(ProofResult::Unsat);
                    }
                    Verdict::Sat => sat = Some(("final", self.confirm(tool, history)?, out.winner)),
                    Verdict::Unknown => {
                        let res = if committed {
                            ProofResult::UndecidedReduction
                        } else {
                            ProofResult::UndecidedNoReduction
                        };
                        self.tracer.trace_stage("final", res);
                        return Ok(res);
                    }
                }
            }
            let Some((stage, lifted, engine)) = sat else {
                return Ok(ProofResult::UndecidedNoReduction);
            };
            match lifted {
                Ok(cex) => {
                    info!("strategy: {stage} counterexample replays on the original network");
                    outcome.engine = engine;
                    outcome.cex = Some(cex);
                    if stage == "final" {
                        self.tracer.trace_stage(stage, ProofResult::SatTrue);
                    }
                    return Ok(ProofResult::SatTrue);
                }
                Err(e) if committed && !retried => {
                    warn!("strategy: {stage} counterexample is spurious ({e}), de-committing");
                    self.tracer.trace_stage(stage, ProofResult::SatSpurious);
                    self.tracer.trace_stage("decommit", ProofResult::Restart);
                    self.back_to(tool, history, &cp)?;
                    order = self.order(self.cfg.strategy.mode.other());
                    retried = true;
                }
                Err(e) => {
                    self.tracer.trace_stage(stage, ProofResult::Error(e));
                    return Ok(ProofResult::Error(e));
                }
            }
        }
    }

    /// Runs the whole flow on the current network of `tool`.
    pub fn run(&mut self, tool: &mut dyn Tool) -> anyhow::Result<Outcome> {
        let budget = Budget::new(Duration::from_secs(self.cfg.timeout));
        let base = tool.name().to_string();
        let dir = tool.work_dir().to_path_buf();
        let mut history = History::new(&base);
        history.push(tool, Transform::Initial)?;
        let stats = tool.stats()?;
        info!("strategy: {base} has {stats}, budget {}s", engine_secs(budget.remaining()));

        let mut outcome = Outcome::new();
        outcome.result = if stats.pos > 1 || !tool.aig()?.const0_properties().is_empty() {
            let v = MultiSolver::new(self.cfg, &self.portfolio).run(tool, &mut history, budget)?;
            let res = match v.overall() {
                Verdict::Sat => ProofResult::SatTrue,
                Verdict::Unsat => ProofResult::Unsat,
                Verdict::Unknown => ProofResult::UndecidedNoReduction,
            };
            self.tracer.trace_stage("multi", res);
            outcome.po_verdicts = v.as_slice().to_vec();
            res
        } else {
            self.single(tool, &mut history, &budget, &mut outcome)?
        };
        outcome.trace = self.tracer.entries().to_vec();
        info!("strategy: {} after {:.1?}", outcome.result, budget.elapsed());
        outcome.save(&dir.join(format!("{base}_outcome.ron")))?;
        Ok(outcome)
    }
}
