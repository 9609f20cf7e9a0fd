//! Size-reducing transformations, each kept only when the relative cost drops.

use crate::{
    Budget,
    abc::{AbcCmd, NetStats, Tool},
    config::{Config, SimplifyConfig},
    history::{History, Transform},
    split::{Policy, Task, fork_all},
};
use log::{debug, info, warn};
use std::{fs, time::Duration};
use strum::AsRefStr;

/// Networks above this many ANDs only get the cheap rewriting.
const LARGE_ANDS: usize = 200_000;
/// Networks below this many ANDs get a second `dc2` pass.
const SMALL_ANDS: usize = 20_000;

fn rel(before: usize, after: usize) -> f64 {
    if before == 0 {
        if after == 0 { 0.0 } else { 1.0 }
    } else {
        (after as f64 - before as f64) / before as f64
    }
}

#[derive(Copy, Clone, Debug)]
pub struct CostModel {
    pub w_pi: f64,
    pub w_latch: f64,
    pub w_and: f64,
    pub accept: f64,
    pub tolerance: f64,
}

impl From<&SimplifyConfig> for CostModel {
    fn from(c: &SimplifyConfig) -> Self {
        Self {
            w_pi: c.w_pi,
            w_latch: c.w_latch,
            w_and: c.w_and,
            accept: c.accept_cost,
            tolerance: c.dim_tolerance,
        }
    }
}

impl CostModel {
    /// Weighted relative growth, negative means smaller.
    pub fn cost(&self, before: &NetStats, after: &NetStats) -> f64 {
        self.w_pi * rel(before.pis, after.pis)
            + self.w_latch * rel(before.latches, after.latches)
            + self.w_and * rel(before.ands, after.ands)
    }

    pub fn accepts(&self, before: &NetStats, after: &NetStats) -> bool {
        let not_worse = |b: usize, a: usize| a as f64 * self.tolerance <= b as f64;
        self.cost(before, after) < self.accept
            && not_worse(before.pis, after.pis)
            && not_worse(before.latches, after.latches)
            && not_worse(before.ands, after.ands)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum Stage {
    Sweep,
    Retime,
    Core,
    Tempor,
    Phase,
    Reparam,
}

#[derive(Clone, Debug)]
pub struct SimplifyReport {
    pub before: NetStats,
    pub after: NetStats,
    /// Product of the accepted phase unrollings.
    pub phase_factor: usize,
    pub stages: Vec<(Stage, bool)>,
}

pub struct Simplifier<'a> {
    cfg: &'a SimplifyConfig,
    model: CostModel,
    grace: Duration,
    backups: usize,
}

impl<'a> Simplifier<'a> {
    pub fn new(cfg: &'a Config) -> Self {
        Self {
            cfg: &cfg.simp,
            model: CostModel::from(&cfg.simp),
            grace: Duration::from_millis(cfg.portfolio.grace_ms),
            backups: 0,
        }
    }

    /// BEFORE -> TRY -> ACCEPT | REJECT. A rejected or failed stage restores
    /// the pre-stage network and drops its history entry. `scale` divides
    /// the post-stage stats before comparing.
    fn try_stage(
        &mut self,
        tool: &mut dyn Tool,
        history: &mut History,
        stage: Stage,
        kind: Option<Transform>,
        scale: usize,
        f: impl FnOnce(&mut Self, &mut dyn Tool) -> anyhow::Result<()>,
    ) -> anyhow::Result<bool> {
        let before = tool.stats()?;
        let backup = tool.file(&format!("backup_{}", self.backups));
        self.backups += 1;
        tool.save(&backup)?;
        let mark = history.len();
        if let Some(kind) = kind {
            history.push(tool, kind)?;
        }
        debug!("simp: try {} on {before}", stage.as_ref());
        let accepted = match f(self, tool) {
            Ok(()) => {
                let mut after = tool.stats()?;
                if scale > 1 {
                    after.pis /= scale;
                    after.pos /= scale;
                    after.ands /= scale;
                }
                let ok = self.model.accepts(&before, &after);
                debug!(
                    "simp: {} cost {:.3}",
                    stage.as_ref(),
                    self.model.cost(&before, &after)
                );
                ok
            }
            Err(e) => {
                warn!("simp: {} failed: {e:#}", stage.as_ref());
                false
            }
        };
        if accepted {
            info!("simp: {} accepted, {before} -> {}", stage.as_ref(), tool.stats()?);
        } else {
            tool.load(&backup)?;
            history.truncate(mark);
        }
        let _ = fs::remove_file(&backup);
        Ok(accepted)
    }

    /// Forks one child per command sequence and adopts the smallest result.
    /// Returns the index of the adopted variant.
    fn race(
        &self,
        tool: &mut dyn Tool,
        variants: Vec<(&str, Vec<AbcCmd>)>,
        within: Option<Duration>,
    ) -> anyhow::Result<usize> {
        let before = tool.stats()?;
        let model = self.model;
        let tasks = variants
            .into_iter()
            .map(|(name, cmds)| {
                Task::new(name, move |t: &mut dyn Tool| {
                    t.exec_all(&cmds)?;
                    t.stats()
                })
            })
            .collect();
        let metric = move |s: &NetStats| model.cost(&before, s);
        let policy = match within {
            Some(w) => Policy::best_within(metric, w),
            None => Policy::best_by(metric),
        };
        let res = fork_all(tool, tasks, policy, self.grace)?;
        match res.winner() {
            Some(w) => {
                debug!("simp: {} wins with {}", w.name, w.value);
                Ok(w.task)
            }
            None => anyhow::bail!("no variant finished"),
        }
    }

    fn sweep(&mut self, tool: &mut dyn Tool) -> anyhow::Result<()> {
        tool.exec(&AbcCmd::Scl)?;
        let s = tool.stats()?;
        if s.pos <= 1 && s.ands <= self.cfg.constr_max_ands {
            tool.exec_all(&[AbcCmd::ExtractConstraints, AbcCmd::FoldConstraints])?;
        }
        Ok(())
    }

    fn core(&mut self, tool: &mut dyn Tool, budget: &Budget) -> anyhow::Result<()> {
        let s = tool.stats()?;
        if s.ands > LARGE_ANDS {
            tool.exec_all(&[AbcCmd::Drw, AbcCmd::Scl])?;
        } else if s.ands > SMALL_ANDS {
            tool.exec_all(&[AbcCmd::Dc2, AbcCmd::Scl])?;
        } else {
            tool.exec_all(&[AbcCmd::Dc2, AbcCmd::Dc2, AbcCmd::Scl])?;
        }
        tool.exec(&AbcCmd::Lcorr)?;
        let ands = tool.stats()?.ands.max(1);
        let mut k = (self.cfg.scorr_ands / ands).clamp(1, self.cfg.scorr_depth);
        loop {
            let before = tool.stats()?;
            tool.exec(&AbcCmd::Scorr {
                const_only: false,
                depth: Some(k),
            })?;
            let after = tool.stats()?;
            debug!("simp: scorr -F {k}: {after}");
            if self.model.cost(&before, &after) >= 0.0
                || k >= self.cfg.scorr_depth
                || budget.is_exhausted()
            {
                break;
            }
            k = (k * 2).min(self.cfg.scorr_depth);
        }
        Ok(())
    }

    pub fn run(
        &mut self,
        tool: &mut dyn Tool,
        history: &mut History,
        budget: Budget,
    ) -> anyhow::Result<SimplifyReport> {
        let before = tool.stats()?;
        let mut report = SimplifyReport {
            before,
            after: before,
            phase_factor: 1,
            stages: Vec::new(),
        };
        if self.cfg.disable {
            return Ok(report);
        }
        info!("simp: start on {before}");

        let ok = self.try_stage(tool, history, Stage::Sweep, None, 1, |s, t| s.sweep(t))?;
        report.stages.push((Stage::Sweep, ok));

        if tool.stats()?.latches > 0 && !budget.is_exhausted() {
            let ok = self.try_stage(tool, history, Stage::Retime, None, 1, |s, t| {
                s.race(
                    t,
                    vec![
                        ("dretime -m", vec![AbcCmd::Dretime { min: true }]),
                        (
                            "dretime; lcorr",
                            vec![AbcCmd::Dretime { min: false }, AbcCmd::Lcorr],
                        ),
                    ],
                    None,
                )
                .map(|_| ())
            })?;
            report.stages.push((Stage::Retime, ok));
        }

        if !budget.is_exhausted() {
            let ok = self.try_stage(tool, history, Stage::Core, None, 1, |s, t| {
                s.core(t, &budget)
            })?;
            report.stages.push((Stage::Core, ok));
        }

        if !self.cfg.no_tempor && tool.stats()?.latches > 0 && !budget.is_exhausted() {
            let within = budget.capped(Duration::from_secs(self.cfg.tempor_budget));
            let k = self.cfg.tempor_frames.max(1);
            // frames removed by each variant, in race order
            let removed = [k, k, 2 * k];
            let mut frames = k;
            let kind = Transform::Tempor { frames };
            let ok = self.try_stage(tool, history, Stage::Tempor, Some(kind), 1, |s, t| {
                let tempor = |simple| AbcCmd::Tempor {
                    simple,
                    frames: Some(k),
                };
                let w = s.race(
                    t,
                    vec![
                        ("tempor -s", vec![tempor(true), AbcCmd::Scl]),
                        ("tempor", vec![tempor(false), AbcCmd::Scl]),
                        (
                            "tempor twin",
                            vec![tempor(false), AbcCmd::Scl, tempor(false), AbcCmd::Scl],
                        ),
                    ],
                    Some(within),
                )?;
                frames = removed[w];
                Ok(())
            })?;
            if ok {
                history.retag(Transform::Tempor { frames });
            }
            report.stages.push((Stage::Tempor, ok));
        }

        if !self.cfg.no_phase && tool.stats()?.latches > 0 && !budget.is_exhausted() {
            let n = tool.n_phases()?;
            if n > 1 {
                let p = smallest_divisor(n);
                let ok = self.try_stage(
                    tool,
                    history,
                    Stage::Phase,
                    Some(Transform::Phase { period: p }),
                    p,
                    |_, t| {
                        t.exec_all(&[AbcCmd::Phase { frames: p }, AbcCmd::Scl])?;
                        Ok(())
                    },
                )?;
                if ok {
                    report.phase_factor *= p;
                }
                report.stages.push((Stage::Phase, ok));
            }
        }

        if !self.cfg.no_reparam && tool.stats()?.pis > 0 && !budget.is_exhausted() {
            let ok = self.try_stage(
                tool,
                history,
                Stage::Reparam,
                Some(Transform::Reparam),
                1,
                |_, t| reparam(t),
            )?;
            report.stages.push((Stage::Reparam, ok));
        }

        report.after = tool.stats()?;
        info!("simp: {} -> {}", report.before, report.after);
        Ok(report)
    }
}

/// Input reduction; keeps at least one PI.
pub fn reparam(tool: &mut dyn Tool) -> anyhow::Result<()> {
    let out = tool.file("reparam");
    tool.exec(&AbcCmd::Reparam { out: out.clone() })?;
    let _ = fs::remove_file(&out);
    if tool.stats()?.pis == 0 {
        tool.exec(&AbcCmd::AddPi)?;
    }
    Ok(())
}

/// Smallest divisor greater than one.
pub fn smallest_divisor(n: usize) -> usize {
    (2..=n).find(|d| n % d == 0).unwrap_or(n)
}
