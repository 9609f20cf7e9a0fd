mod engine;

pub use engine::*;

use crate::{
    Verdict,
    abc::{AbcCmd, Cex, Tool},
    config::{Config, PortfolioConfig},
    split::{Policy, Task, fork_all},
};
use log::{debug, info};
use std::{cell::Cell, time::Duration};

/// Verdicts that end a portfolio call.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StopOn {
    pub unsat: bool,
    pub sat: bool,
    pub unknown: bool,
}

impl StopOn {
    pub const DEFINITE: StopOn = StopOn {
        unsat: true,
        sat: true,
        unknown: false,
    };
    pub const SAT: StopOn = StopOn {
        unsat: false,
        sat: true,
        unknown: false,
    };
    pub const ANY: StopOn = StopOn {
        unsat: true,
        sat: true,
        unknown: true,
    };

    pub fn accepts(&self, v: Verdict) -> bool {
        match v {
            Verdict::Sat => self.sat,
            Verdict::Unsat => self.unsat,
            Verdict::Unknown => self.unknown,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortfolioOutcome {
    pub winner: Option<String>,
    pub verdict: Verdict,
    pub timed_out: bool,
    /// Deepest frame any engine proved free of failures.
    pub depth: Option<usize>,
}

impl PortfolioOutcome {
    pub fn undecided(timed_out: bool, depth: Option<usize>) -> Self {
        Self {
            winner: None,
            verdict: Verdict::Unknown,
            timed_out,
            depth,
        }
    }
}

enum Reply {
    Engine(Verdict, Option<usize>),
    Timeout,
}

/// Whole seconds handed to the tool for a wall-clock limit.
pub fn engine_secs(d: Duration) -> u64 {
    d.as_secs_f64().ceil().max(1.0) as u64
}

/// Runs one engine on a fork; yields its verdict and proved depth.
pub fn engine_task(run: EngineRun, secs: u64) -> Task<(Verdict, Option<usize>)> {
    let cmds = run.kind.commands(secs, run.seed);
    Task::new(run.name(), move |t: &mut dyn Tool| {
        t.exec_all(&cmds)?;
        let st = t.status()?;
        Ok((st.verdict, st.depth))
    })
}

/// Completes after `d` unless cancelled.
pub fn sleeper_task(d: Duration) -> Task<()> {
    Task::new("sleep", move |t: &mut dyn Tool| {
        anyhow::ensure!(t.ctrl().sleep(d), "sleeper cancelled");
        Ok(())
    })
}

/// Per-PO outcome of a multi-output sweep.
#[derive(Clone, Debug, Default)]
pub struct SweepResult {
    pub statuses: Vec<Verdict>,
    pub cexs: Vec<Option<Cex>>,
    /// Deepest frame a run proved free of failures on every PO.
    pub depth: Option<usize>,
}

impl SweepResult {
    fn merge(&mut self, statuses: Vec<Verdict>, cexs: Vec<Option<Cex>>) {
        let n = self.statuses.len().max(statuses.len());
        self.statuses.resize(n, Verdict::Unknown);
        self.cexs.resize(n, None);
        for (i, (v, c)) in statuses.into_iter().zip(cexs).enumerate() {
            match (self.statuses[i], v) {
                (Verdict::Sat, _) => (),
                (_, Verdict::Sat) => {
                    self.statuses[i] = Verdict::Sat;
                    self.cexs[i] = c;
                }
                (Verdict::Unknown, Verdict::Unsat) => self.statuses[i] = Verdict::Unsat,
                _ => (),
            }
        }
    }

    pub fn count(&self, v: Verdict) -> usize {
        self.statuses.iter().filter(|s| **s == v).count()
    }
}

/// Races verification engines on the current network of a tool.
pub struct Portfolio {
    cfg: PortfolioConfig,
    slots: usize,
    seed: u64,
}

impl Portfolio {
    pub fn new(cfg: &Config) -> Self {
        Self {
            cfg: cfg.portfolio.clone(),
            slots: cfg.workers,
            seed: cfg.rseed,
        }
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.cfg.grace_ms)
    }

    /// Engines sized for the current network.
    pub fn select(&self, tool: &mut dyn Tool) -> anyhow::Result<Vec<EngineRun>> {
        let stats = tool.stats()?;
        let depth = tool.status()?.depth;
        Ok(select_engines(&stats, depth, self.slots, self.seed))
    }

    pub fn verify_auto(
        &self,
        tool: &mut dyn Tool,
        timeout: Duration,
        stop: StopOn,
    ) -> anyhow::Result<PortfolioOutcome> {
        let engines = self.select(tool)?;
        self.verify(tool, &engines, timeout, stop)
    }

    /// Runs multi-output engines in parallel and merges their per-PO
    /// statuses. With `gap`, the others are cancelled `gap` after the first
    /// run that falsifies some PO.
    pub fn sweep(
        &self,
        tool: &mut dyn Tool,
        runs: Vec<(String, Vec<AbcCmd>)>,
        gap: Option<Duration>,
    ) -> anyhow::Result<SweepResult> {
        let n = tool.stats()?.pos;
        let tasks = runs
            .into_iter()
            .map(|(name, cmds)| {
                Task::new(name, move |t: &mut dyn Tool| {
                    t.exec_all(&cmds)?;
                    Ok((t.status_vector()?, t.cex_vector()?, t.status()?.depth))
                })
            })
            .collect();
        type Vectors = (Vec<Verdict>, Vec<Option<Cex>>, Option<usize>);
        let policy = match gap {
            Some(gap) => Policy::gapped(
                |(s, _, _): &Vectors| s.contains(&Verdict::Sat),
                gap,
            ),
            None => Policy::All,
        };
        let res = fork_all(tool, tasks, policy, self.grace())?;
        let mut out = SweepResult {
            statuses: vec![Verdict::Unknown; n],
            cexs: vec![None; n],
            depth: None,
        };
        for f in res.finished {
            let (s, c, depth) = f.value;
            out.depth = out.depth.max(depth);
            debug!(
                "portfolio: sweep {} falsified {} outputs",
                f.name,
                s.iter().filter(|v| **v == Verdict::Sat).count()
            );
            out.merge(s, c);
        }
        out.statuses.truncate(n);
        out.cexs.truncate(n);
        Ok(out)
    }

    /// Forks every engine plus a sleeper. The first engine whose verdict
    /// `stop` accepts wins and its post-state is adopted; the sleeper ends the
    /// call once the timeout, extended once at `pace_at`, runs out.
    pub fn verify(
        &self,
        tool: &mut dyn Tool,
        engines: &[EngineRun],
        timeout: Duration,
        stop: StopOn,
    ) -> anyhow::Result<PortfolioOutcome> {
        if timeout.is_zero() || engines.is_empty() {
            return Ok(PortfolioOutcome::undecided(timeout.is_zero(), None));
        }
        let (pace_at, pace_bump) = (self.cfg.pace_at, self.cfg.pace_bump);
        let total = timeout.mul_f64(1.0 + pace_bump);
        let secs = engine_secs(total);
        let mut tasks: Vec<Task<Reply>> = engines
            .iter()
            .map(|run| engine_task(*run, secs).map(|(v, d)| Reply::Engine(v, d)))
            .collect();
        tasks.push(Task::new("sleep", move |t: &mut dyn Tool| {
            let ctrl = t.ctrl();
            let first = timeout.mul_f64(pace_at);
            anyhow::ensure!(ctrl.sleep(first), "sleeper cancelled");
            debug!("portfolio: pacing, timeout extended to {total:.1?}");
            anyhow::ensure!(ctrl.sleep(total.saturating_sub(first)), "sleeper cancelled");
            Ok(Reply::Timeout)
        }));
        let n_engines = engines.len();
        let replies = Cell::new(0usize);
        let policy = Policy::first(move |r: &Reply| match r {
            Reply::Timeout => true,
            Reply::Engine(v, _) => {
                replies.set(replies.get() + 1);
                stop.accepts(*v) || replies.get() == n_engines
            }
        });
        for run in engines {
            info!("portfolio: start engine {}", run.name());
        }
        let res = fork_all(tool, tasks, policy, self.grace())?;
        let depth = res
            .finished
            .iter()
            .filter_map(|f| match f.value {
                Reply::Engine(_, d) => d,
                Reply::Timeout => None,
            })
            .max();
        let Some(win) = res.into_winner() else {
            info!("portfolio: all engines exited without a verdict");
            return Ok(PortfolioOutcome::undecided(false, depth));
        };
        match win.value {
            Reply::Timeout => {
                info!("portfolio: timeout after {:.1?}", win.elapsed);
                Ok(PortfolioOutcome::undecided(true, depth))
            }
            Reply::Engine(v, _) if stop.accepts(v) => {
                info!("portfolio: {} reports {v} after {:.1?}", win.name, win.elapsed);
                Ok(PortfolioOutcome {
                    winner: Some(win.name),
                    verdict: v,
                    timed_out: false,
                    depth,
                })
            }
            Reply::Engine(..) => {
                info!("portfolio: no engine reached a verdict");
                Ok(PortfolioOutcome::undecided(false, depth))
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::abc::{
        AbcCmd, NetStats, ToolCtrl,
        mock::{MockNet, MockTool, cex_at},
    };
    use std::time::Instant;

    pub(crate) fn portfolio(slots: usize) -> Portfolio {
        let mut cfg = Config::default();
        cfg.workers = slots;
        cfg.portfolio.grace_ms = 50;
        Portfolio::new(&cfg)
    }

    /// `bmc3` finds a bug at frame `bug` when set, `pdr` proves the network
    /// when `safe` is set, every other engine idles until cancelled.
    pub(crate) fn engines(cmd: &AbcCmd, net: &mut MockNet, ctrl: &ToolCtrl) -> anyhow::Result<String> {
        match cmd {
            AbcCmd::Bmc3 { .. } if net.var("bug") > 0 => {
                let f = net.var("bug") as usize;
                net.set_sat(cex_at(0, net.stats.latches, f + 1, &[true, false, true]), "bmc3");
            }
            AbcCmd::Pdr { seed: None, .. } if net.var("safe") > 0 => net.set_unsat("pdr"),
            c if c.is_engine() => {
                ctrl.sleep(Duration::from_secs(30));
            }
            _ => (),
        }
        Ok(String::new())
    }

    #[test]
    fn shallow_bug_is_reported_by_bmc() {
        let dir = tempfile::tempdir().unwrap();
        let mut net = MockNet::new(NetStats::new(3, 1, 10, 100));
        net.set_var("bug", 3);
        let mut t = MockTool::new(dir.path(), net, engines);
        let p = portfolio(8);
        let out = p
            .verify_auto(&mut t, Duration::from_secs(10), StopOn::DEFINITE)
            .unwrap();
        assert_eq!(out.verdict, Verdict::Sat);
        assert_eq!(out.winner.as_deref(), Some("BMC_fwd"));
        let cex = t.cex().unwrap().unwrap();
        assert_eq!(cex.n_frames(), 4);
        assert_eq!(cex.inputs[3], vec![true, false, true]);
    }

    #[test]
    fn sleeper_ends_the_call() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = MockTool::new(dir.path(), MockNet::new(NetStats::new(3, 1, 10, 100)), engines);
        let p = portfolio(4);
        let begin = Instant::now();
        let out = p
            .verify_auto(&mut t, Duration::from_millis(200), StopOn::DEFINITE)
            .unwrap();
        assert!(out.timed_out);
        assert_eq!(out.verdict, Verdict::Unknown);
        assert!(begin.elapsed() < Duration::from_secs(5));
        assert_eq!(t.status().unwrap().verdict, Verdict::Unknown);
    }

    #[test]
    fn stop_policy_filters_verdicts() {
        let dir = tempfile::tempdir().unwrap();
        let mut net = MockNet::new(NetStats::new(3, 1, 10, 100));
        net.set_var("safe", 1);
        let mut t = MockTool::new(dir.path(), net, engines);
        let p = portfolio(4);
        let out = p
            .verify_auto(&mut t, Duration::from_millis(300), StopOn::SAT)
            .unwrap();
        assert!(out.timed_out);
        let out = p
            .verify_auto(&mut t, Duration::from_secs(10), StopOn::DEFINITE)
            .unwrap();
        assert_eq!(out.verdict, Verdict::Unsat);
        assert_eq!(out.winner.as_deref(), Some("PDR_default"));
    }
}
