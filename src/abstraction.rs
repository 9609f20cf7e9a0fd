//! Counterexample- and proof-based abstraction with refinement.

use crate::{
    Budget, FlowError, ProofResult, Verdict,
    abc::{AbcCmd, AbsLevel, Cex, NetStats, Tool},
    config::{AbsConfig, Config},
    history::{History, Transform},
    lift::lift_cex,
    portfolio::{Portfolio, StopOn, engine_secs, engine_task, select_engines, sleeper_task},
    simplify::reparam,
    split::{Policy, Task, fork_all},
};
use log::{debug, info, warn};
use std::{path::PathBuf, time::Duration};

enum InitRace {
    Engine(Verdict),
    Abstraction,
    Timeout,
}

/// Restricts a CEX of the abstraction to the concrete network: abstracted
/// latches became PIs appended after the original ones.
fn concrete_cex(cex: &Cex, orig: &NetStats) -> Option<Cex> {
    if cex.n_pis < orig.pis {
        return None;
    }
    let inputs = cex.inputs.iter().map(|f| f[..orig.pis].to_vec()).collect();
    Cex::new(cex.po, vec![false; orig.latches], inputs).ok()
}

pub struct Abstraction<'a> {
    cfg: &'a AbsConfig,
    portfolio: &'a Portfolio,
    lift_timeout: u64,
}

/// Files of one abstraction run.
struct AbsFiles {
    orig: PathBuf,
    desc: PathBuf,
    derived: PathBuf,
    cex: PathBuf,
}

impl<'a> Abstraction<'a> {
    pub fn new(cfg: &'a Config, portfolio: &'a Portfolio) -> Self {
        Self {
            cfg: &cfg.abs,
            portfolio,
            lift_timeout: cfg.strategy.lift_timeout,
        }
    }

    fn restore(
        &self,
        tool: &mut dyn Tool,
        history: &mut History,
        mark: usize,
        files: &AbsFiles,
    ) -> anyhow::Result<()> {
        history.truncate(mark);
        tool.load(&files.orig)
    }

    /// Races the initial abstraction against the engines on the current
    /// network.
    fn initial(
        &self,
        tool: &mut dyn Tool,
        desc: &std::path::Path,
        budget: &Budget,
    ) -> anyhow::Result<InitRace> {
        let timeout = budget.capped(Duration::from_secs(self.cfg.init_timeout));
        let secs = engine_secs(timeout);
        let stats = tool.stats()?;
        let depth = tool.status()?.depth;
        let slots = self.portfolio.slots().saturating_sub(1).max(2);
        let mut tasks: Vec<_> = select_engines(&stats, depth, slots, 0)
            .into_iter()
            .map(|r| engine_task(r, secs).map(|(v, _)| InitRace::Engine(v)))
            .collect();
        let init = AbcCmd::AbsInit {
            level: self.cfg.level,
            timeout: secs,
            desc: desc.to_path_buf(),
        };
        tasks.push(
            Task::new("abs_init", move |t: &mut dyn Tool| {
                t.exec(&init)?;
                Ok(())
            })
            .map(|_| InitRace::Abstraction),
        );
        tasks.push(sleeper_task(timeout).map(|_| InitRace::Timeout));
        let policy = Policy::first(|r: &InitRace| match r {
            InitRace::Engine(v) => v.is_definite(),
            InitRace::Abstraction | InitRace::Timeout => true,
        });
        let res = fork_all(tool, tasks, policy, self.portfolio.grace())?;
        Ok(res
            .into_winner()
            .map_or(InitRace::Timeout, |w| w.value))
    }

    /// Size of an abstraction, in latches.
    fn size(&self, tool: &mut dyn Tool) -> anyhow::Result<usize> {
        Ok(tool.stats()?.latches)
    }

    /// On `UndecidedReduction` the tool is left on the reparameterized
    /// abstraction with its history entry pushed; on `SatTrue` it holds the
    /// entry network with a replayed CEX; otherwise the entry network is
    /// restored.
    pub fn run(
        &self,
        tool: &mut dyn Tool,
        history: &mut History,
        budget: Budget,
    ) -> anyhow::Result<ProofResult> {
        let desc_tag = match self.cfg.level {
            AbsLevel::Register => "greg",
            AbsLevel::Gate => "gla",
        };
        let files = AbsFiles {
            orig: tool.file("abs_orig"),
            desc: tool.file(desc_tag),
            derived: tool.file("gabs"),
            cex: tool.work_dir().join(format!("{}_abs_cex.status", tool.name())),
        };
        let mark = history.len();
        tool.save(&files.orig)?;
        let orig_stats = tool.stats()?;
        let orig_size = orig_stats.latches;
        info!("abs: start, {} latches", orig_size);

        match self.initial(tool, &files.desc, &budget)? {
            InitRace::Engine(v) => {
                info!("abs: portfolio decided {v} before abstraction");
                return Ok(match v {
                    Verdict::Sat => ProofResult::SatTrue,
                    Verdict::Unsat => ProofResult::Unsat,
                    Verdict::Unknown => ProofResult::UndecidedNoReduction,
                });
            }
            InitRace::Timeout => {
                info!("abs: initial abstraction did not finish");
                tool.load(&files.orig)?;
                return Ok(ProofResult::UndecidedNoReduction);
            }
            InitRace::Abstraction => (),
        }

        let mut prev_size: Option<usize> = None;
        let mut failures = 0;
        loop {
            if budget.is_exhausted() {
                info!("abs: budget exhausted");
                self.restore(tool, history, mark, &files)?;
                return Ok(ProofResult::Error(FlowError::Timeout));
            }
            tool.load(&files.orig)?;
            tool.exec(&AbcCmd::AbsDerive {
                level: self.cfg.level,
                desc: files.desc.clone(),
            })?;
            let size = self.size(tool)?;
            if size as f64 > self.cfg.ratio * orig_size as f64 {
                info!("abs: abstraction keeps {size} of {orig_size} latches");
                self.restore(tool, history, mark, &files)?;
                return Ok(ProofResult::UndecidedNoReduction);
            }
            if let Some(p) = prev_size {
                if size <= p {
                    failures += 1;
                    warn!("abs: refinement did not grow the abstraction ({p} -> {size})");
                    if failures >= 2 {
                        self.restore(tool, history, mark, &files)?;
                        return Ok(ProofResult::Error(FlowError::AbstractionFailedToRefine));
                    }
                } else {
                    failures = 0;
                }
            }
            prev_size = Some(size);
            info!("abs: abstraction has {} ({})", size, tool.stats()?);
            tool.save(&files.derived)?;
            history.push(tool, Transform::Reparam)?;
            reparam(tool)?;

            let timeout = budget.capped(Duration::from_secs(self.cfg.iter_timeout));
            let out = self.portfolio.verify_auto(tool, timeout, StopOn::DEFINITE)?;
            match out.verdict {
                Verdict::Unsat => {
                    info!("abs: abstraction proved by {:?}", out.winner);
                    self.restore(tool, history, mark, &files)?;
                    return Ok(ProofResult::Unsat);
                }
                Verdict::Unknown => {
                    info!("abs: abstraction undecided");
                    return Ok(ProofResult::UndecidedReduction);
                }
                Verdict::Sat => (),
            }

            let cex = match lift_cex(tool, history, mark, self.lift_timeout)? {
                Ok(c) => c,
                Err(e) => {
                    self.restore(tool, history, mark, &files)?;
                    return Ok(ProofResult::Error(e));
                }
            };
            tool.save_status(&files.cex)?;
            tool.load(&files.orig)?;
            if let Some(c) = concrete_cex(&cex, &orig_stats) {
                tool.set_cex(&c, "abs")?;
                if tool.test_cex()?.is_some() {
                    info!("abs: counterexample at frame {} is real", c.frame());
                    history.truncate(mark);
                    return Ok(ProofResult::SatTrue);
                }
            }
            let replay = budget.capped(Duration::from_secs(self.cfg.refine_timeout));
            tool.exec(&AbcCmd::Bmc3 {
                timeout: engine_secs(replay),
                frames: Some(cex.frame() + 1),
                start: None,
                all: false,
            })?;
            if tool.status()?.verdict == Verdict::Sat && tool.test_cex()?.is_some() {
                info!("abs: bmc confirms a failure by frame {}", cex.frame());
                history.truncate(mark);
                return Ok(ProofResult::SatTrue);
            }
            debug!("abs: counterexample at frame {} is spurious", cex.frame());
            tool.load_status(&files.cex)?;
            tool.exec(&AbcCmd::AbsRefine {
                level: self.cfg.level,
                timeout: engine_secs(replay),
                desc: files.desc.clone(),
            })?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        abc::{
            Cex, NetStats, ToolCtrl,
            mock::{MockNet, MockTool, cex_at},
        },
        portfolio::tests::portfolio,
    };
    use std::{fs, path::Path};

    fn read_desc(p: &Path) -> i64 {
        fs::read_to_string(p).map_or(0, |s| s.trim().parse().unwrap_or(0))
    }

    /// 200 latches of which only `needed` matter. The initial abstraction
    /// keeps `init` latches; each refinement adds one. Abstractions smaller
    /// than `needed` have a CEX at frame 2, spurious unless `real` is set.
    /// BMC never finds it on the concrete network.
    fn irrelevant_latches(
        cmd: &AbcCmd,
        net: &mut MockNet,
        ctrl: &ToolCtrl,
    ) -> anyhow::Result<String> {
        let abs = net.var("abs");
        match cmd {
            AbcCmd::AbsInit { desc, .. } => fs::write(desc, net.var("init").to_string())?,
            AbcCmd::AbsDerive { desc, .. } => {
                let k = read_desc(desc);
                net.set_var("abs", k);
                net.stats.pis += 200 - k as usize;
                net.stats.latches = k as usize;
            }
            AbcCmd::AbsRefine { desc, .. } => {
                let k = read_desc(desc) + net.var("grow");
                fs::write(desc, k.to_string())?;
            }
            AbcCmd::Reparam { .. } => net.stats.pis = 2,
            AbcCmd::Reconcile { .. } => {
                if let Some(c) = net.cex.clone() {
                    let inputs = vec![vec![false; net.stats.pis]; c.n_frames()];
                    net.set_sat(Cex::new(c.po, c.init.clone(), inputs)?, "reconcile");
                }
            }
            AbcCmd::TestCex => {
                return Ok(match &net.cex {
                    Some(c) if c.n_pis == net.stats.pis && (abs > 0 || net.var("real") != 0) => {
                        format!("CEX asserts output {} in frame {}.\n", c.po, c.frame())
                    }
                    _ => "does not fail\n".to_string(),
                });
            }
            AbcCmd::Bmc3 { frames: Some(_), .. } if abs == 0 => {
                net.status = Default::default();
                net.cex = None;
            }
            AbcCmd::Bmc3 { .. } if abs > 0 && abs < net.var("needed") => {
                net.set_sat(cex_at(0, abs as usize, 3, &vec![true; net.stats.pis]), "bmc3");
            }
            AbcCmd::Pdr { seed: None, .. } if abs >= net.var("needed") && abs > 0 => {
                net.set_unsat("pdr")
            }
            c if c.is_engine() => {
                ctrl.sleep(Duration::from_secs(30));
            }
            _ => (),
        }
        Ok(String::new())
    }

    fn setup(dir: &Path, init: i64, grow: i64) -> (MockTool, History) {
        let mut net = MockNet::new(NetStats::new(4, 1, 200, 3000));
        net.set_var("needed", 3);
        net.set_var("init", init);
        net.set_var("grow", grow);
        let mut t = MockTool::new(dir, net, irrelevant_latches);
        let mut h = History::new("m");
        h.push(&mut t, Transform::Initial).unwrap();
        (t, h)
    }

    #[test]
    fn spurious_cex_refines_then_proves() {
        let dir = tempfile::tempdir().unwrap();
        let (mut t, mut h) = setup(dir.path(), 2, 1);
        let log = t.issued();
        let cfg = Config::default();
        let p = portfolio(4);
        let res = Abstraction::new(&cfg, &p)
            .run(&mut t, &mut h, Budget::new(Duration::from_secs(60)))
            .unwrap();
        assert_eq!(res, ProofResult::Unsat);
        assert_eq!(read_desc(&t.file("gla")), 3);
        let refines = log
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.contains("&gla_refine"))
            .count();
        assert_eq!(refines, 1);
        assert_eq!(h.len(), 1);
        assert_eq!(t.stats().unwrap().latches, 200);
    }

    #[test]
    fn lifted_cex_is_replayed_on_the_concrete_network() {
        let dir = tempfile::tempdir().unwrap();
        let (mut t, mut h) = setup(dir.path(), 2, 1);
        t.net.set_var("real", 1);
        let log = t.issued();
        let cfg = Config::default();
        let p = portfolio(4);
        let res = Abstraction::new(&cfg, &p)
            .run(&mut t, &mut h, Budget::new(Duration::from_secs(60)))
            .unwrap();
        assert_eq!(res, ProofResult::SatTrue);
        let cex = t.cex().unwrap().unwrap();
        assert_eq!(cex.n_pis, 4);
        assert_eq!(cex.n_regs, 200);
        assert_eq!(cex.frame(), 2);
        assert!(!log.lock().unwrap().iter().any(|c| c.contains("&gla_refine")));
        assert_eq!(h.len(), 1);
    }

    #[test]
    fn refinement_without_growth_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let (mut t, mut h) = setup(dir.path(), 2, 0);
        let cfg = Config::default();
        let p = portfolio(4);
        let res = Abstraction::new(&cfg, &p)
            .run(&mut t, &mut h, Budget::new(Duration::from_secs(60)))
            .unwrap();
        assert_eq!(res, ProofResult::Error(FlowError::AbstractionFailedToRefine));
        assert_eq!(h.len(), 1);
    }

    #[test]
    fn oversized_abstraction_is_abandoned() {
        let dir = tempfile::tempdir().unwrap();
        let (mut t, mut h) = setup(dir.path(), 150, 1);
        let cfg = Config::default();
        let p = portfolio(4);
        let res = Abstraction::new(&cfg, &p)
            .run(&mut t, &mut h, Budget::new(Duration::from_secs(60)))
            .unwrap();
        assert_eq!(res, ProofResult::UndecidedNoReduction);
        assert_eq!(t.stats().unwrap().latches, 200);
    }
}
