//! Resolves each PO of a multi-output network separately.

mod iso;
mod verdict;

pub use iso::po_classes;
pub use verdict::{PoVerdicts, Progress, fold_phase_verdicts};

use crate::{
    Budget, Verdict,
    abc::{AbcCmd, Tool},
    config::Config,
    history::History,
    portfolio::{Portfolio, StopOn, engine_secs},
    simplify::Simplifier,
};
use log::{debug, info, warn};
use rand::{Rng, SeedableRng, rngs::StdRng};
use std::time::Duration;

/// POs of the current network, each standing for the original POs whose
/// verdict it decides.
struct Outputs {
    stand: Vec<Vec<usize>>,
}

impl Outputs {
    fn identity(n: usize) -> Self {
        Self {
            stand: (0..n).map(|i| vec![i]).collect(),
        }
    }

    #[inline]
    fn len(&self) -> usize {
        self.stand.len()
    }

    #[inline]
    fn is_empty(&self) -> bool {
        self.stand.is_empty()
    }

    fn resolve(&self, verdicts: &mut PoVerdicts, po: usize, v: Verdict, stage: &str) {
        for &orig in &self.stand[po] {
            verdicts.set(orig, v, stage);
        }
    }

    /// Drops current POs from the network and the table.
    fn remove(&mut self, tool: &mut dyn Tool, pos: &[usize]) -> anyhow::Result<()> {
        let mut pos = pos.to_vec();
        pos.sort_unstable();
        pos.dedup();
        if pos.is_empty() {
            return Ok(());
        }
        if pos.len() == self.len() {
            self.stand.clear();
            return Ok(());
        }
        let cmds: Vec<AbcCmd> = pos.iter().rev().map(|i| AbcCmd::RemovePo(*i)).collect();
        tool.exec_all(&cmds)?;
        for i in pos.iter().rev() {
            self.stand.remove(*i);
        }
        Ok(())
    }
}

pub struct MultiSolver<'a> {
    cfg: &'a Config,
    portfolio: &'a Portfolio,
}

impl<'a> MultiSolver<'a> {
    pub fn new(cfg: &'a Config, portfolio: &'a Portfolio) -> Self {
        Self { cfg, portfolio }
    }

    /// Constant-0 POs hold trivially.
    fn trivial(
        &self,
        tool: &mut dyn Tool,
        outs: &mut Outputs,
        verdicts: &mut PoVerdicts,
    ) -> anyhow::Result<()> {
        let zeros = tool.aig()?.const0_properties();
        for &i in &zeros {
            outs.resolve(verdicts, i, Verdict::Unsat, "trivial");
        }
        outs.remove(tool, &zeros)
    }

    /// Gapped multi-output races with growing time and gap, until a round
    /// resolves nothing. Each member gets its own seed; BMC resumes after the
    /// deepest frame proved so far and simulation starts at a random frame
    /// up to it.
    fn sweep(
        &self,
        tool: &mut dyn Tool,
        outs: &mut Outputs,
        verdicts: &mut PoVerdicts,
        progress: &mut Progress,
        budget: &Budget,
    ) -> anyhow::Result<()> {
        let m = &self.cfg.multi;
        let mut rng = StdRng::seed_from_u64(self.cfg.rseed);
        let mut deepest: Option<usize> = None;
        for round in 0..m.sweep_rounds {
            if outs.is_empty() || budget.is_exhausted() {
                break;
            }
            let scale = 1u64 << round.min(16);
            let secs = engine_secs(budget.capped(Duration::from_secs(m.sweep_timeout * scale)));
            let gap = Duration::from_secs(m.sweep_gap * scale);
            let sim_seed = rng.random_range(0..1_000_000);
            let pdr_seed = (sim_seed + rng.random_range(1..1_000_000)) % 1_000_000;
            let resume = deepest.map(|d| d + 1);
            let sim_start = rng.random_range(0..=resume.unwrap_or(0));
            let runs = vec![
                (
                    "sim3".to_string(),
                    vec![AbcCmd::Sim3 {
                        timeout: secs,
                        seed: sim_seed,
                        start: sim_start,
                        all: true,
                    }],
                ),
                (
                    "bmc3".to_string(),
                    vec![AbcCmd::Bmc3 {
                        timeout: secs,
                        frames: None,
                        start: resume,
                        all: true,
                    }],
                ),
                (
                    "pdr".to_string(),
                    vec![AbcCmd::Pdr {
                        timeout: secs,
                        seed: Some(pdr_seed),
                        all: true,
                    }],
                ),
            ];
            let res = self.portfolio.sweep(tool, runs, Some(gap))?;
            deepest = deepest.max(res.depth);
            let mut solved = Vec::new();
            for (i, v) in res.statuses.iter().enumerate() {
                if v.is_definite() {
                    outs.resolve(verdicts, i, *v, "sweep");
                    solved.push(i);
                }
            }
            outs.remove(tool, &solved)?;
            progress.record(&format!("sweep {round}"), verdicts)?;
            if solved.is_empty() {
                break;
            }
        }
        Ok(())
    }

    /// Keeps one representative per isomorphism class.
    fn merge_isomorphic(&self, tool: &mut dyn Tool, outs: &mut Outputs) -> anyhow::Result<()> {
        let classes = po_classes(&tool.aig()?);
        let mut drop = Vec::new();
        for class in classes.iter() {
            for &m in &class[1..] {
                let s = std::mem::take(&mut outs.stand[m]);
                outs.stand[class[0]].extend(s);
                drop.push(m);
            }
        }
        info!("mo: {} outputs in {} classes", outs.len(), classes.len());
        outs.remove(tool, &drop)
    }

    fn apply(
        &self,
        outs: &Outputs,
        verdicts: &mut PoVerdicts,
        local: &[Verdict],
        period: usize,
        stage: &str,
    ) {
        for (j, v) in fold_phase_verdicts(local, period).into_iter().enumerate() {
            outs.resolve(verdicts, j, v, stage);
        }
    }

    /// Simplifies, then solves cones one by one and finally the OR of what
    /// is left. Verdicts of a phase-unrolled network are folded back.
    fn resolve_rest(
        &self,
        tool: &mut dyn Tool,
        history: &mut History,
        outs: &mut Outputs,
        verdicts: &mut PoVerdicts,
        progress: &mut Progress,
        budget: &Budget,
    ) -> anyhow::Result<()> {
        let n = outs.len();
        let pre = tool.file("mo_presimp");
        tool.save(&pre)?;
        let mark = history.len();
        let simp_budget = budget.sub(budget.remaining() / 4);
        let report = Simplifier::new(self.cfg).run(tool, history, simp_budget)?;
        let mut period = report.phase_factor;
        let pos = tool.stats()?.pos;
        if pos != n * period {
            warn!("mo: simplification changed the outputs ({n} -> {pos}), undoing");
            history.truncate(mark);
            tool.load(&pre)?;
            period = 1;
        }

        let mut local = vec![Verdict::Unknown; n * period];
        let classes = if period > 1 && !self.cfg.multi.no_iso {
            po_classes(&tool.aig()?)
        } else {
            (0..local.len()).map(|i| vec![i]).collect()
        };
        let cur = tool.file("mo_cur");
        tool.save(&cur)?;
        for class in classes.iter() {
            if budget.is_exhausted() {
                break;
            }
            let rep = class[0];
            tool.load(&cur)?;
            tool.exec(&AbcCmd::Cone(rep))?;
            let timeout = budget.capped(Duration::from_secs(self.cfg.multi.cone_timeout));
            let out = self.portfolio.verify_auto(tool, timeout, StopOn::DEFINITE)?;
            debug!("mo: cone {rep} ({} members) is {}", class.len(), out.verdict);
            for &m in class {
                local[m] = out.verdict;
            }
        }
        tool.load(&cur)?;
        self.apply(outs, verdicts, &local, period, "cone");
        progress.record("cones", verdicts)?;

        let open: Vec<usize> = (0..local.len())
            .filter(|i| local[*i] == Verdict::Unknown)
            .collect();
        if open.is_empty() || budget.is_exhausted() {
            return Ok(());
        }
        let closed: Vec<AbcCmd> = (0..local.len())
            .rev()
            .filter(|i| local[*i] != Verdict::Unknown)
            .map(AbcCmd::RemovePo)
            .collect();
        if !closed.is_empty() {
            tool.exec_all(&closed)?;
        }
        if open.len() > 1 {
            tool.exec(&AbcCmd::OrPos)?;
        }
        let out = self
            .portfolio
            .verify_auto(tool, budget.remaining(), StopOn::DEFINITE)?;
        if out.verdict == Verdict::Unsat {
            for i in open {
                local[i] = Verdict::Unsat;
            }
        }
        tool.load(&cur)?;
        self.apply(outs, verdicts, &local, period, "final");
        progress.record("final", verdicts)
    }

    /// Verdict per PO of the current network. The network and the history
    /// are as on entry when this returns.
    pub fn run(
        &self,
        tool: &mut dyn Tool,
        history: &mut History,
        budget: Budget,
    ) -> anyhow::Result<PoVerdicts> {
        let base = tool.name().to_string();
        let dir = tool.work_dir().to_path_buf();
        let n = tool.stats()?.pos;
        let mark = history.len();
        let entry = tool.file("mo_entry");
        tool.save(&entry)?;
        info!("mo: start on {n} outputs");

        let mut verdicts = PoVerdicts::new(n);
        let mut progress = Progress::new(dir.join(format!("{base}_progress.txt")), &verdicts);
        let mut outs = Outputs::identity(n);

        self.trivial(tool, &mut outs, &mut verdicts)?;
        progress.record("trivial", &verdicts)?;
        self.sweep(tool, &mut outs, &mut verdicts, &mut progress, &budget)?;
        if outs.len() > 1 && !self.cfg.multi.no_iso {
            self.merge_isomorphic(tool, &mut outs)?;
            progress.record("iso", &verdicts)?;
        }
        if !outs.is_empty() && !budget.is_exhausted() {
            self.resolve_rest(tool, history, &mut outs, &mut verdicts, &mut progress, &budget)?;
        }

        history.truncate(mark);
        tool.load(&entry)?;
        verdicts.save(&dir.join(format!("{base}_verdicts.ron")))?;
        verdicts.write_results(&dir.join(format!("results_{n}.txt")))?;
        let (sat, unsat, unknown) = verdicts.counts();
        info!("mo: done, SAT={sat} UNSAT={unsat} UNKNOWN={unknown}");
        Ok(verdicts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        abc::{
            Aig, NetStats, ToolCtrl,
            mock::{MockNet, MockTool, cex_at, engine_calls},
        },
        portfolio::tests::portfolio,
    };
    use iso::tests::{Shape, add_cone};
    use std::fs;

    /// Kind 1 cones fail, kind 2 cones hold. `sim3 -a` falsifies kind 1
    /// outputs when `sim_finds` is set.
    fn cones(cmd: &AbcCmd, net: &mut MockNet, ctrl: &ToolCtrl) -> anyhow::Result<String> {
        let outputs = net.aig.as_ref().map(|a| a.outputs.clone()).unwrap_or_default();
        let kind = |net: &MockNet, lit: u32| net.var(&format!("kind_{lit}"));
        match cmd {
            AbcCmd::Cone(i) => {
                let k = kind(net, outputs[*i]);
                net.set_var("cone", k);
                net.stats.pos = 1;
            }
            AbcCmd::Sim3 { all: true, .. } if net.var("sim_finds") > 0 => {
                net.statuses = outputs
                    .iter()
                    .map(|l| match kind(net, *l) {
                        1 => Verdict::Sat,
                        _ => Verdict::Unknown,
                    })
                    .collect();
            }
            AbcCmd::Bmc3 { all: true, .. } if net.var("bmc_depth") > 0 => {
                net.status.depth = Some(net.var("bmc_depth") as usize);
            }
            AbcCmd::Sim3 { all: true, .. }
            | AbcCmd::Bmc3 { all: true, .. }
            | AbcCmd::Pdr { all: true, .. } => (),
            AbcCmd::Bmc3 { .. } if net.var("cone") == 1 => {
                net.set_sat(cex_at(0, net.stats.latches, 2, &[true]), "bmc3");
            }
            AbcCmd::Pdr { seed: None, .. } if net.var("cone") == 2 => net.set_unsat("pdr"),
            c if c.is_engine() => {
                ctrl.sleep(Duration::from_secs(30));
            }
            _ => (),
        }
        Ok(String::new())
    }

    fn network(shapes: &[Shape]) -> MockNet {
        let mut aig = Aig::default();
        let mut net = MockNet::default();
        for s in shapes {
            let lit = add_cone(&mut aig, *s);
            let k = match s {
                Shape::Delay | Shape::DelayOne => 1,
                Shape::Gated | Shape::GatedInv => 2,
            };
            net.set_var(&format!("kind_{lit}"), k);
        }
        net.stats = NetStats::new(
            aig.inputs.len(),
            aig.outputs.len(),
            aig.latchs.len(),
            aig.ands.len(),
        );
        net.aig = Some(aig);
        net
    }

    fn config(rounds: usize) -> Config {
        let mut cfg = Config::default();
        cfg.multi.sweep_rounds = rounds;
        cfg.simp.disable = true;
        cfg
    }

    #[test]
    fn isomorphic_pairs_are_solved_once() {
        use Shape::*;
        let dir = tempfile::tempdir().unwrap();
        let net = network(&[Delay, Delay, Gated, Gated, DelayOne, DelayOne, GatedInv, GatedInv]);
        let mut t = MockTool::new(dir.path(), net, cones);
        let log = t.issued();
        let cfg = config(0);
        let p = portfolio(4);
        let mut h = History::new("m");
        let v = MultiSolver::new(&cfg, &p)
            .run(&mut t, &mut h, Budget::new(Duration::from_secs(60)))
            .unwrap();
        assert_eq!(v.as_i8(), vec![1, 1, 0, 0, 1, 1, 0, 0]);
        let cones = log
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.contains("&cone"))
            .count();
        assert_eq!(cones, 4);
        assert_eq!(t.stats().unwrap().pos, 8);
        let results = fs::read_to_string(dir.path().join("results_8.txt")).unwrap();
        assert_eq!(results.lines().count(), 8);
    }

    #[test]
    fn constant_output_needs_no_engine() {
        let dir = tempfile::tempdir().unwrap();
        let mut net = MockNet::new(NetStats::new(3, 1, 5, 0));
        net.aig = Some(Aig {
            outputs: vec![0],
            ..Default::default()
        });
        let mut t = MockTool::new(dir.path(), net, cones);
        let log = t.issued();
        let cfg = config(3);
        let p = portfolio(4);
        let mut h = History::new("m");
        let v = MultiSolver::new(&cfg, &p)
            .run(&mut t, &mut h, Budget::new(Duration::from_secs(60)))
            .unwrap();
        assert_eq!(v.as_slice(), &[Verdict::Unsat]);
        assert_eq!(engine_calls(&log), 0);
    }

    #[test]
    fn sweep_hits_leave_the_network() {
        use Shape::*;
        let dir = tempfile::tempdir().unwrap();
        let mut net = network(&[Delay, Gated, GatedInv]);
        net.set_var("sim_finds", 1);
        let mut t = MockTool::new(dir.path(), net, cones);
        let log = t.issued();
        let cfg = config(2);
        let p = portfolio(4);
        let mut h = History::new("m");
        let v = MultiSolver::new(&cfg, &p)
            .run(&mut t, &mut h, Budget::new(Duration::from_secs(60)))
            .unwrap();
        assert_eq!(v.as_i8(), vec![1, 0, 0]);
        assert!(log.lock().unwrap().iter().any(|c| c == "removepo -N 0"));
        let progress = fs::read_to_string(dir.path().join("mock_progress.txt")).unwrap();
        assert!(progress.contains("sweep 0: SAT=1 UNSAT=0 UNKNOWN=2"));
        let results = fs::read_to_string(dir.path().join("results_3.txt")).unwrap();
        assert!(results.starts_with("0 SAT sweep\n"));
    }

    #[test]
    fn sweep_rounds_resume_bmc_with_fresh_seeds() {
        use Shape::*;
        let dir = tempfile::tempdir().unwrap();
        let mut net = network(&[Delay, Gated, GatedInv]);
        net.set_var("sim_finds", 1);
        net.set_var("bmc_depth", 7);
        let mut t = MockTool::new(dir.path(), net, cones);
        let log = t.issued();
        let cfg = config(2);
        let p = portfolio(4);
        let mut h = History::new("m");
        MultiSolver::new(&cfg, &p)
            .run(&mut t, &mut h, Budget::new(Duration::from_secs(60)))
            .unwrap();
        let log = log.lock().unwrap();
        let seed = |c: &str, flag: &str| {
            let at = c.find(flag).unwrap() + flag.len();
            c[at..].split_whitespace().next().unwrap().to_string()
        };
        let bmc: Vec<&String> = log
            .iter()
            .filter(|c| c.starts_with("bmc3") && c.ends_with("-a"))
            .collect();
        assert_eq!(bmc.len(), 2);
        assert!(!bmc[0].contains("-S"));
        assert!(bmc[1].ends_with("-S 8 -a"));
        let sims: Vec<String> = log
            .iter()
            .filter(|c| c.starts_with("sim3") && c.ends_with("-a"))
            .map(|c| seed(c, "-R "))
            .collect();
        let pdrs: Vec<String> = log
            .iter()
            .filter(|c| c.starts_with("pdr") && c.ends_with("-a"))
            .map(|c| seed(c, "-S "))
            .collect();
        assert_eq!(sims.len(), 2);
        assert_eq!(pdrs.len(), 2);
        assert_ne!(sims[0], pdrs[0]);
        assert_ne!(sims[1], pdrs[1]);
    }
}
