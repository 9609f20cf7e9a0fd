//! Scripted in-memory tool used by the unit tests.

use super::{Aig, AbcCmd, Cex, NetStats, ProbStatus, StatusLog, Tool, ToolCtrl};
use crate::Verdict;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

/// Everything the mock knows about its current network.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MockNet {
    pub stats: NetStats,
    pub status: ProbStatus,
    pub cex: Option<Cex>,
    pub cexs: Vec<Option<Cex>>,
    pub statuses: Vec<Verdict>,
    pub aig: Option<Aig>,
    /// Free-form scenario state that travels with the network.
    pub vars: BTreeMap<String, i64>,
}

impl MockNet {
    pub fn new(stats: NetStats) -> Self {
        Self {
            stats,
            ..Default::default()
        }
    }

    pub fn var(&self, k: &str) -> i64 {
        self.vars.get(k).copied().unwrap_or(0)
    }

    pub fn set_var(&mut self, k: &str, v: i64) {
        self.vars.insert(k.to_string(), v);
    }

    pub fn write(&self, path: &Path) -> anyhow::Result<()> {
        fs::write(path, ron::to_string(self)?)?;
        Ok(())
    }

    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        Ok(ron::from_str(&text)?)
    }

    pub fn set_sat(&mut self, cex: Cex, engine: &str) {
        self.status = ProbStatus {
            verdict: Verdict::Sat,
            depth: cex.frame().checked_sub(1),
            engine: engine.to_string(),
        };
        self.cex = Some(cex);
    }

    pub fn set_unsat(&mut self, engine: &str) {
        self.status = ProbStatus {
            verdict: Verdict::Unsat,
            depth: None,
            engine: engine.to_string(),
        };
        self.cex = None;
    }
}

pub type Script =
    Arc<dyn Fn(&AbcCmd, &mut MockNet, &ToolCtrl) -> anyhow::Result<String> + Send + Sync>;

pub struct MockTool {
    pub net: MockNet,
    script: Script,
    ctrl: ToolCtrl,
    dir: PathBuf,
    name: String,
    log: Arc<Mutex<Vec<String>>>,
}

impl MockTool {
    pub fn new(
        dir: &Path,
        net: MockNet,
        script: impl Fn(&AbcCmd, &mut MockNet, &ToolCtrl) -> anyhow::Result<String>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            net,
            script: Arc::new(script),
            ctrl: ToolCtrl::default(),
            dir: dir.to_path_buf(),
            name: "mock".to_string(),
            log: Default::default(),
        }
    }

    /// Wire forms of every command issued by this tool and all its forks.
    pub fn issued(&self) -> Arc<Mutex<Vec<String>>> {
        self.log.clone()
    }

    fn builtin(&mut self, cmd: &AbcCmd) {
        match cmd {
            AbcCmd::RemovePo(i) => {
                if let Some(aig) = self.net.aig.as_mut() {
                    if aig.outputs.is_empty() {
                        if *i < aig.bads.len() {
                            aig.bads.remove(*i);
                        }
                    } else if *i < aig.outputs.len() {
                        aig.outputs.remove(*i);
                    }
                }
                if *i < self.net.statuses.len() {
                    self.net.statuses.remove(*i);
                }
                self.net.stats.pos = self.net.stats.pos.saturating_sub(1);
            }
            AbcCmd::AddPi => self.net.stats.pis += 1,
            _ => (),
        }
    }
}

impl Tool for MockTool {
    fn exec_all(&mut self, cmds: &[AbcCmd]) -> anyhow::Result<String> {
        let mut out = String::new();
        for cmd in cmds {
            anyhow::ensure!(!self.ctrl.is_terminated(), "tool terminated");
            self.log.lock().unwrap().push(cmd.to_string());
            self.builtin(cmd);
            out.push_str(&(self.script)(cmd, &mut self.net, &self.ctrl)?);
        }
        Ok(out)
    }

    fn stats(&mut self) -> anyhow::Result<NetStats> {
        Ok(self.net.stats)
    }

    fn status(&mut self) -> anyhow::Result<ProbStatus> {
        Ok(self.net.status.clone())
    }

    fn cex(&mut self) -> anyhow::Result<Option<Cex>> {
        Ok(self.net.cex.clone())
    }

    fn cex_vector(&mut self) -> anyhow::Result<Vec<Option<Cex>>> {
        let mut res = self.net.cexs.clone();
        res.resize(self.net.stats.pos, None);
        Ok(res)
    }

    fn status_vector(&mut self) -> anyhow::Result<Vec<Verdict>> {
        let mut res = self.net.statuses.clone();
        res.resize(self.net.stats.pos, Verdict::Unknown);
        Ok(res)
    }

    fn aig(&mut self) -> anyhow::Result<Aig> {
        Ok(self.net.aig.clone().unwrap_or_else(|| Aig {
            outputs: vec![2; self.net.stats.pos],
            ..Default::default()
        }))
    }

    fn save(&mut self, path: &Path) -> anyhow::Result<()> {
        self.net.write(path)
    }

    fn load(&mut self, path: &Path) -> anyhow::Result<()> {
        let loaded = MockNet::read(path)?;
        let status = std::mem::take(&mut self.net.status);
        let cex = self.net.cex.take();
        self.net = loaded;
        self.net.status = status;
        self.net.cex = cex;
        Ok(())
    }

    fn save_status(&mut self, path: &Path) -> anyhow::Result<()> {
        let log = StatusLog {
            status: self.net.status.clone(),
            cex: self.net.cex.clone(),
        };
        fs::write(path, log.to_string())?;
        Ok(())
    }

    fn load_status(&mut self, path: &Path) -> anyhow::Result<()> {
        let log = StatusLog::parse(&fs::read_to_string(path)?)?;
        self.net.status = log.status;
        self.net.cex = log.cex;
        Ok(())
    }

    fn fork(&self) -> anyhow::Result<Box<dyn Tool>> {
        Ok(Box::new(Self {
            net: self.net.clone(),
            script: self.script.clone(),
            ctrl: ToolCtrl::default(),
            dir: self.dir.clone(),
            name: self.name.clone(),
            log: self.log.clone(),
        }))
    }

    fn ctrl(&self) -> ToolCtrl {
        self.ctrl.clone()
    }

    fn work_dir(&self) -> &Path {
        &self.dir
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: String) {
        self.name = name;
    }
}

/// Counterexample with `frames` all-zero frames except the last, which is `last`.
pub fn cex_at(po: usize, n_regs: usize, frames: usize, last: &[bool]) -> Cex {
    let mut inputs = vec![vec![false; last.len()]; frames - 1];
    inputs.push(last.to_vec());
    Cex::new(po, vec![false; n_regs], inputs).unwrap()
}

/// Number of issued commands that are verification engines.
pub fn engine_calls(log: &Arc<Mutex<Vec<String>>>) -> usize {
    const ENGINES: [&str; 12] = [
        "bmc3", "bmc2", ",bmc", "pdr", ",pdr", ",treb", "int", ",imc", "reachx", "&reachy", "sim3",
        "dsat",
    ];
    log.lock()
        .unwrap()
        .iter()
        .filter(|c| {
            c.split("; ").any(|p| {
                let head = p.split_whitespace().next().unwrap_or("");
                ENGINES.iter().any(|e| head == *e)
            })
        })
        .count()
}
