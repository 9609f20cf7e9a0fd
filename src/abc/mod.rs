pub mod aiger;
pub mod cmd;
#[cfg(test)]
pub mod mock;
pub mod status;

pub use aiger::Aig;
pub use cmd::{AbcCmd, AbsLevel, SpecScope};
pub use status::{Cex, NetStats, ProbStatus, StatusLog};

use crate::Verdict;
use aiger::AigHeader;
use anyhow::{Context, anyhow, bail};
use log::{debug, trace};
use nix::{
    sys::signal::{Signal, kill},
    unistd::Pid,
};
use process_control::{ChildExt, Control};
use status::{parse_phase_count, parse_status_vector, parse_testcex, parse_witnesses};
use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

static LIVE_CHILDREN: Mutex<BTreeSet<i32>> = Mutex::new(BTreeSet::new());
static FORK_ID: AtomicUsize = AtomicUsize::new(0);

/// Kills every tool process still running. Used by the interrupt handler.
pub fn kill_all_children() {
    let pids: Vec<i32> = LIVE_CHILDREN.lock().unwrap().iter().copied().collect();
    for pid in pids {
        let _ = kill(Pid::from_raw(pid), Signal::SIGKILL);
    }
}

#[derive(Default)]
struct CtrlInner {
    terminated: AtomicBool,
    pid: Mutex<Option<i32>>,
}

/// Cancellation handle of one tool instance.
#[derive(Clone, Default)]
pub struct ToolCtrl(Arc<CtrlInner>);

impl ToolCtrl {
    fn signal(&self, sig: Signal) {
        if let Some(pid) = *self.0.pid.lock().unwrap() {
            let _ = kill(Pid::from_raw(pid), sig);
        }
    }

    /// Cooperative cancel: SIGINT to the running command, no new commands start.
    pub fn terminate(&self) {
        self.0.terminated.store(true, Ordering::Release);
        self.signal(Signal::SIGINT);
    }

    /// Forced cancel after the grace window.
    pub fn kill(&self) {
        self.0.terminated.store(true, Ordering::Release);
        self.signal(Signal::SIGKILL);
    }

    #[inline]
    pub fn is_terminated(&self) -> bool {
        self.0.terminated.load(Ordering::Acquire)
    }

    /// Sleeps for `dur` unless cancelled first; returns whether the full time elapsed.
    pub fn sleep(&self, dur: Duration) -> bool {
        let start = Instant::now();
        while start.elapsed() < dur {
            if self.is_terminated() {
                return false;
            }
            thread::sleep((dur - start.elapsed()).min(Duration::from_millis(10)));
        }
        !self.is_terminated()
    }

    fn attach(&self, pid: i32) {
        *self.0.pid.lock().unwrap() = Some(pid);
        LIVE_CHILDREN.lock().unwrap().insert(pid);
        if self.is_terminated() {
            let _ = kill(Pid::from_raw(pid), Signal::SIGINT);
        }
    }

    fn detach(&self) {
        if let Some(pid) = self.0.pid.lock().unwrap().take() {
            LIVE_CHILDREN.lock().unwrap().remove(&pid);
        }
    }
}

/// Bridge to the external circuit tool. The tool owns a current network and
/// a problem status; every command may replace both.
pub trait Tool: Send {
    /// Runs one command, returns the tool's transcript.
    fn exec(&mut self, cmd: &AbcCmd) -> anyhow::Result<String> {
        self.exec_all(std::slice::from_ref(cmd))
    }

    /// Runs commands in one tool session.
    fn exec_all(&mut self, cmds: &[AbcCmd]) -> anyhow::Result<String>;

    fn stats(&mut self) -> anyhow::Result<NetStats>;

    fn status(&mut self) -> anyhow::Result<ProbStatus>;

    fn cex(&mut self) -> anyhow::Result<Option<Cex>>;

    /// Per-PO counterexamples of the last multi-output engine run.
    fn cex_vector(&mut self) -> anyhow::Result<Vec<Option<Cex>>>;

    /// Per-PO statuses of the last multi-output engine run.
    fn status_vector(&mut self) -> anyhow::Result<Vec<Verdict>>;

    /// Structure of the current network.
    fn aig(&mut self) -> anyhow::Result<Aig>;

    fn save(&mut self, path: &Path) -> anyhow::Result<()>;

    fn load(&mut self, path: &Path) -> anyhow::Result<()>;

    fn save_status(&mut self, path: &Path) -> anyhow::Result<()>;

    fn load_status(&mut self, path: &Path) -> anyhow::Result<()>;

    /// Private copy of the current network and status for a parallel child.
    fn fork(&self) -> anyhow::Result<Box<dyn Tool>>;

    fn ctrl(&self) -> ToolCtrl;

    fn work_dir(&self) -> &Path;

    /// Identifier of the current derived network, e.g. `design_smp_abs`.
    fn name(&self) -> &str;

    fn set_name(&mut self, name: String);

    fn n_phases(&mut self) -> anyhow::Result<usize> {
        let out = self.exec(&AbcCmd::PhaseDetect)?;
        Ok(parse_phase_count(&out).unwrap_or(1).max(1))
    }

    /// Replays the current CEX; the failing PO if it asserts one.
    fn test_cex(&mut self) -> anyhow::Result<Option<usize>> {
        let out = self.exec(&AbcCmd::TestCex)?;
        Ok(parse_testcex(&out))
    }

    fn file(&self, tag: &str) -> PathBuf {
        self.work_dir().join(format!("{}_{tag}.aig", self.name()))
    }

    fn push_name(&mut self, suffix: &str) {
        let name = format!("{}_{suffix}", self.name());
        self.set_name(name);
    }

    /// Installs a counterexample as the current problem status.
    fn set_cex(&mut self, cex: &Cex, engine: &str) -> anyhow::Result<()> {
        let log = StatusLog {
            status: ProbStatus {
                verdict: Verdict::Sat,
                depth: cex.frame().checked_sub(1),
                engine: engine.to_string(),
            },
            cex: Some(cex.clone()),
        };
        let tmp = tempfile::Builder::new()
            .suffix(".status")
            .tempfile_in(self.work_dir())?;
        fs::write(tmp.path(), log.to_string())?;
        self.load_status(tmp.path())
    }
}

/// The external tool driven as one child process per command batch. State
/// between batches lives in an AIGER file and a status file.
pub struct Abc {
    bin: PathBuf,
    dir: PathBuf,
    name: String,
    aig: PathBuf,
    status: PathBuf,
    cexs: PathBuf,
    owned: bool,
    mem_limit: Option<usize>,
    ctrl: ToolCtrl,
    stats: Option<NetStats>,
    log: Option<StatusLog>,
    statuses: Vec<Verdict>,
}

impl Abc {
    pub fn new(
        bin: impl Into<PathBuf>,
        dir: impl Into<PathBuf>,
        name: &str,
        model: &Path,
    ) -> anyhow::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let stem = dir.join(format!("{name}_cur"));
        let mut abc = Self {
            bin: bin.into(),
            name: name.to_string(),
            aig: stem.with_extension("aig"),
            status: stem.with_extension("status"),
            cexs: stem.with_extension("cex"),
            dir,
            owned: false,
            mem_limit: None,
            ctrl: ToolCtrl::default(),
            stats: None,
            log: None,
            statuses: Vec::new(),
        };
        fs::write(&abc.status, StatusLog::default().to_string())?;
        let script = format!(
            "read {}; strash; write_aiger {}",
            model.display(),
            abc.aig.display()
        );
        abc.invoke(&script)
            .with_context(|| format!("tool failed to read {}", model.display()))?;
        Ok(abc)
    }

    pub fn with_mem_limit(mut self, gb: usize) -> Self {
        self.mem_limit = Some(gb * 1024 * 1024 * 1024);
        self
    }

    fn invalidate(&mut self) {
        self.stats = None;
        self.log = None;
    }

    fn invoke(&mut self, script: &str) -> anyhow::Result<String> {
        if self.ctrl.is_terminated() {
            bail!("tool terminated");
        }
        trace!("abc: {script}");
        let child = Command::new(&self.bin)
            .arg("-q")
            .arg(script)
            .current_dir(&self.dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to start {}", self.bin.display()))?;
        self.ctrl.attach(child.id() as i32);
        #[cfg(target_os = "linux")]
        let output = match self.mem_limit {
            Some(m) => child.controlled_with_output().memory_limit(m).wait(),
            None => child.controlled_with_output().wait(),
        };
        #[cfg(not(target_os = "linux"))]
        let output = child.controlled_with_output().wait();
        self.ctrl.detach();
        let output = output?.ok_or_else(|| anyhow!("tool exceeded its limits"))?;
        if self.ctrl.is_terminated() {
            bail!("tool terminated");
        }
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            debug!("abc stdout: {stdout}");
            debug!("abc stderr: {}", String::from_utf8_lossy(&output.stderr));
            bail!("tool exited with {:?}", output.status.code());
        }
        Ok(stdout)
    }

    fn read_log(&mut self) -> anyhow::Result<&StatusLog> {
        if self.log.is_none() {
            let text = fs::read_to_string(&self.status).unwrap_or_default();
            self.log = Some(StatusLog::parse(&text)?);
        }
        Ok(self.log.get_or_insert_default())
    }
}

impl Tool for Abc {
    fn exec_all(&mut self, cmds: &[AbcCmd]) -> anyhow::Result<String> {
        let engine = cmds.iter().any(|c| c.is_engine());
        let mut script = format!(
            "read {}; read_status {}; {}",
            self.aig.display(),
            self.status.display(),
            cmd::script(cmds)
        );
        if engine {
            script.push_str(&format!(
                "; {}; {}",
                AbcCmd::PrintStatus,
                AbcCmd::WriteCex {
                    out: self.cexs.clone()
                }
            ));
        }
        script.push_str(&format!(
            "; write_aiger {}; write_status {}",
            self.aig.display(),
            self.status.display()
        ));
        self.invalidate();
        let out = self.invoke(&script)?;
        if engine {
            let n = self.stats()?.pos;
            self.statuses = parse_status_vector(&out, n);
        }
        Ok(out)
    }

    fn stats(&mut self) -> anyhow::Result<NetStats> {
        if let Some(s) = self.stats {
            return Ok(s);
        }
        let s = NetStats::from(&AigHeader::from_file(&self.aig)?);
        self.stats = Some(s);
        Ok(s)
    }

    fn status(&mut self) -> anyhow::Result<ProbStatus> {
        Ok(self.read_log()?.status.clone())
    }

    fn cex(&mut self) -> anyhow::Result<Option<Cex>> {
        Ok(self.read_log()?.cex.clone())
    }

    fn cex_vector(&mut self) -> anyhow::Result<Vec<Option<Cex>>> {
        let n = self.stats()?.pos;
        let mut res = vec![None; n];
        if let Ok(text) = fs::read_to_string(&self.cexs) {
            for cex in parse_witnesses(&text)? {
                if cex.po < n {
                    let po = cex.po;
                    res[po] = Some(cex);
                }
            }
        }
        Ok(res)
    }

    fn status_vector(&mut self) -> anyhow::Result<Vec<Verdict>> {
        let n = self.stats()?.pos;
        let mut res = self.statuses.clone();
        res.resize(n, Verdict::Unknown);
        Ok(res)
    }

    fn aig(&mut self) -> anyhow::Result<Aig> {
        Aig::from_file(&self.aig)
    }

    fn save(&mut self, path: &Path) -> anyhow::Result<()> {
        fs::copy(&self.aig, path).with_context(|| format!("save {}", path.display()))?;
        Ok(())
    }

    fn load(&mut self, path: &Path) -> anyhow::Result<()> {
        fs::copy(path, &self.aig).with_context(|| format!("load {}", path.display()))?;
        self.stats = None;
        self.statuses.clear();
        Ok(())
    }

    fn save_status(&mut self, path: &Path) -> anyhow::Result<()> {
        fs::copy(&self.status, path).with_context(|| format!("save {}", path.display()))?;
        Ok(())
    }

    fn load_status(&mut self, path: &Path) -> anyhow::Result<()> {
        fs::copy(path, &self.status).with_context(|| format!("load {}", path.display()))?;
        self.log = None;
        Ok(())
    }

    fn fork(&self) -> anyhow::Result<Box<dyn Tool>> {
        let id = FORK_ID.fetch_add(1, Ordering::Relaxed);
        let stem = self.dir.join(format!("{}_f{id}", self.name));
        let child = Self {
            bin: self.bin.clone(),
            dir: self.dir.clone(),
            name: self.name.clone(),
            aig: stem.with_extension("aig"),
            status: stem.with_extension("status"),
            cexs: stem.with_extension("cex"),
            owned: true,
            mem_limit: self.mem_limit,
            ctrl: ToolCtrl::default(),
            stats: self.stats,
            log: self.log.clone(),
            statuses: self.statuses.clone(),
        };
        fs::copy(&self.aig, &child.aig)?;
        fs::copy(&self.status, &child.status)?;
        Ok(Box::new(child))
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

impl Drop for Abc {
    fn drop(&mut self) {
        if self.owned {
            let _ = fs::remove_file(&self.aig);
            let _ = fs::remove_file(&self.status);
            let _ = fs::remove_file(&self.cexs);
        }
    }
}
