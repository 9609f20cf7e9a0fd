//! Runs deferred computations in parallel, each on a private fork of the tool,
//! and adopts the post-state of the one the policy selects.

use crate::{ProofResult, Verdict, abc::Tool};
use anyhow::bail;
use log::{debug, info, warn};
use std::{
    cell::Cell,
    collections::HashMap,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::mpsc::{self, RecvTimeoutError},
    thread,
    time::{Duration, Instant},
};
use tempfile::{Builder, NamedTempFile};

thread_local! {
    static IN_CHILD: Cell<bool> = const { Cell::new(false) };
}

/// Whether the calling thread runs inside a split child.
pub fn in_child() -> bool {
    IN_CHILD.with(|c| c.get())
}

pub trait Definite {
    fn is_definite(&self) -> bool;
}

impl Definite for Verdict {
    fn is_definite(&self) -> bool {
        Verdict::is_definite(self)
    }
}

impl Definite for ProofResult {
    fn is_definite(&self) -> bool {
        ProofResult::is_definite(self)
    }
}

type Run<T> = Box<dyn FnOnce(&mut dyn Tool) -> anyhow::Result<T> + Send>;

/// A deferred computation with its arguments frozen in.
pub struct Task<T> {
    pub name: String,
    run: Run<T>,
}

impl<T: Send + 'static> Task<T> {
    pub fn new(
        name: impl Into<String>,
        run: impl FnOnce(&mut dyn Tool) -> anyhow::Result<T> + Send + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            run: Box::new(run),
        }
    }

    pub fn map<U: Send + 'static>(self, f: impl FnOnce(T) -> U + Send + 'static) -> Task<U> {
        let run = self.run;
        Task {
            name: self.name,
            run: Box::new(move |tool| run(tool).map(f)),
        }
    }
}

pub type Pred<T> = Box<dyn Fn(&T) -> bool + Send>;

pub enum Policy<T> {
    /// First result accepted by the predicate wins, the rest are cancelled.
    First(Pred<T>),
    /// Wait for all; the last one to complete wins.
    LastWins,
    /// Wait for all, or until `within` runs out; the smallest metric wins.
    BestBy {
        metric: Box<dyn Fn(&T) -> f64 + Send>,
        within: Option<Duration>,
    },
    /// After the first accepted result, the others get `gap` more time.
    Gapped { hit: Pred<T>, gap: Duration },
    /// Wait for all, adopt nothing.
    All,
}

impl<T: 'static> Policy<T> {
    pub fn first_any() -> Self {
        Policy::First(Box::new(|_: &T| true))
    }

    pub fn first(pred: impl Fn(&T) -> bool + Send + 'static) -> Self {
        Policy::First(Box::new(pred))
    }

    pub fn best_by(metric: impl Fn(&T) -> f64 + Send + 'static) -> Self {
        Policy::BestBy {
            metric: Box::new(metric),
            within: None,
        }
    }

    pub fn best_within(metric: impl Fn(&T) -> f64 + Send + 'static, within: Duration) -> Self {
        Policy::BestBy {
            metric: Box::new(metric),
            within: Some(within),
        }
    }

    pub fn gapped(hit: impl Fn(&T) -> bool + Send + 'static, gap: Duration) -> Self {
        Policy::Gapped {
            hit: Box::new(hit),
            gap,
        }
    }
}

impl<T: Definite + 'static> Policy<T> {
    pub fn first_definite() -> Self {
        Policy::First(Box::new(|r: &T| r.is_definite()))
    }
}

pub struct Finished<T> {
    pub task: usize,
    pub name: String,
    pub value: T,
    pub elapsed: Duration,
}

/// Results in completion order. Crashed or cancelled children are absent.
pub struct SplitResult<T> {
    pub winner: Option<usize>,
    pub finished: Vec<Finished<T>>,
}

impl<T> SplitResult<T> {
    pub fn winner(&self) -> Option<&Finished<T>> {
        let w = self.winner?;
        self.finished.iter().find(|f| f.task == w)
    }

    pub fn into_winner(self) -> Option<Finished<T>> {
        let w = self.winner?;
        self.finished.into_iter().find(|f| f.task == w)
    }
}

type Message<T> = (usize, Option<(T, NamedTempFile, NamedTempFile)>);

/// Forks one child per task from the current state of `tool`. The winner's
/// network and status are loaded back into `tool`; losers get SIGINT, then
/// SIGKILL after `grace`.
pub fn fork_all<T: Send + 'static>(
    tool: &mut dyn Tool,
    tasks: Vec<Task<T>>,
    policy: Policy<T>,
    grace: Duration,
) -> anyhow::Result<SplitResult<T>> {
    if in_child() {
        bail!("nested parallel split is not allowed");
    }
    let start = Instant::now();
    let (tx, rx) = mpsc::channel::<Message<T>>();
    let mut names = Vec::with_capacity(tasks.len());
    let mut ctrls = Vec::with_capacity(tasks.len());
    let mut handles = Vec::with_capacity(tasks.len());
    for (idx, task) in tasks.into_iter().enumerate() {
        let mut child = tool.fork()?;
        let dir = tool.work_dir().to_path_buf();
        names.push(task.name.clone());
        ctrls.push(child.ctrl());
        let tx = tx.clone();
        debug!("split: start {}", task.name);
        handles.push(thread::spawn(move || {
            IN_CHILD.with(|c| c.set(true));
            let res = catch_unwind(AssertUnwindSafe(|| -> anyhow::Result<_> {
                let value = (task.run)(child.as_mut())?;
                let aig = Builder::new().suffix(".aig").tempfile_in(&dir)?;
                let status = Builder::new().suffix(".status").tempfile_in(&dir)?;
                child.save(aig.path())?;
                child.save_status(status.path())?;
                Ok((value, aig, status))
            }));
            let msg = match res {
                Ok(Ok(r)) => Some(r),
                Ok(Err(e)) => {
                    debug!("split: {} failed: {e:#}", task.name);
                    None
                }
                Err(_) => {
                    warn!("split: {} crashed", task.name);
                    None
                }
            };
            let _ = tx.send((idx, msg));
        }));
    }
    drop(tx);

    let mut pending = names.len();
    let mut finished = Vec::new();
    let mut states = HashMap::new();
    let mut winner = None;
    let mut best = f64::INFINITY;
    let mut deadline = match &policy {
        Policy::BestBy {
            within: Some(w), ..
        } => Some(start + *w),
        _ => None,
    };
    while pending > 0 {
        let msg = match deadline {
            Some(d) => match rx.recv_timeout(d.saturating_duration_since(Instant::now())) {
                Ok(m) => m,
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match rx.recv() {
                Ok(m) => m,
                Err(_) => break,
            },
        };
        pending -= 1;
        let (idx, res) = msg;
        let Some((value, aig, status)) = res else {
            info!("split: {} contributed nothing", names[idx]);
            continue;
        };
        let mut stop = false;
        match &policy {
            Policy::First(pred) => {
                if pred(&value) {
                    winner = Some(idx);
                    stop = true;
                }
            }
            Policy::LastWins => winner = Some(idx),
            Policy::BestBy { metric, .. } => {
                let m = metric(&value);
                if winner.is_none() || m < best {
                    best = m;
                    winner = Some(idx);
                }
            }
            Policy::Gapped { hit, gap } => {
                if winner.is_none() && hit(&value) {
                    winner = Some(idx);
                    deadline = Some(Instant::now() + *gap);
                }
            }
            Policy::All => (),
        }
        finished.push(Finished {
            task: idx,
            name: names[idx].clone(),
            value,
            elapsed: start.elapsed(),
        });
        states.insert(idx, (aig, status));
        if stop {
            break;
        }
    }

    if pending > 0 {
        for c in ctrls.iter() {
            c.terminate();
        }
        let grace_end = Instant::now() + grace;
        while pending > 0 {
            match rx.recv_timeout(grace_end.saturating_duration_since(Instant::now())) {
                Ok(_) => pending -= 1,
                Err(_) => break,
            }
        }
        for c in ctrls.iter() {
            c.kill();
        }
    }
    for h in handles {
        let _ = h.join();
    }
    if let Some(w) = winner {
        debug!("split: {} wins after {:.2?}", names[w], start.elapsed());
        let (aig, status) = &states[&w];
        tool.load(aig.path())?;
        tool.load_status(status.path())?;
    }
    Ok(SplitResult { winner, finished })
}
