use crate::abc::{NetStats, Tool};
use log::debug;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf};
use strum::AsRefStr;

/// Transformation that produced the state following a snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum Transform {
    Initial,
    Reparam,
    /// `frames` initial frames were unrolled away.
    Tempor { frames: usize },
    Phase { period: usize },
}

#[derive(Clone, Debug)]
pub struct Snapshot {
    pub kind: Transform,
    pub path: PathBuf,
    /// Stats of the network held by the snapshot.
    pub stats: NetStats,
}

/// On-disk snapshots of the networks counterexamples must be lifted to.
/// Popping an entry keeps its file; `truncate` deletes it.
#[derive(Clone)]
pub struct History {
    base: String,
    stack: Vec<Snapshot>,
}

impl History {
    pub fn new(base: &str) -> Self {
        Self {
            base: base.to_string(),
            stack: Vec::new(),
        }
    }

    /// Saves the present network as `{base}_aigs_{k}.aig` and records `kind`.
    pub fn push(&mut self, tool: &mut dyn Tool, kind: Transform) -> anyhow::Result<()> {
        let k = self.stack.len();
        let path = tool
            .work_dir()
            .join(format!("{}_aigs_{k}.aig", self.base));
        tool.save(&path)?;
        let stats = tool.stats()?;
        debug!("history: push {} #{k} ({stats})", kind.as_ref());
        self.stack.push(Snapshot { kind, path, stats });
        Ok(())
    }

    pub fn pop(&mut self) -> Option<Snapshot> {
        self.stack.pop()
    }

    pub fn peek(&self) -> Option<&Snapshot> {
        self.stack.last()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.stack.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn entries(&self) -> &[Snapshot] {
        &self.stack
    }

    /// Sets the kind of the newest entry once the transform that produced the
    /// next state is known.
    pub fn retag(&mut self, kind: Transform) {
        if let Some(s) = self.stack.last_mut() {
            s.kind = kind;
        }
    }

    /// Drops every entry above `len` together with its file.
    pub fn truncate(&mut self, len: usize) {
        while self.stack.len() > len {
            if let Some(s) = self.stack.pop() {
                let _ = fs::remove_file(&s.path);
            }
        }
    }

    /// Product of the phase unrollings still on the stack.
    pub fn phase_factor(&self) -> usize {
        self.stack
            .iter()
            .map(|s| match s.kind {
                Transform::Phase { period } => period,
                _ => 1,
            })
            .product()
    }

    /// Reloads the original network.
    pub fn restore_initial(&self, tool: &mut dyn Tool) -> anyhow::Result<()> {
        match self.stack.first() {
            Some(s) => tool.load(&s.path),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abc::mock::{MockNet, MockTool};

    #[test]
    fn push_pop_and_truncate() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = MockTool::new(dir.path(), MockNet::new(NetStats::new(3, 1, 5, 20)), |_, _, _| {
            Ok(String::new())
        });
        let mut h = History::new("m");
        h.push(&mut t, Transform::Initial).unwrap();
        t.net.stats.pis = 2;
        h.push(&mut t, Transform::Phase { period: 2 }).unwrap();
        h.push(&mut t, Transform::Reparam).unwrap();
        assert_eq!(h.len(), 3);
        assert_eq!(h.phase_factor(), 2);
        assert_eq!(h.peek().unwrap().kind, Transform::Reparam);
        assert_eq!(h.entries()[1].stats.pis, 2);
        assert!(dir.path().join("m_aigs_2.aig").exists());
        h.truncate(1);
        assert_eq!(h.len(), 1);
        assert!(!dir.path().join("m_aigs_1.aig").exists());
        t.net.stats.pis = 9;
        h.restore_initial(&mut t).unwrap();
        assert_eq!(t.net.stats.pis, 3);
        assert_eq!(h.pop().unwrap().kind, Transform::Initial);
        assert!(h.is_empty());
    }
}
