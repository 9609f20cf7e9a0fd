//! Maps a counterexample of a derived network back through the history stack.

use crate::{
    FlowError,
    abc::{AbcCmd, Cex, Tool},
    history::{History, Transform},
};
use log::{debug, info, warn};
use std::fs;

/// Reshapes a CEX of a `period`-unrolled network into the original timeline.
/// Copy `k` of unrolled frame `f` is original frame `f * period + k`; its
/// inputs are `PI(k * n_pis + i)` and its outputs `PO(k * n_pos + j)`.
pub fn unfold_phase_cex(
    cex: &Cex,
    period: usize,
    n_pis: usize,
    n_pos: usize,
    n_regs: usize,
) -> Result<Cex, FlowError> {
    if period == 0 || n_pos == 0 || cex.n_pis != period * n_pis {
        return Err(FlowError::CexInvalidAtLift);
    }
    let copy = cex.po / n_pos;
    if copy >= period {
        return Err(FlowError::CexInvalidAtLift);
    }
    let last = cex.frame() * period + copy;
    let mut inputs = Vec::with_capacity(last + 1);
    'outer: for frame in cex.inputs.iter() {
        for k in 0..period {
            inputs.push(frame[k * n_pis..(k + 1) * n_pis].to_vec());
            if inputs.len() > last {
                break 'outer;
            }
        }
    }
    let init = if cex.init.len() == n_regs {
        cex.init.clone()
    } else {
        vec![false; n_regs]
    };
    Cex::new(cex.po % n_pos, init, inputs).map_err(|_| FlowError::CexInvalidAtLift)
}

/// Lifts the current CEX through every history entry above `mark`, popping
/// them. The tool ends on the network of the last entry lifted to. Entries of
/// kind `Initial` stop the walk and are kept.
pub fn lift_cex(
    tool: &mut dyn Tool,
    history: &mut History,
    mark: usize,
    replay_timeout: u64,
) -> anyhow::Result<Result<Cex, FlowError>> {
    let Some(mut cex) = tool.cex()? else {
        warn!("lift: no counterexample to lift");
        return Ok(Err(FlowError::CexInvalidAtLift));
    };
    while history.len() > mark {
        let Some(top) = history.peek() else {
            break;
        };
        if top.kind == Transform::Initial {
            break;
        }
        let Some(snap) = history.pop() else {
            break;
        };
        debug!(
            "lift: through {} (frame {}, po {})",
            snap.kind.as_ref(),
            cex.frame(),
            cex.po
        );
        let mut expect = Some(cex.po);
        match snap.kind {
            Transform::Reparam => {
                let derived = tool.file("lift_derived");
                tool.save(&derived)?;
                tool.load(&snap.path)?;
                tool.exec(&AbcCmd::Reconcile {
                    origin: snap.path.clone(),
                    derived: derived.clone(),
                })?;
                let _ = fs::remove_file(&derived);
            }
            Transform::Phase { period } => {
                let lifted = match unfold_phase_cex(
                    &cex,
                    period,
                    snap.stats.pis,
                    snap.stats.pos,
                    snap.stats.latches,
                ) {
                    Ok(c) => c,
                    Err(e) => {
                        warn!("lift: phase reshape failed");
                        return Ok(Err(e));
                    }
                };
                expect = Some(lifted.po);
                tool.load(&snap.path)?;
                tool.set_cex(&lifted, "phase")?;
            }
            Transform::Tempor { frames } => {
                tool.load(&snap.path)?;
                tool.exec(&AbcCmd::Bmc3 {
                    timeout: replay_timeout,
                    frames: Some(cex.frame() + frames + 1),
                    start: None,
                    all: false,
                })?;
                expect = None;
            }
            Transform::Initial => unreachable!(),
        }
        let Some(next) = tool.cex()? else {
            warn!("lift: {} produced no counterexample", snap.kind.as_ref());
            return Ok(Err(FlowError::CexInvalidAtLift));
        };
        if next.n_pis != snap.stats.pis {
            warn!(
                "lift: counterexample has {} inputs, network has {}",
                next.n_pis, snap.stats.pis
            );
            return Ok(Err(FlowError::CexInvalidAtLift));
        }
        match tool.test_cex()? {
            Some(po) if expect.is_some_and(|e| e != po) => {
                warn!("lift: replay asserts po {po} instead of {expect:?}");
                return Ok(Err(FlowError::CexInvalidAtLift));
            }
            Some(po) => {
                cex = next;
                cex.po = po;
            }
            None => {
                warn!("lift: {} counterexample does not replay", snap.kind.as_ref());
                return Ok(Err(FlowError::CexInvalidAtLift));
            }
        }
    }
    info!("lift: counterexample at frame {} asserts po {}", cex.frame(), cex.po);
    Ok(Ok(cex))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::abc::{
        NetStats, ToolCtrl,
        mock::{MockNet, MockTool, cex_at},
    };

    /// Tool semantics shared by lifting tests: `reconcile` widens the CEX to
    /// the origin PI count, `bmc3` finds a CEX of the stored depth, and
    /// `testcex` accepts any CEX whose width matches the network, reporting
    /// its output shifted by `po_shift`.
    pub(crate) fn lifting(cmd: &AbcCmd, net: &mut MockNet, _: &ToolCtrl) -> anyhow::Result<String> {
        match cmd {
            AbcCmd::Reconcile { .. } => {
                if let Some(c) = net.cex.clone() {
                    let inputs = vec![vec![true; net.stats.pis]; c.n_frames()];
                    net.set_sat(Cex::new(c.po, c.init.clone(), inputs)?, "reconcile");
                }
            }
            AbcCmd::Bmc3 { .. } => {
                let depth = net.var("bug_depth") as usize;
                let cex = cex_at(0, net.stats.latches, depth + 1, &vec![true; net.stats.pis]);
                net.set_sat(cex, "bmc3");
            }
            AbcCmd::TestCex => {
                return Ok(match &net.cex {
                    Some(c) if c.n_pis == net.stats.pis && net.var("reject") == 0 => {
                        let po = c.po + net.var("po_shift") as usize;
                        format!("CEX asserts output {po} in frame {}.\n", c.frame())
                    }
                    _ => "The CEX does not fail any outputs.\n".to_string(),
                });
            }
            _ => (),
        }
        Ok(String::new())
    }

    #[test]
    fn phase_reshape() {
        // period 2, 1 PI and 2 POs in the original
        let cex = Cex::new(
            3,
            vec![false; 2],
            vec![vec![true, false], vec![false, true]],
        )
        .unwrap();
        let lifted = unfold_phase_cex(&cex, 2, 1, 2, 2).unwrap();
        assert_eq!(lifted.po, 1);
        assert_eq!(lifted.frame(), 3);
        assert_eq!(
            lifted.inputs,
            vec![vec![true], vec![false], vec![false], vec![true]]
        );
        let early = Cex::new(1, vec![], vec![vec![true, true], vec![false, true]]).unwrap();
        assert_eq!(unfold_phase_cex(&early, 2, 1, 2, 0).unwrap().frame(), 2);
        assert_eq!(
            unfold_phase_cex(&cex, 3, 1, 2, 2),
            Err(FlowError::CexInvalidAtLift)
        );
    }

    #[test]
    fn lifts_through_reparam_phase_and_tempor() {
        let dir = tempfile::tempdir().unwrap();
        let mut net = MockNet::new(NetStats::new(4, 1, 6, 50));
        net.set_var("bug_depth", 5);
        let mut t = MockTool::new(dir.path(), net, lifting);
        let mut h = History::new("m");
        h.push(&mut t, Transform::Initial).unwrap();
        h.push(&mut t, Transform::Tempor { frames: 2 }).unwrap();
        t.net.set_var("bug_depth", 0);
        t.net.stats = NetStats::new(4, 1, 6, 40);
        h.push(&mut t, Transform::Phase { period: 2 }).unwrap();
        t.net.stats = NetStats::new(8, 2, 6, 80);
        h.push(&mut t, Transform::Reparam).unwrap();
        t.net.stats = NetStats::new(3, 2, 6, 70);
        t.net.set_sat(cex_at(1, 6, 2, &[true; 3]), "pdr");

        let issued = t.issued();
        let cex = lift_cex(&mut t, &mut h, 0, 10).unwrap().unwrap();
        assert_eq!(cex.n_pis, 4);
        assert_eq!(cex.frame(), 5);
        // phase lift ends at frame 3, tempor removed 2 more
        assert!(issued.lock().unwrap().iter().any(|c| c == "bmc3 -T 10 -F 6"));
        assert_eq!(h.len(), 1);
        assert_eq!(t.stats().unwrap(), NetStats::new(4, 1, 6, 50));
    }

    #[test]
    fn failed_replay_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = MockTool::new(dir.path(), MockNet::new(NetStats::new(4, 1, 6, 50)), lifting);
        let mut h = History::new("m");
        h.push(&mut t, Transform::Initial).unwrap();
        t.net.set_var("reject", 1);
        h.push(&mut t, Transform::Reparam).unwrap();
        t.net.stats.pis = 2;
        t.net.set_sat(cex_at(0, 6, 3, &[true; 2]), "bmc3");
        assert_eq!(
            lift_cex(&mut t, &mut h, 0, 10).unwrap(),
            Err(FlowError::CexInvalidAtLift)
        );
    }

    #[test]
    fn replay_on_another_output_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = MockTool::new(dir.path(), MockNet::new(NetStats::new(4, 2, 6, 50)), lifting);
        let mut h = History::new("m");
        h.push(&mut t, Transform::Initial).unwrap();
        t.net.set_var("po_shift", 1);
        h.push(&mut t, Transform::Reparam).unwrap();
        t.net.stats.pis = 2;
        t.net.set_sat(cex_at(0, 6, 3, &[true; 2]), "bmc3");
        assert_eq!(
            lift_cex(&mut t, &mut h, 0, 10).unwrap(),
            Err(FlowError::CexInvalidAtLift)
        );
    }
}
