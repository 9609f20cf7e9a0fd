use super::aiger::AigHeader;
use crate::Verdict;
use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Write as _};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetStats {
    pub pis: usize,
    pub pos: usize,
    pub latches: usize,
    pub ands: usize,
}

impl NetStats {
    pub fn new(pis: usize, pos: usize, latches: usize, ands: usize) -> Self {
        Self {
            pis,
            pos,
            latches,
            ands,
        }
    }
}

impl From<&AigHeader> for NetStats {
    fn from(h: &AigHeader) -> Self {
        Self::new(h.inputs, h.properties(), h.latchs, h.ands)
    }
}

impl Display for NetStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PI={} PO={} FF={} AND={}",
            self.pis, self.pos, self.latches, self.ands
        )
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbStatus {
    pub verdict: Verdict,
    /// Deepest frame proved free of failures, if known.
    pub depth: Option<usize>,
    pub engine: String,
}

/// Counterexample with the frozen schema `(n_pis, n_regs, n_frames, failing_po, bits)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cex {
    pub n_pis: usize,
    pub n_regs: usize,
    pub po: usize,
    pub init: Vec<bool>,
    pub inputs: Vec<Vec<bool>>,
}

impl Cex {
    pub fn new(po: usize, init: Vec<bool>, inputs: Vec<Vec<bool>>) -> anyhow::Result<Self> {
        let n_pis = inputs.first().map_or(0, |f| f.len());
        if inputs.is_empty() {
            bail!("counterexample without frames");
        }
        if inputs.iter().any(|f| f.len() != n_pis) {
            bail!("counterexample frames have different input counts");
        }
        Ok(Self {
            n_pis,
            n_regs: init.len(),
            po,
            init,
            inputs,
        })
    }

    /// Failing frame.
    #[inline]
    pub fn frame(&self) -> usize {
        self.inputs.len() - 1
    }

    #[inline]
    pub fn n_frames(&self) -> usize {
        self.inputs.len()
    }
}

fn bits(s: &str) -> anyhow::Result<Vec<bool>> {
    s.chars()
        .map(|c| match c {
            '0' | 'x' | 'X' => Ok(false),
            '1' => Ok(true),
            _ => bail!("invalid bit '{c}'"),
        })
        .collect()
}

fn bit_str(b: &[bool]) -> String {
    b.iter().map(|&x| if x { '1' } else { '0' }).collect()
}

/// The tool's status log: `snl_<STATUS> <depth> <engine> [<po>]`, then the
/// initial state bits and the per-frame input bits, `NULL` when absent.
/// A trace without inputs is written as `#<frames>`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatusLog {
    pub status: ProbStatus,
    pub cex: Option<Cex>,
}

impl StatusLog {
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
        let Some(head) = lines.next() else {
            return Ok(Self::default());
        };
        let mut tok = head.split_whitespace();
        let verdict = match tok.next() {
            Some("snl_SAT") => Verdict::Sat,
            Some("snl_UNSAT") => Verdict::Unsat,
            Some("snl_UNK") => Verdict::Unknown,
            Some(s) => bail!("unknown status '{s}'"),
            None => Verdict::Unknown,
        };
        let depth = tok
            .next()
            .map(|d| d.parse::<i64>())
            .transpose()
            .context("bad status depth")?
            .and_then(|d| usize::try_from(d).ok());
        let engine = tok.next().unwrap_or("unknown").to_string();
        let po = tok.next().and_then(|p| p.parse::<usize>().ok());
        let status = ProbStatus {
            verdict,
            depth,
            engine,
        };
        let init = lines.next().unwrap_or("NULL");
        let trace = lines.next().unwrap_or("NULL");
        let cex = if verdict == Verdict::Sat && trace != "NULL" {
            let init = if init == "NULL" { vec![] } else { bits(init)? };
            let inputs = match trace.strip_prefix('#') {
                Some(n) => {
                    let n: usize = n.parse().context("bad frame count")?;
                    vec![Vec::new(); n]
                }
                None => trace
                    .split_whitespace()
                    .map(bits)
                    .collect::<anyhow::Result<Vec<_>>>()?,
            };
            Some(Cex::new(po.unwrap_or(0), init, inputs)?)
        } else {
            None
        };
        Ok(Self { status, cex })
    }
}

impl Display for StatusLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self.status.verdict {
            Verdict::Sat => "snl_SAT",
            Verdict::Unsat => "snl_UNSAT",
            Verdict::Unknown => "snl_UNK",
        };
        let depth = self.status.depth.map_or(-1, |d| d as i64);
        write!(f, "{s} {depth} {}", self.status.engine)?;
        if let Some(cex) = &self.cex {
            write!(f, " {}", cex.po)?;
        }
        writeln!(f)?;
        match &self.cex {
            Some(cex) => {
                let init = if cex.init.is_empty() {
                    "NULL".to_string()
                } else {
                    bit_str(&cex.init)
                };
                writeln!(f, "{init}")?;
                if cex.n_pis == 0 {
                    return writeln!(f, "#{}", cex.inputs.len());
                }
                let mut trace = String::new();
                for frame in cex.inputs.iter() {
                    let _ = write!(trace, "{} ", bit_str(frame));
                }
                writeln!(f, "{}", trace.trim_end())
            }
            None => writeln!(f, "NULL\nNULL"),
        }
    }
}

/// Reads AIGER witness blocks (`1`, `b<po>`, init line, one line per frame, `.`).
/// Blocks that are not SAT witnesses are skipped.
pub fn parse_witnesses(text: &str) -> anyhow::Result<Vec<Cex>> {
    let mut res = Vec::new();
    let mut lines = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('c'));
    while let Some(l) = lines.next() {
        if l != "1" {
            for l in lines.by_ref() {
                if l == "." {
                    break;
                }
            }
            continue;
        }
        let props = lines.next().context("witness without property line")?;
        let po = props
            .split_whitespace()
            .find_map(|p| p.strip_prefix('b').and_then(|n| n.parse::<usize>().ok()))
            .context("witness without bad property")?;
        let init = bits(lines.next().context("witness without init line")?)?;
        let mut inputs = Vec::new();
        for l in lines.by_ref() {
            if l == "." {
                break;
            }
            inputs.push(bits(l)?);
        }
        res.push(Cex::new(po, init, inputs)?);
    }
    Ok(res)
}

fn verdict_word(line: &str) -> Option<Verdict> {
    let upper = line.to_ascii_uppercase();
    if upper.contains("UNSAT") || upper.contains("PROVED") {
        Some(Verdict::Unsat)
    } else if upper.contains("SAT") || upper.contains("FAILED") {
        Some(Verdict::Sat)
    } else if upper.contains("UNDEC") || upper.contains("UNKNOWN") || upper.contains("UNSOLVED") {
        Some(Verdict::Unknown)
    } else {
        None
    }
}

fn integers(line: &str) -> impl Iterator<Item = usize> + '_ {
    line.split(|c: char| !c.is_ascii_digit())
        .filter(|t| !t.is_empty())
        .filter_map(|t| t.parse().ok())
}

/// Per-output statuses from `print_status` lines of the form
/// `Output <i> : <SAT|UNSAT|UNDEC>`.
pub fn parse_status_vector(stdout: &str, n_pos: usize) -> Vec<Verdict> {
    let mut res = vec![Verdict::Unknown; n_pos];
    for line in stdout.lines() {
        let t = line.trim_start();
        if !(t.starts_with("Output") || t.starts_with("PO") || t.starts_with("Po ")) {
            continue;
        }
        let (Some(i), Some(v)) = (integers(t).next(), verdict_word(t)) else {
            continue;
        };
        if i < n_pos {
            res[i] = v;
        }
    }
    res
}

/// Clock period reported by phase detection, when any.
pub fn parse_phase_count(stdout: &str) -> Option<usize> {
    stdout
        .lines()
        .filter(|l| l.to_ascii_lowercase().contains("phase"))
        .find_map(|l| integers(l).next())
}

/// Failing PO reported by `testcex`, None when the CEX fails no output.
pub fn parse_testcex(stdout: &str) -> Option<usize> {
    let lower = stdout.to_ascii_lowercase();
    if lower.contains("does not") || lower.contains("not asserted") || lower.contains("problem")
    {
        return None;
    }
    lower.lines().find_map(|l| {
        let at = l.find("output").or_else(|| l.find("po "))?;
        integers(&l[at..]).next()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_log_sat_with_cex() {
        let text = "snl_SAT 3 bmc3 0\n00000\n101 000 111 101\n";
        let log = StatusLog::parse(text).unwrap();
        assert_eq!(log.status.verdict, Verdict::Sat);
        assert_eq!(log.status.depth, Some(3));
        assert_eq!(log.status.engine, "bmc3");
        let cex = log.cex.clone().unwrap();
        assert_eq!(cex.frame(), 3);
        assert_eq!(cex.n_pis, 3);
        assert_eq!(cex.n_regs, 5);
        assert_eq!(cex.inputs[3], vec![true, false, true]);
        let again = StatusLog::parse(&log.to_string()).unwrap();
        assert_eq!(again, log);

        let inputless = StatusLog {
            status: ProbStatus {
                verdict: Verdict::Sat,
                depth: Some(2),
                engine: "bmc".to_string(),
            },
            cex: Some(Cex::new(0, vec![false; 4], vec![vec![]; 3]).unwrap()),
        };
        let text = inputless.to_string();
        assert_eq!(text, "snl_SAT 2 bmc 0\n0000\n#3\n");
        let again = StatusLog::parse(&text).unwrap();
        assert_eq!(again, inputless);
        assert_eq!(again.cex.unwrap().frame(), 2);
    }

    #[test]
    fn status_log_unsat_and_unknown() {
        let log = StatusLog::parse("snl_UNSAT -1 pdr\nNULL\nNULL\n").unwrap();
        assert_eq!(log.status.verdict, Verdict::Unsat);
        assert_eq!(log.status.depth, None);
        assert!(log.cex.is_none());
        let log = StatusLog::parse("").unwrap();
        assert_eq!(log.status.verdict, Verdict::Unknown);
        assert!(StatusLog::parse("snl_MAYBE 0 x\n").is_err());
    }

    #[test]
    fn ragged_cex_is_rejected() {
        assert!(StatusLog::parse("snl_SAT 1 bmc3 0\n0\n10 1\n").is_err());
    }

    #[test]
    fn witness_blocks() {
        let text = "1\nb2\n00\n10\n01\n.\n0\nb0\n.\n1\nb5\n1\n11\n.\n";
        let cexs = parse_witnesses(text).unwrap();
        assert_eq!(cexs.len(), 2);
        assert_eq!(cexs[0].po, 2);
        assert_eq!(cexs[0].frame(), 1);
        assert_eq!(cexs[1].po, 5);
        assert_eq!(cexs[1].init, vec![true]);
    }

    #[test]
    fn tool_output_is_parsed() {
        let out = "Status array: 3 entries\nOutput 0 : SAT\nOutput 1 : UNSAT\nOutput 2 : UNDEC\n";
        assert_eq!(
            parse_status_vector(out, 4),
            vec![Verdict::Sat, Verdict::Unsat, Verdict::Unknown, Verdict::Unknown]
        );
        assert_eq!(parse_phase_count("Detected 4 phases\n"), Some(4));
        assert_eq!(parse_phase_count("nothing here"), None);
        assert_eq!(parse_testcex("CEX asserts output 7 in frame 3.\n"), Some(7));
        assert_eq!(parse_testcex("The CEX does not fail any outputs.\n"), None);
    }
}
