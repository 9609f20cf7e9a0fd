use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufRead, BufReader, Read},
    path::Path,
};

/// Counts from an AIGER header line `aig M I L O A [B C J F]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AigHeader {
    pub binary: bool,
    pub max_var: u32,
    pub inputs: usize,
    pub latchs: usize,
    pub outputs: usize,
    pub ands: usize,
    pub bads: usize,
    pub constraints: usize,
    pub justice: usize,
    pub fairness: usize,
}

impl AigHeader {
    pub fn parse(line: &str) -> anyhow::Result<Self> {
        let mut tok = line.split_whitespace();
        let binary = match tok.next() {
            Some("aig") => true,
            Some("aag") => false,
            _ => bail!("invalid aiger header: {line}"),
        };
        let nums: Vec<usize> = tok
            .map(|t| t.parse::<usize>())
            .collect::<Result<_, _>>()
            .with_context(|| format!("invalid aiger header: {line}"))?;
        if nums.len() < 5 {
            bail!("invalid aiger header: {line}");
        }
        let get = |i: usize| nums.get(i).copied().unwrap_or(0);
        Ok(Self {
            binary,
            max_var: nums[0] as u32,
            inputs: nums[1],
            latchs: nums[2],
            outputs: nums[3],
            ands: nums[4],
            bads: get(5),
            constraints: get(6),
            justice: get(7),
            fairness: get(8),
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
        let mut line = String::new();
        BufReader::new(file).read_line(&mut line)?;
        Self::parse(line.trim_end())
    }

    /// Number of properties; outputs win, bads are used when there are none.
    #[inline]
    pub fn properties(&self) -> usize {
        if self.outputs > 0 {
            self.outputs
        } else {
            self.bads
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AigLatch {
    pub var: u32,
    pub next: u32,
    /// None: uninitialized
    pub init: Option<bool>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AigAnd {
    pub lhs: u32,
    pub rhs0: u32,
    pub rhs1: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AigNode {
    Const,
    Input(usize),
    Latch(usize),
    And(u32, u32),
}

/// Structural view of an AIGER file. Literals follow the AIGER convention:
/// `2 * var + negated`, literal 0 is constant false.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aig {
    pub max_var: u32,
    pub inputs: Vec<u32>,
    pub latchs: Vec<AigLatch>,
    pub outputs: Vec<u32>,
    pub bads: Vec<u32>,
    pub constraints: Vec<u32>,
    pub ands: Vec<AigAnd>,
}

#[inline]
pub fn lit_var(lit: u32) -> u32 {
    lit >> 1
}

#[inline]
pub fn lit_neg(lit: u32) -> bool {
    lit & 1 == 1
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn line(&mut self) -> anyhow::Result<&'a str> {
        let rest = &self.buf[self.pos..];
        let Some(end) = rest.iter().position(|&c| c == b'\n') else {
            bail!("unexpected end of aiger file");
        };
        self.pos += end + 1;
        Ok(std::str::from_utf8(&rest[..end])?.trim_end_matches('\r'))
    }

    fn nums(&mut self) -> anyhow::Result<Vec<u32>> {
        let line = self.line()?;
        line.split_whitespace()
            .map(|t| t.parse::<u32>().with_context(|| format!("bad aiger line: {line}")))
            .collect()
    }

    /// Leading number of the next line.
    fn num(&mut self) -> anyhow::Result<u32> {
        self.nums()?.first().copied().context("empty aiger line")
    }

    fn delta(&mut self) -> anyhow::Result<u32> {
        let mut x = 0u32;
        let mut shift = 0;
        loop {
            let Some(&ch) = self.buf.get(self.pos) else {
                bail!("unexpected end of aiger and section");
            };
            self.pos += 1;
            x |= ((ch & 0x7f) as u32) << shift;
            if ch & 0x80 == 0 {
                return Ok(x);
            }
            shift += 7;
            if shift > 28 {
                bail!("aiger delta overflow");
            }
        }
    }
}

fn parse_init(latch_lit: u32, v: Option<&u32>) -> Option<bool> {
    match v {
        None | Some(0) => Some(false),
        Some(1) => Some(true),
        Some(x) if *x == latch_lit => None,
        Some(_) => None,
    }
}

impl Aig {
    pub fn from_bytes(buf: &[u8]) -> anyhow::Result<Self> {
        let mut cur = Cursor { buf, pos: 0 };
        let header = AigHeader::parse(cur.line()?)?;
        let mut aig = Aig {
            max_var: header.max_var,
            ..Default::default()
        };
        if header.binary {
            aig.inputs = (1..=header.inputs as u32).collect();
        } else {
            for _ in 0..header.inputs {
                aig.inputs.push(lit_var(cur.num()?));
            }
        }
        for i in 0..header.latchs {
            let n = cur.nums()?;
            if n.is_empty() {
                bail!("empty aiger latch line");
            }
            let latch = if header.binary {
                let var = (header.inputs + i + 1) as u32;
                AigLatch {
                    var,
                    next: n[0],
                    init: parse_init(var * 2, n.get(1)),
                }
            } else {
                if n.len() < 2 {
                    bail!("bad aag latch line");
                }
                AigLatch {
                    var: lit_var(n[0]),
                    next: n[1],
                    init: parse_init(n[0], n.get(2)),
                }
            };
            aig.latchs.push(latch);
        }
        for _ in 0..header.outputs {
            aig.outputs.push(cur.num()?);
        }
        for _ in 0..header.bads {
            aig.bads.push(cur.num()?);
        }
        for _ in 0..header.constraints {
            aig.constraints.push(cur.num()?);
        }
        let mut justice_lits = 0;
        for _ in 0..header.justice {
            justice_lits += cur.num()? as usize;
        }
        for _ in 0..justice_lits + header.fairness {
            cur.line()?;
        }
        for i in 0..header.ands {
            let and = if header.binary {
                let lhs = 2 * (header.inputs + header.latchs + i + 1) as u32;
                let rhs0 = lhs
                    .checked_sub(cur.delta()?)
                    .context("bad aiger delta")?;
                let rhs1 = rhs0
                    .checked_sub(cur.delta()?)
                    .context("bad aiger delta")?;
                AigAnd { lhs, rhs0, rhs1 }
            } else {
                let n = cur.nums()?;
                if n.len() < 3 {
                    bail!("bad aag and line");
                }
                AigAnd {
                    lhs: n[0],
                    rhs0: n[1],
                    rhs1: n[2],
                }
            };
            aig.ands.push(and);
        }
        aig.check()?;
        Ok(aig)
    }

    /// Every literal must name a variable within `max_var`.
    fn check(&self) -> anyhow::Result<()> {
        let lits = self
            .latchs
            .iter()
            .flat_map(|l| [l.var * 2, l.next])
            .chain(self.ands.iter().flat_map(|a| [a.lhs, a.rhs0, a.rhs1]))
            .chain(self.inputs.iter().map(|v| v * 2))
            .chain(self.outputs.iter().chain(&self.bads).chain(&self.constraints).copied());
        for l in lits {
            if lit_var(l) > self.max_var {
                bail!("aiger literal {l} exceeds maximum variable {}", self.max_var);
            }
        }
        Ok(())
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let mut buf = Vec::new();
        File::open(path)
            .with_context(|| format!("open {}", path.display()))?
            .read_to_end(&mut buf)?;
        Self::from_bytes(&buf).with_context(|| format!("parse {}", path.display()))
    }

    /// Property literals: outputs, or bads when the file has no outputs.
    pub fn properties(&self) -> &[u32] {
        if self.outputs.is_empty() {
            &self.bads
        } else {
            &self.outputs
        }
    }

    /// Indices of properties driven by constant 0.
    pub fn const0_properties(&self) -> Vec<usize> {
        self.properties()
            .iter()
            .enumerate()
            .filter(|(_, l)| **l == 0)
            .map(|(i, _)| i)
            .collect()
    }

    /// Node table indexed by variable.
    pub fn nodes(&self) -> Vec<AigNode> {
        let mut nodes = vec![AigNode::Const; self.max_var as usize + 1];
        for (i, v) in self.inputs.iter().enumerate() {
            nodes[*v as usize] = AigNode::Input(i);
        }
        for (i, l) in self.latchs.iter().enumerate() {
            nodes[l.var as usize] = AigNode::Latch(i);
        }
        for a in self.ands.iter() {
            nodes[lit_var(a.lhs) as usize] = AigNode::And(a.rhs0, a.rhs1);
        }
        nodes
    }
}
