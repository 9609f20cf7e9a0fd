use serde::{Deserialize, Serialize};
use std::{
    fmt::{self, Display},
    path::PathBuf,
};
use strum::AsRefStr;

/// Granularity of an abstraction descriptor.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum, AsRefStr)]
pub enum AbsLevel {
    /// abstracted latches become free inputs
    Register,
    /// abstracted gates become free inputs
    Gate,
}

/// Which candidate equivalences survive into the speculative miter.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum, AsRefStr)]
pub enum SpecScope {
    /// `f`: internal signals only
    Internal,
    /// `g`: internal plus additional candidates
    Additional,
    /// `ab`: only classes spanning both halves of an SEC miter
    CrossPartition,
}

/// Typed command surface of the external tool. `Display` is the wire form.
#[derive(Clone, Debug, PartialEq)]
pub enum AbcCmd {
    Read(PathBuf),
    Write(PathBuf),
    Strash,
    Zero,
    Scl,
    AddPi,
    RemovePo(usize),
    Cone(usize),
    OrPos,
    ExtractConstraints,
    FoldConstraints,

    Dc2,
    Dc2rs,
    Drw,
    Rewrite,
    Fraig,

    Scorr {
        const_only: bool,
        depth: Option<usize>,
    },
    Lcorr,
    Dretime {
        min: bool,
    },
    Phase {
        frames: usize,
    },
    PhaseDetect,
    Tempor {
        simple: bool,
        frames: Option<usize>,
    },
    Reparam {
        out: PathBuf,
    },

    Bmc3 {
        timeout: u64,
        frames: Option<usize>,
        start: Option<usize>,
        all: bool,
    },
    Bmc2 {
        timeout: u64,
        frames: usize,
    },
    BmcGia {
        timeout: u64,
    },
    Pdr {
        timeout: u64,
        seed: Option<u64>,
        all: bool,
    },
    PdrGia {
        timeout: u64,
    },
    Treb {
        timeout: u64,
    },
    Int {
        timeout: u64,
        backward: bool,
    },
    Imc {
        timeout: u64,
    },
    Reachx {
        timeout: u64,
    },
    Reachy {
        timeout: u64,
    },
    Sim3 {
        timeout: u64,
        seed: u64,
        start: usize,
        all: bool,
    },
    Dsat {
        timeout: u64,
    },
    Iprove {
        timeout: u64,
    },

    AbsInit {
        level: AbsLevel,
        timeout: u64,
        desc: PathBuf,
    },
    AbsDerive {
        level: AbsLevel,
        desc: PathBuf,
    },
    AbsRefine {
        level: AbsLevel,
        timeout: u64,
        desc: PathBuf,
    },

    Equiv3 {
        timeout: u64,
        frames: usize,
    },
    Semi,
    Speci,
    EquivScope(SpecScope),
    SaveEquiv(PathBuf),
    Srm {
        db: PathBuf,
        out: PathBuf,
    },
    Resim {
        db: PathBuf,
    },
    /// Drops the classes whose miter outputs `pos` were falsified.
    EquivPrune {
        db: PathBuf,
        pos: Vec<usize>,
    },

    CexSave,
    CexLoad,
    TestCex,
    Reconcile {
        origin: PathBuf,
        derived: PathBuf,
    },
    PrintStatus,
    WriteCex {
        out: PathBuf,
    },
}

impl AbcCmd {
    /// Verification commands update the problem status.
    pub fn is_engine(&self) -> bool {
        matches!(
            self,
            AbcCmd::Bmc3 { .. }
                | AbcCmd::Bmc2 { .. }
                | AbcCmd::BmcGia { .. }
                | AbcCmd::Pdr { .. }
                | AbcCmd::PdrGia { .. }
                | AbcCmd::Treb { .. }
                | AbcCmd::Int { .. }
                | AbcCmd::Imc { .. }
                | AbcCmd::Reachx { .. }
                | AbcCmd::Reachy { .. }
                | AbcCmd::Sim3 { .. }
                | AbcCmd::Dsat { .. }
                | AbcCmd::Iprove { .. }
        )
    }
}

impl Display for AbcCmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbcCmd::Read(p) => write!(f, "read {}", p.display()),
            AbcCmd::Write(p) => write!(f, "write {}", p.display()),
            AbcCmd::Strash => write!(f, "strash"),
            AbcCmd::Zero => write!(f, "zero"),
            AbcCmd::Scl => write!(f, "scl"),
            AbcCmd::AddPi => write!(f, "addpi"),
            AbcCmd::RemovePo(i) => write!(f, "removepo -N {i}"),
            AbcCmd::Cone(i) => write!(f, "&get; &cone -O {i}; &put"),
            AbcCmd::OrPos => write!(f, "orpos"),
            AbcCmd::ExtractConstraints => write!(f, "constr -s"),
            AbcCmd::FoldConstraints => write!(f, "fold"),
            AbcCmd::Dc2 => write!(f, "dc2"),
            AbcCmd::Dc2rs => write!(f, "dc2rs"),
            AbcCmd::Drw => write!(f, "drw"),
            AbcCmd::Rewrite => write!(f, "rewrite"),
            AbcCmd::Fraig => write!(f, "fraig"),
            AbcCmd::Scorr { const_only, depth } => {
                write!(f, "scorr")?;
                if *const_only {
                    write!(f, " -c")?;
                }
                if let Some(k) = depth {
                    write!(f, " -F {k}")?;
                }
                Ok(())
            }
            AbcCmd::Lcorr => write!(f, "lcorr"),
            AbcCmd::Dretime { min } => {
                if *min {
                    write!(f, "dretime -m")
                } else {
                    write!(f, "dretime")
                }
            }
            AbcCmd::Phase { frames } => write!(f, "phase -F {frames}"),
            AbcCmd::PhaseDetect => write!(f, "phase -v"),
            AbcCmd::Tempor { simple, frames } => {
                write!(f, "tempor")?;
                if *simple {
                    write!(f, " -s")?;
                }
                if let Some(k) = frames {
                    write!(f, " -F {k}")?;
                }
                Ok(())
            }
            AbcCmd::Reparam { out } => {
                write!(f, "&get; ,reparam -aig={0}; read {0}", out.display())
            }
            AbcCmd::Bmc3 {
                timeout,
                frames,
                start,
                all,
            } => {
                write!(f, "bmc3 -T {timeout}")?;
                if let Some(k) = frames {
                    write!(f, " -F {k}")?;
                }
                if let Some(s) = start {
                    write!(f, " -S {s}")?;
                }
                if *all {
                    write!(f, " -a")?;
                }
                Ok(())
            }
            AbcCmd::Bmc2 { timeout, frames } => write!(f, "bmc2 -T {timeout} -F {frames}"),
            AbcCmd::BmcGia { timeout } => write!(f, "&get; ,bmc -timeout={timeout}"),
            AbcCmd::Pdr { timeout, seed, all } => {
                write!(f, "pdr -T {timeout}")?;
                if let Some(s) = seed {
                    write!(f, " -S {s}")?;
                }
                if *all {
                    write!(f, " -a")?;
                }
                Ok(())
            }
            AbcCmd::PdrGia { timeout } => write!(f, "&get; ,pdr -timeout={timeout}"),
            AbcCmd::Treb { timeout } => write!(f, "&get; ,treb -timeout={timeout}"),
            AbcCmd::Int { timeout, backward } => {
                if *backward {
                    write!(f, "int -b -T {timeout}")
                } else {
                    write!(f, "int -T {timeout}")
                }
            }
            AbcCmd::Imc { timeout } => write!(f, "&get; ,imc -timeout={timeout}"),
            AbcCmd::Reachx { timeout } => write!(f, "reachx -T {timeout}"),
            AbcCmd::Reachy { timeout } => write!(f, "&get; &reachy -T {timeout}"),
            AbcCmd::Sim3 {
                timeout,
                seed,
                start,
                all,
            } => {
                write!(f, "sim3 -T {timeout} -R {seed}")?;
                if *start > 0 {
                    write!(f, " -S {start}")?;
                }
                if *all {
                    write!(f, " -a")?;
                }
                Ok(())
            }
            AbcCmd::Dsat { timeout } => write!(f, "dsat -T {timeout}"),
            AbcCmd::Iprove { timeout } => write!(f, "iprove -T {timeout}"),
            AbcCmd::AbsInit {
                level,
                timeout,
                desc,
            } => match level {
                AbsLevel::Register => {
                    write!(f, "&get; ,abs -timeout={timeout}; &w {}", desc.display())
                }
                AbsLevel::Gate => write!(f, "&get; &gla -T {timeout}; &w {}", desc.display()),
            },
            AbcCmd::AbsDerive { level, desc } => match level {
                AbsLevel::Register => write!(f, "&r {}; &abs_derive; &put", desc.display()),
                AbsLevel::Gate => write!(f, "&r {}; &gla_derive; &put", desc.display()),
            },
            AbcCmd::AbsRefine {
                level,
                timeout,
                desc,
            } => match level {
                AbsLevel::Register => {
                    write!(f, "&r {0}; &abs_refine -T {timeout}; &w {0}", desc.display())
                }
                AbsLevel::Gate => {
                    write!(f, "&r {0}; &gla_refine -T {timeout}; &w {0}", desc.display())
                }
            },
            AbcCmd::Equiv3 { timeout, frames } => {
                write!(f, "&get; &equiv3 -T {timeout} -F {frames}")
            }
            AbcCmd::Semi => write!(f, "&semi -W 63 -S 5 -C 500 -F 20"),
            AbcCmd::Speci => write!(f, "&speci -F 20 -C 1000"),
            AbcCmd::EquivScope(scope) => match scope {
                SpecScope::Internal => write!(f, "&filter -f"),
                SpecScope::Additional => write!(f, "&filter -g"),
                SpecScope::CrossPartition => write!(f, "&equiv_filter"),
            },
            AbcCmd::SaveEquiv(p) => write!(f, "&w {}", p.display()),
            AbcCmd::Srm { db, out } => write!(f, "&r {}; &srm -A {}", db.display(), out.display()),
            AbcCmd::Resim { db } => write!(f, "&r {0}; &resim -m; &w {0}", db.display()),
            AbcCmd::EquivPrune { db, pos } => {
                let pos = pos
                    .iter()
                    .map(|p| p.to_string())
                    .collect::<Vec<_>>()
                    .join(",");
                write!(f, "&r {0}; &equiv_mark -f -P {pos}; &reduce; &w {0}", db.display())
            }
            AbcCmd::CexSave => write!(f, "cexsave"),
            AbcCmd::CexLoad => write!(f, "cexload"),
            AbcCmd::TestCex => write!(f, "testcex"),
            AbcCmd::Reconcile { origin, derived } => {
                write!(f, "reconcile {} {}", origin.display(), derived.display())
            }
            AbcCmd::PrintStatus => write!(f, "print_status"),
            AbcCmd::WriteCex { out } => write!(f, "write_cex -a {}", out.display()),
        }
    }
}

/// Joins commands into one script line.
pub fn script<'a>(cmds: impl IntoIterator<Item = &'a AbcCmd>) -> String {
    cmds.into_iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
