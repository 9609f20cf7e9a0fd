use crate::abc::{AbsLevel, SpecScope};
use anyhow::Context;
use clap::{Args, Parser, ValueEnum};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::{fs, path::PathBuf, thread::available_parallelism};

fn default_workers() -> usize {
    let cores = available_parallelism().map_or(1, |n| n.get());
    if cores >= 8 { 8 } else { cores + 1 }
}

/// Parallel proof driver for sequential AIG circuits
#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(version, about)]
pub struct Config {
    /// model file in aiger format
    #[arg(value_parser = clap::builder::TypedValueParser::map(clap::builder::OsStringValueParser::new(), PathBuf::from))]
    pub model: PathBuf,

    /// external circuit tool binary
    #[arg(long, default_value = "abc")]
    pub abc: PathBuf,

    /// directory for snapshots, a fresh one under /tmp/parprove when absent
    #[arg(long)]
    pub work_dir: Option<PathBuf>,

    /// keep the work directory at exit
    #[arg(long, default_value_t = false)]
    pub keep: bool,

    /// toml file overriding the tuning sections
    #[arg(long)]
    pub tuning: Option<PathBuf>,

    /// number of parallel worker slots
    #[arg(long, default_value_t = default_workers())]
    pub workers: usize,

    /// total time budget in seconds
    #[arg(long, default_value_t = 900)]
    pub timeout: u64,

    /// random seed
    #[arg(long, default_value_t = 0)]
    pub rseed: u64,

    #[command(flatten)]
    pub portfolio: PortfolioConfig,

    #[command(flatten)]
    pub simp: SimplifyConfig,

    #[command(flatten)]
    pub abs: AbsConfig,

    #[command(flatten)]
    pub spec: SpecConfig,

    #[command(flatten)]
    pub multi: MultiConfig,

    #[command(flatten)]
    pub strategy: StrategyConfig,
}

#[derive(Args, Clone, Debug, Serialize, Deserialize)]
pub struct PortfolioConfig {
    /// fraction of the timeout after which the sleeper extends it once
    #[arg(long = "pf-pace-at", default_value_t = 0.4)]
    pub pace_at: f64,

    /// extension applied by the sleeper, as a fraction of the timeout
    #[arg(long = "pf-pace-bump", default_value_t = 0.1)]
    pub pace_bump: f64,

    /// milliseconds between SIGINT and SIGKILL for cancelled engines
    #[arg(long = "pf-grace-ms", default_value_t = 500)]
    pub grace_ms: u64,

    /// worker memory limit in GB
    #[arg(long = "pf-mem-limit", default_value_t = 16)]
    pub mem_limit: usize,
}

#[derive(Args, Clone, Debug, Serialize, Deserialize)]
pub struct SimplifyConfig {
    /// skip the simplification pipeline
    #[arg(long = "no-simp", default_value_t = false)]
    pub disable: bool,

    /// a transformation is kept only below this relative cost
    #[arg(long = "simp-accept-cost", default_value_t = -0.01, allow_hyphen_values = true)]
    pub accept_cost: f64,

    /// no dimension may grow past `before / dim_tolerance`
    #[arg(long = "simp-dim-tolerance", default_value_t = 0.98)]
    pub dim_tolerance: f64,

    #[arg(long = "simp-w-pi", default_value_t = 1.0)]
    pub w_pi: f64,

    #[arg(long = "simp-w-latch", default_value_t = 5.0)]
    pub w_latch: f64,

    #[arg(long = "simp-w-and", default_value_t = 0.25)]
    pub w_and: f64,

    /// constraint extraction only up to this many ANDs
    #[arg(long = "simp-constr-max-ands", default_value_t = 40000)]
    pub constr_max_ands: usize,

    /// cap of the scorr induction depth
    #[arg(long = "simp-scorr-depth", default_value_t = 16)]
    pub scorr_depth: usize,

    /// scorr depth starts at `scorr_ands / #AND`
    #[arg(long = "simp-scorr-ands", default_value_t = 70000)]
    pub scorr_ands: usize,

    /// seconds for the temporal decomposition race
    #[arg(long = "simp-tempor-budget", default_value_t = 25)]
    pub tempor_budget: u64,

    /// initial frames removed by one temporal decomposition
    #[arg(long = "simp-tempor-frames", default_value_t = 1)]
    pub tempor_frames: usize,

    #[arg(long = "simp-no-tempor", default_value_t = false)]
    pub no_tempor: bool,

    #[arg(long = "simp-no-phase", default_value_t = false)]
    pub no_phase: bool,

    #[arg(long = "simp-no-reparam", default_value_t = false)]
    pub no_reparam: bool,
}

#[derive(Args, Clone, Debug, Serialize, Deserialize)]
pub struct AbsConfig {
    /// abstraction granularity
    #[arg(long = "abs-level", value_enum, default_value_t = AbsLevel::Gate)]
    pub level: AbsLevel,

    /// abandon when the abstraction keeps more than this share of latches
    #[arg(long = "abs-ratio", default_value_t = 0.5)]
    pub ratio: f64,

    /// seconds for the initial abstraction race
    #[arg(long = "abs-init-timeout", default_value_t = 100)]
    pub init_timeout: u64,

    /// seconds per verification of an abstraction
    #[arg(id = "abs_iter_timeout", long = "abs-iter-timeout", default_value_t = 60)]
    pub iter_timeout: u64,

    /// seconds per refinement step
    #[arg(long = "abs-refine-timeout", default_value_t = 30)]
    pub refine_timeout: u64,

    /// total seconds of the refinement loop
    #[arg(id = "abs_budget", long = "abs-budget", default_value_t = 300)]
    pub budget: u64,
}

#[derive(Args, Clone, Debug, Serialize, Deserialize)]
pub struct SpecConfig {
    /// equivalences kept for the speculative miter
    #[arg(long = "spec-scope", value_enum, default_value_t = SpecScope::Internal)]
    pub scope: SpecScope,

    /// total seconds of the refinement loop
    #[arg(id = "spec_budget", long = "spec-budget", default_value_t = 150)]
    pub budget: u64,

    /// abandon when the miter keeps this share of latches
    #[arg(long = "spec-latch-ratio", default_value_t = 0.98)]
    pub latch_ratio: f64,

    /// abandon when the quick sweep disproves this share of added outputs
    #[arg(long = "spec-sweep-abandon", default_value_t = 0.25)]
    pub sweep_abandon: f64,

    /// abandon when the miter adds more outputs than this
    #[arg(long = "spec-max-added", default_value_t = 1000)]
    pub max_added: usize,

    /// seconds for equivalence detection
    #[arg(long = "spec-equiv-timeout", default_value_t = 30)]
    pub equiv_timeout: u64,

    /// frames simulated during equivalence detection
    #[arg(long = "spec-equiv-frames", default_value_t = 20)]
    pub equiv_frames: usize,

    /// seconds for the quick sweep of the initial miter
    #[arg(id = "spec_sweep_timeout", long = "spec-sweep-timeout", default_value_t = 10)]
    pub sweep_timeout: u64,

    /// seconds per verification of the miter
    #[arg(id = "spec_iter_timeout", long = "spec-iter-timeout", default_value_t = 30)]
    pub iter_timeout: u64,
}

#[derive(Args, Clone, Debug, Serialize, Deserialize)]
pub struct MultiConfig {
    /// seconds per cone in the per-output phase
    #[arg(long = "mo-cone-timeout", default_value_t = 100)]
    pub cone_timeout: u64,

    /// seconds of the first parallel SAT sweep
    #[arg(id = "mo_sweep_timeout", long = "mo-sweep-timeout", default_value_t = 20)]
    pub sweep_timeout: u64,

    /// seconds the sweep keeps running after its first hit
    #[arg(long = "mo-sweep-gap", default_value_t = 5)]
    pub sweep_gap: u64,

    /// rounds of the SAT sweep
    #[arg(long = "mo-sweep-rounds", default_value_t = 3)]
    pub sweep_rounds: usize,

    /// skip the isomorphism reduction
    #[arg(long = "mo-no-iso", default_value_t = false)]
    pub no_iso: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum Mode {
    /// abstraction, then speculation
    AbsFirst,
    /// speculation, then abstraction
    SpecFirst,
}

impl Mode {
    pub fn other(self) -> Self {
        match self {
            Mode::AbsFirst => Mode::SpecFirst,
            Mode::SpecFirst => Mode::AbsFirst,
        }
    }
}

#[derive(Args, Clone, Debug, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// order of the reduction stages
    #[arg(long = "mode", value_enum, default_value_t = Mode::AbsFirst)]
    pub mode: Mode,

    /// seconds of the quick check after simplification
    #[arg(long = "quick-timeout", default_value_t = 20)]
    pub quick_timeout: u64,

    /// seconds for replaying a counterexample while lifting
    #[arg(long = "lift-timeout", default_value_t = 60)]
    pub lift_timeout: u64,

    /// skip abstraction
    #[arg(long = "no-abs", default_value_t = false)]
    pub no_abs: bool,

    /// skip speculation
    #[arg(long = "no-spec", default_value_t = false)]
    pub no_spec: bool,
}

fn overlay<T: Serialize + DeserializeOwned>(base: &T, patch: &toml::Value) -> anyhow::Result<T> {
    let mut v = toml::Value::try_from(base)?;
    if let (toml::Value::Table(b), toml::Value::Table(p)) = (&mut v, patch) {
        for (k, x) in p {
            b.insert(k.clone(), x.clone());
        }
    }
    Ok(v.try_into()?)
}

impl Config {
    /// Applies the `[portfolio]`, `[simp]`, `[abs]`, `[spec]`, `[multi]` and
    /// `[strategy]` sections of the tuning file.
    pub fn apply_tuning(&mut self) -> anyhow::Result<()> {
        let Some(path) = self.tuning.clone() else {
            return Ok(());
        };
        let text =
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        self.apply_tuning_str(&text)
            .with_context(|| format!("bad tuning file {}", path.display()))
    }

    pub fn apply_tuning_str(&mut self, text: &str) -> anyhow::Result<()> {
        let table: toml::Table = toml::from_str(text)?;
        for (section, patch) in table.iter() {
            match section.as_str() {
                "portfolio" => self.portfolio = overlay(&self.portfolio, patch)?,
                "simp" => self.simp = overlay(&self.simp, patch)?,
                "abs" => self.abs = overlay(&self.abs, patch)?,
                "spec" => self.spec = overlay(&self.spec, patch)?,
                "multi" => self.multi = overlay(&self.multi, patch)?,
                "strategy" => self.strategy = overlay(&self.strategy, patch)?,
                s => anyhow::bail!("unknown tuning section [{s}]"),
            }
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::parse_from(["prove-driver", ""])
    }
}
