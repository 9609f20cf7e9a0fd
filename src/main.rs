use clap::Parser;
use log::{error, info};
use parprove::{
    abc::{Abc, kill_all_children},
    config::Config,
    strategy::Prover,
};
use std::{env, fs, path::PathBuf, process::exit};

fn run(cfg: &Config) -> anyhow::Result<i32> {
    let mut tmp = None;
    let dir: PathBuf = match &cfg.work_dir {
        Some(d) => d.clone(),
        None => {
            fs::create_dir_all("/tmp/parprove")?;
            let t = tempfile::Builder::new()
                .prefix("run_")
                .tempdir_in("/tmp/parprove")?;
            let p = t.path().to_path_buf();
            tmp = Some(t);
            p
        }
    };
    let base = cfg
        .model
        .file_stem()
        .map_or("model".to_string(), |s| s.to_string_lossy().into_owned());
    info!("work directory: {}", dir.display());
    let mut abc = Abc::new(&cfg.abc, &dir, &base, &cfg.model)?
        .with_mem_limit(cfg.portfolio.mem_limit);
    let outcome = Prover::new(cfg).run(&mut abc)?;
    drop(abc);
    if cfg.keep
        && let Some(t) = tmp
    {
        info!("keeping {}", t.keep().display());
    }

    let verdict = outcome.verdict();
    println!("{}", if verdict.is_definite() { verdict.as_ref() } else { "UNDECIDED" });
    for (stage, res) in outcome.trace.iter() {
        println!("{stage}: {res}");
    }
    if let Some((po, frame)) = outcome.failing() {
        println!("failing output {po} at frame {frame}");
    }
    if !outcome.po_verdicts.is_empty() {
        let v: Vec<String> = outcome
            .po_verdicts
            .iter()
            .map(|v| v.as_i8().to_string())
            .collect();
        println!("outputs: {}", v.join(" "));
    }
    Ok(if verdict.is_definite() { 0 } else { 2 })
}

fn main() {
    if env::var("RUST_LOG").is_err() {
        unsafe { env::set_var("RUST_LOG", "info") };
    }
    env_logger::Builder::from_default_env()
        .format_timestamp(None)
        .format_target(false)
        .init();
    let mut cfg = Config::parse();
    if let Err(e) = cfg.apply_tuning() {
        error!("{e:#}");
        exit(1);
    }
    cfg.model = match cfg.model.canonicalize() {
        Ok(m) => m,
        Err(e) => {
            error!("cannot open {}: {e}", cfg.model.display());
            exit(1);
        }
    };
    info!("the model to be proved: {}", cfg.model.display());
    let _ = ctrlc::set_handler(|| {
        kill_all_children();
        exit(124);
    });
    match run(&cfg) {
        Ok(code) => exit(code),
        Err(e) => {
            error!("tool failure: {e:#}");
            println!("UNDECIDED");
            exit(1);
        }
    }
}
