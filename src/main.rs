use std::process;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use env_logger::Env;

use perc_bench::config::{BenchArgs, Config, Settings};
use perc_bench::dataset;
use perc_bench::errors::BenchError;
use perc_bench::report;
use perc_bench::runner;
use perc_bench::types::RunRecord;
use perc_bench::waiter::{self, SystemProcessTable};

fn run() -> Result<()> {
    let args = BenchArgs::parse();
    let settings = Settings::load(args.config.as_deref())?;
    let mut config = Config::from_args(args, settings)?;

    waiter::await_prerequisites(&config, &mut SystemProcessTable::new());
    dataset::ensure_dataset(&mut config).map_err(BenchError::from)?;

    print!("{}", report::format_preamble(&config));

    let started_at = Utc::now();
    let samples = runner::run_benchmark(&config)?;
    let stats = report::report(&samples)?;

    if let Some(path) = &config.output {
        let record = RunRecord {
            started_at,
            finished_at: Utc::now(),
            analyzer: config.analyzer.clone(),
            data_path: config.data_path.clone(),
            flags: config.flags.clone(),
            comment: config.comment.clone(),
            samples,
            stats,
        };
        report::write_record(path, &record)?;
    }

    Ok(())
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();

    match run() {
        Ok(()) => println!("{}", report::format_verdict(true)),
        Err(err) => {
            eprintln!("{}", err);
            println!("{}", report::format_verdict(false));
            process::exit(1);
        }
    }
}
