use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use clap::Subcommand;
use log::info;

use munchkin_fuzz::config::Config;
use munchkin_fuzz::csv_sink::CsvSink;
use munchkin_fuzz::generator::GeneratorHandle;
use munchkin_fuzz::replay;
use munchkin_fuzz::search::SearchLoop;
use munchkin_fuzz::solver::SolverHandle;

#[derive(Debug, Parser)]
struct Cli {
    #[command(subcommand)]
    command: Action,
}

#[derive(Debug, Subcommand)]
enum Action {
    /// Run the fuzzer's search loop against a configuration file.
    Run {
        /// Path to the YAML configuration file.
        config: PathBuf,
    },
    /// Re-solve every non-zero-margin row of a previous run's results CSV.
    Replay {
        /// Path to the YAML configuration file.
        config: PathBuf,
        /// Path to the results CSV produced by `run`.
        results_csv: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = match Cli::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // clap's own usage text already covers "missing argument".
            e.print().ok();
            std::process::exit(2);
        }
    };

    match args.command {
        Action::Run { config } => run(&config),
        Action::Replay { config, results_csv } => run_replay(&config, &results_csv),
    }
}

fn run(config_path: &Path) -> anyhow::Result<()> {
    let config = Config::load(config_path)
        .with_context(|| format!("failed to load config {}", config_path.display()))?;
    let options = config.fuzzer_options();

    let mut generator = match config.fuzzer.port {
        Some(port) => GeneratorHandle::attach_existing(config.fuzzer.path.clone(), port),
        None => GeneratorHandle::new(config.fuzzer.path.clone()),
    };
    generator.connect().context("failed to start generator")?;

    let targets = start_solvers(&config, &config.fuzzer.targets)?;
    let references = start_solvers(&config, &config.fuzzer.references)?;

    let mut solver_ids: Vec<String> = config
        .fuzzer
        .targets
        .iter()
        .chain(&config.fuzzer.references)
        .cloned()
        .collect();
    solver_ids.sort();

    let csv = CsvSink::open(&config.fuzzer.csv, &solver_ids)
        .with_context(|| format!("failed to open results CSV {}", config.fuzzer.csv))?;

    let mut search = SearchLoop::new(
        generator,
        targets,
        references,
        csv,
        config.fuzzer.contradictions_file.clone(),
        options,
        config.fuzzer.penalty_factor,
    );

    info!("starting search, writing results to {}", config.fuzzer.csv);
    search.initialize().context("failed to generate the initial predicate")?;
    search.run().context("search loop aborted")
}

fn run_replay(config_path: &Path, results_csv: &Path) -> anyhow::Result<()> {
    let config = Config::load(config_path)
        .with_context(|| format!("failed to load config {}", config_path.display()))?;
    let discard_socket_timeouts = config.fuzzer_options().solutions_only;

    let mut targets = start_solvers(&config, &config.fuzzer.targets)?;
    let mut references = start_solvers(&config, &config.fuzzer.references)?;

    info!("reading results from {}", results_csv.display());
    let rows = replay::read_csv(results_csv)
        .with_context(|| format!("failed to read results CSV {}", results_csv.display()))?;

    let mut restart = |solvers: &mut [SolverHandle]| -> munchkin_fuzz::FuzzResult<()> {
        for solver in solvers {
            solver.restart()?;
        }
        Ok(())
    };

    info!("replaying results independently");
    let independent_margins = replay::replay_results(
        &rows,
        &mut targets,
        &mut references,
        true,
        config.fuzzer.penalty_factor,
        discard_socket_timeouts,
        &mut restart,
    )?;

    info!("replaying results without restarting solvers");
    let dependent_margins = replay::replay_results(
        &rows,
        &mut targets,
        &mut references,
        false,
        config.fuzzer.penalty_factor,
        discard_socket_timeouts,
        &mut restart,
    )?;

    print_comparison_table(&rows, &independent_margins, &dependent_margins);
    Ok(())
}

fn print_comparison_table(
    rows: &[replay::ResultRow],
    independent_margins: &[i64],
    dependent_margins: &[i64],
) {
    println!("No.      Orig   Indiv.   % Orig     Dep.   % Orig");
    let non_zero_rows = rows.iter().filter(|row| row.margin != 0);
    for (i, (row, (indiv, dep))) in non_zero_rows
        .zip(independent_margins.iter().zip(dependent_margins))
        .enumerate()
    {
        let pct = |margin: i64| -> String {
            if row.margin == 0 {
                "N/A".to_string()
            } else {
                format!("{:.2}%", 100.0 * margin as f64 / row.margin as f64)
            }
        };
        println!(
            "# {:03}  {:7}  {:7}  {:>7}  {:7}  {:>7}",
            i + 1,
            row.margin,
            indiv,
            pct(*indiv),
            dep,
            pct(*dep)
        );
    }
}

fn start_solvers(config: &Config, ids: &[String]) -> anyhow::Result<Vec<SolverHandle>> {
    let mut handles = Vec::with_capacity(ids.len());
    for id in ids {
        let solver_config = config
            .solvers
            .get(id)
            .with_context(|| format!("unknown solver id {id}"))?
            .clone();
        let mut handle = SolverHandle::new(id.clone(), solver_config);
        info!("starting solver {id}");
        handle.start().with_context(|| format!("failed to start solver {id}"))?;
        handles.push(handle);
    }
    Ok(handles)
}
