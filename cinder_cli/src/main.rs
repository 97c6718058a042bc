use cinder_core::config::{
    CinderConfig, ConfigInputDelivery, ExecutorType as ConfigExecutorType, FuzzerSettings,
};
use cinder_core::coverage::{
    CoverageReader, FileProbeCoverageReader, InProcessCoverageReader, ProbeSetCompressor,
    record_probe,
};
use cinder_core::dispatch::{CancellationToken, Fuzzer};
use cinder_core::executor::{
    CommandExecutor, CommandExecutorConfig, InProcessExecutor, InputDelivery as CoreInputDelivery,
    TargetExecutor,
};
use cinder_core::fault::{CrashDetector, CrashFault, KindFaultEq};
use cinder_core::minimizer::BlockRemoveMinimizer;
use cinder_core::mutator::ByteAddMutator;
use cinder_core::tracer::Tracer;

use clap::Parser;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(short, long, value_parser)]
    config_file: Option<PathBuf>,
    /// Override the configured subprocess target command.
    #[clap(long)]
    target_command: Option<String>,
    /// Override the configured master seed.
    #[clap(long)]
    seed: Option<u64>,
    /// Override the configured worker cap (1 = deterministic sequential,
    /// 0 = uncapped).
    #[clap(short, long)]
    jobs: Option<usize>,
    /// Stop fuzzing after this many seconds; runs until killed otherwise.
    #[clap(long)]
    duration_secs: Option<u64>,
    /// Additional seed files or directories, on top of the configured ones.
    #[clap(long)]
    seeds: Vec<PathBuf>,
    /// Where crashing inputs and their metadata are written.
    #[clap(long, default_value = "./cinder_crashes")]
    crashes_dir: PathBuf,
}

/// Built-in harness for the in-process executor, so the engine can be
/// exercised without an external target.
fn demo_harness(data: &[u8]) {
    record_probe(0);
    if data.first() == Some(&b'B') {
        record_probe(1);
        if data.get(1) == Some(&b'A') {
            record_probe(2);
            if data.get(2) == Some(&b'D') {
                record_probe(3);
                panic!("BAD input detected by harness!");
            }
        }
    }
}

/// Tracer that prints progress, keeps throughput counters, and persists
/// crash artifacts.
struct ConsoleTracer {
    crashes_dir: PathBuf,
    started: Instant,
    executions: AtomicU64,
    crashes: AtomicU64,
    corpus_additions: AtomicU64,
}

impl ConsoleTracer {
    fn new(crashes_dir: PathBuf) -> Self {
        Self {
            crashes_dir,
            started: Instant::now(),
            executions: AtomicU64::new(0),
            crashes: AtomicU64::new(0),
            corpus_additions: AtomicU64::new(0),
        }
    }

    fn persist_crash(&self, input: &[u8], fault: &CrashFault) -> Result<(), anyhow::Error> {
        fs::create_dir_all(&self.crashes_dir)?;
        let digest = format!("{:x}", md5::compute(input));
        let input_path = self.crashes_dir.join(format!("crash-{digest}"));
        fs::write(&input_path, input)?;

        let metadata = serde_json::json!({
            "input-md5": digest,
            "input-len": input.len(),
            "description": fault.description(),
            "bucket": fault.bucket(),
        });
        let metadata_path = self.crashes_dir.join(format!("crash-{digest}.json"));
        fs::write(&metadata_path, serde_json::to_vec_pretty(&metadata)?)?;
        Ok(())
    }
}

impl Tracer<Vec<u8>, Vec<u64>, CrashFault> for ConsoleTracer {
    fn inputs_enqueued(&self, inputs: &[Vec<u8>]) {
        self.corpus_additions
            .fetch_add(inputs.len() as u64, Ordering::Relaxed);
    }

    fn input_dequeued(&self, _input: &Vec<u8>) {}

    fn input_faulted(&self, input: &Vec<u8>, fault: &CrashFault) {
        let crashes = self.crashes.fetch_add(1, Ordering::Relaxed) + 1;
        println!(
            "\n!!! FAULT #{crashes} !!!\n  Input: {input:?}\n  Description: {}",
            fault.description().unwrap_or("<none>")
        );
        if let Err(e) = self.persist_crash(input, fault) {
            log::warn!("Failed to persist crash artifact: {e}");
        }
    }

    fn input_fuzzed(&self, _input: &Vec<u8>, _raw_coverage: &Vec<u64>) {
        let executions = self.executions.fetch_add(1, Ordering::Relaxed) + 1;
        if executions % 500 == 0 {
            let elapsed = self.started.elapsed().as_secs_f32();
            let execs_per_sec = if elapsed > 0.0 {
                executions as f32 / elapsed
            } else {
                0.0
            };
            print!(
                "\rExecs: {}, Queue additions: {}, Crashes: {}, Execs/sec: {:.2}   ",
                executions,
                self.corpus_additions.load(Ordering::Relaxed),
                self.crashes.load(Ordering::Relaxed),
                execs_per_sec
            );
            let _ = std::io::stdout().flush();
        }
    }

    fn minimization_found(&self, from: &Vec<u8>, to: &Vec<u8>) {
        log::debug!("Minimized {from:?} -> {to:?}");
    }

    fn mutation_found(&self, from: &Vec<u8>, to: &Vec<u8>) {
        log::debug!("Novel mutation {from:?} -> {to:?}");
    }

    fn fuzzer_finished(&self) {
        let elapsed = self.started.elapsed();
        println!(
            "\nFuzzing finished in {:.2?}. Executions: {}, Queue additions: {}, Crashes: {}",
            elapsed,
            self.executions.load(Ordering::Relaxed),
            self.corpus_additions.load(Ordering::Relaxed),
            self.crashes.load(Ordering::Relaxed)
        );
    }
}

fn load_seed_inputs(paths: &[PathBuf]) -> Result<Vec<Vec<u8>>, anyhow::Error> {
    let mut seeds = Vec::new();
    for path in paths {
        if path.is_file() {
            seeds.push(fs::read(path)?);
        } else if path.is_dir() {
            for entry in fs::read_dir(path)? {
                let file_path = entry?.path();
                if file_path.is_file() {
                    seeds.push(fs::read(&file_path)?);
                }
            }
        } else {
            log::warn!("Seed path {path:?} does not exist, skipping");
        }
    }
    Ok(seeds)
}

fn run_fuzzer<E>(
    settings: FuzzerSettings,
    executor: Arc<E>,
    reader: Arc<dyn CoverageReader<E::Target, Vec<u64>>>,
    seeds: Vec<Vec<u8>>,
    crashes_dir: PathBuf,
    duration_secs: Option<u64>,
) -> Result<(), anyhow::Error>
where
    E: TargetExecutor<Vec<u8>> + 'static,
{
    let fuzzer = Fuzzer::new(
        settings,
        executor,
        reader,
        Arc::new(ProbeSetCompressor),
        Arc::new(CrashDetector),
        Arc::new(KindFaultEq),
        Arc::new(BlockRemoveMinimizer),
        Arc::new(ByteAddMutator::new(16)),
        Box::new(ConsoleTracer::new(crashes_dir)),
    );
    fuzzer.enqueue_range(seeds);

    let cancel = CancellationToken::new();
    if let Some(secs) = duration_secs {
        let timer_cancel = cancel.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_secs(secs));
            timer_cancel.cancel();
        });
    }

    fuzzer.run(&cancel)?;
    Ok(())
}

fn main() -> Result<(), anyhow::Error> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = match &cli.config_file {
        Some(config_path) => {
            println!("Loading configuration from specified path: {config_path:?}");
            CinderConfig::load_from_file(config_path)?
        }
        None => {
            let default_config_path = PathBuf::from("cinder.toml");
            if default_config_path.exists() {
                println!(
                    "No config file specified via CLI, loading default: {default_config_path:?}"
                );
                CinderConfig::load_from_file(&default_config_path)?
            } else {
                println!(
                    "No config file specified and default 'cinder.toml' not found, using built-in defaults."
                );
                CinderConfig::default()
            }
        }
    };

    let mut settings = config.fuzzer.take().unwrap_or_default();
    if let Some(seed) = cli.seed {
        settings.seed = seed;
    }
    if let Some(jobs) = cli.jobs {
        settings.max_parallelism = jobs;
    }

    if let Some(target_cmd) = cli.target_command {
        if config.executor.executor_type == ConfigExecutorType::Command {
            let cmd_settings = config
                .executor
                .command_settings
                .get_or_insert_with(Default::default);
            if cmd_settings.command.is_empty() {
                cmd_settings.command.push(target_cmd);
            } else {
                cmd_settings.command[0] = target_cmd;
            }
        } else {
            println!(
                "Warning: --target-command specified but executor type is not 'command'. Override ignored."
            );
        }
    }

    let mut seed_paths: Vec<PathBuf> = config
        .seeds
        .as_ref()
        .map(|s| s.paths.clone())
        .unwrap_or_default();
    seed_paths.extend(cli.seeds.iter().cloned());
    let mut seeds = load_seed_inputs(&seed_paths)?;
    if seeds.is_empty() {
        seeds.push(b"INIT".to_vec());
    }

    println!(
        "Starting fuzzer: seed={}, max-parallelism={}, {} seed input(s)",
        settings.seed,
        settings.max_parallelism,
        seeds.len()
    );

    match config.executor.executor_type {
        ConfigExecutorType::InProcess => run_fuzzer(
            settings,
            Arc::new(InProcessExecutor::new(demo_harness)),
            Arc::new(InProcessCoverageReader),
            seeds,
            cli.crashes_dir,
            cli.duration_secs,
        ),
        ConfigExecutorType::Command => {
            let cmd_settings = config.executor.command_settings.ok_or_else(|| {
                anyhow::anyhow!("Command settings missing for command executor type in config")
            })?;
            if cmd_settings.command.is_empty() {
                anyhow::bail!("No target command configured; pass --target-command or set one in the config file");
            }

            let input_delivery = match cmd_settings.input_delivery {
                ConfigInputDelivery::StdIn => CoreInputDelivery::StdIn,
                ConfigInputDelivery::File { template } => CoreInputDelivery::File(template),
            };
            let exec_config = CommandExecutorConfig {
                command: cmd_settings.command,
                input_delivery,
                timeout: Duration::from_millis(cmd_settings.timeout_ms),
                working_dir: cmd_settings.working_dir,
            };
            run_fuzzer(
                settings,
                Arc::new(CommandExecutor::new(exec_config)),
                Arc::new(FileProbeCoverageReader),
                seeds,
                cli.crashes_dir,
                cli.duration_secs,
            )
        }
    }
}
