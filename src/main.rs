use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;
use std::env;

use anyhow::Result;
use env_logger::Builder;
use log::{error, info, LevelFilter};

use seqtoid_emu::cli::parse;
use seqtoid_emu::config::defs::{PipelineError, RunConfig};
use seqtoid_emu::pipelines::emu_abundance;
use seqtoid_emu::utils::command::ProcessRunner;
use seqtoid_emu::utils::slurm::SlurmScheduler;


#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let run_start = Instant::now();

    let args = parse();

    Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();

    println!("\n-------------\n SeqToID Emu\n-------------\n");

    let dir = env::current_dir()?;
    info!("The current directory is {:?}", dir);

    if let Err(e) = emu_abundance_run(resolve_root(args.input_root, &dir), args.email).await {
        error!("Pipeline failed: {} at {} milliseconds.", e, run_start.elapsed().as_millis());
        std::process::exit(1);
    }

    println!("Run complete: {} milliseconds.", run_start.elapsed().as_millis());
    Ok(())
}

async fn emu_abundance_run(input_root: PathBuf, email: String) -> Result<(), PipelineError> {
    let run_config = RunConfig::from_env(input_root, email)?;
    info!("Input root: {:?}", run_config.input_root);
    info!("Emu database: {:?}", run_config.classifier.database);
    info!("NanoComp environment: {:?}", run_config.report.env_prefix);

    let runner = ProcessRunner;
    let scheduler = SlurmScheduler::new(ProcessRunner);
    let summary = emu_abundance::run(&run_config, &runner, &scheduler).await?;
    info!(
        "{} samples processed ({} filtered, {} already done); classification job {} submitted",
        summary.samples.len(),
        summary.filter.filtered.len(),
        summary.filter.skipped.len(),
        summary.job.job_id
    );
    Ok(())
}

/// Makes a relative input root absolute against the current directory, so
/// the paths embedded in the job script still resolve on the compute node.
fn resolve_root(root: PathBuf, cwd: &Path) -> PathBuf {
    if root.is_absolute() {
        root
    } else {
        cwd.join(root)
    }
}
