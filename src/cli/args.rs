use std::path::PathBuf;

use clap::Parser;

/// Aggregates, filters and compares nanopore 16S samples, then submits an
/// emu abundance job to SLURM.
#[derive(Parser, Debug, Clone)]
#[command(name = "seqtoid-emu", version)]
pub struct Arguments {
    /// Run directory holding one `<prefix>_<sample>` subdirectory per sample.
    pub input_root: PathBuf,

    /// Address SLURM notifies when the classification job ends or fails.
    pub email: String,
}
