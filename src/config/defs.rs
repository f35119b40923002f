use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use thiserror::Error;

use crate::utils::sample::SampleId;
use crate::utils::slurm::check_directive_value;

// External software
pub const SEQKIT_TAG: &str = "seqkit";
pub const NANOCOMP_TAG: &str = "NanoComp";
pub const EMU_TAG: &str = "emu";
pub const SBATCH_TAG: &str = "sbatch";

lazy_static! {
    /// Oldest (major, minor) release each tool has been run with.
    pub static ref TOOL_VERSIONS: HashMap<&'static str, (u32, u32)> = {
        let mut m = HashMap::new();
        m.insert(SEQKIT_TAG, (2, 3));
        m.insert(NANOCOMP_TAG, (1, 20));
        m
    };
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SeqkitSubcommand {
    Seq,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EmuSubcommand {
    Abundance,
}

// Static directory and file names
pub const FRAGMENT_EXT: &str = "fastq.gz";
pub const CONCAT_DIR: &str = "concat_fastqpass";
pub const CONCAT_PREFIX: &str = "concatenated_";
pub const FILTERED_DIR: &str = "seqfiltered";
pub const FILTERED_EXT: &str = "filtered.fastq.gz";
pub const PARTIAL_PREFIX: &str = ".partial_";
pub const REPORT_DIR: &str = "nanocomp_output";
pub const CLASSIFICATION_DIR: &str = "emu_results";
pub const JOB_DESCRIPTOR: &str = "emu_abundance.sbatch";

/// Directories the pipeline itself creates under the input root. Discovery
/// never treats them as sample directories.
pub const STAGE_DIR_NAMES: [&str; 4] = [CONCAT_DIR, FILTERED_DIR, REPORT_DIR, CLASSIFICATION_DIR];

// Static parameters
pub const FILTER_MIN_LEN: u32 = 1200;
pub const FILTER_MAX_LEN: u32 = 1800;
pub const FILTER_MIN_QUAL: u32 = 10;

pub const EMU_THREADS: usize = 8;
pub const EMU_SEQ_TYPE: &str = "map-ont";

pub const SLURM_JOB_NAME: &str = "emu_abundance";
pub const SLURM_NTASKS: u32 = 1;
pub const SLURM_CPUS: u32 = 8;
pub const SLURM_MEM: &str = "16G";
pub const SLURM_MAIL_TYPE: &str = "END,FAIL";

// Deployment defaults, overridable once at startup
pub const DEFAULT_EMU_DB: &str = "/opt/databases/emu_default";
pub const DEFAULT_NANOCOMP_ENV: &str = "/opt/conda/envs/nanocomp";
pub const DEFAULT_SLURM_NODE: &str = "node01";
pub const DEFAULT_TOOL_THREADS: usize = 4;

pub const EMU_DB_VAR: &str = "EMU_DATABASE_DIR";
pub const NANOCOMP_ENV_VAR: &str = "NANOCOMP_ENV_PREFIX";
pub const SLURM_NODE_VAR: &str = "EMU_SLURM_NODE";
pub const THREADS_VAR: &str = "FILTER_THREADS";


/// Output directory of every stage, all rooted at the run's input directory.
#[derive(Debug, Clone, PartialEq)]
pub struct StageDirs {
    pub concat: PathBuf,
    pub filtered: PathBuf,
    pub report: PathBuf,
    pub classification: PathBuf,
}

impl StageDirs {
    pub fn new(root: &Path) -> Self {
        StageDirs {
            concat: root.join(CONCAT_DIR),
            filtered: root.join(FILTERED_DIR),
            report: root.join(REPORT_DIR),
            classification: root.join(CLASSIFICATION_DIR),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterSettings {
    pub min_len: u32,
    pub max_len: u32,
    pub min_qual: u32,
    pub threads: usize,
}

impl Default for FilterSettings {
    fn default() -> Self {
        FilterSettings {
            min_len: FILTER_MIN_LEN,
            max_len: FILTER_MAX_LEN,
            min_qual: FILTER_MIN_QUAL,
            threads: DEFAULT_TOOL_THREADS,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportSettings {
    /// Prefix of the conda environment NanoComp is installed into.
    pub env_prefix: PathBuf,
    pub threads: usize,
}

impl ReportSettings {
    pub fn program(&self) -> PathBuf {
        self.env_prefix.join("bin").join(NANOCOMP_TAG)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierSettings {
    pub database: PathBuf,
    pub threads: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlurmSettings {
    pub job_name: String,
    pub ntasks: u32,
    pub cpus_per_task: u32,
    pub mem: String,
    pub nodelist: String,
    pub mail_type: String,
}

impl Default for SlurmSettings {
    fn default() -> Self {
        SlurmSettings {
            job_name: SLURM_JOB_NAME.to_string(),
            ntasks: SLURM_NTASKS,
            cpus_per_task: SLURM_CPUS,
            mem: SLURM_MEM.to_string(),
            nodelist: DEFAULT_SLURM_NODE.to_string(),
            mail_type: SLURM_MAIL_TYPE.to_string(),
        }
    }
}

pub struct RunConfig {
    pub input_root: PathBuf,
    pub email: String,
    pub dirs: StageDirs,
    pub filter: FilterSettings,
    pub report: ReportSettings,
    pub classifier: ClassifierSettings,
    pub slurm: SlurmSettings,
}

impl RunConfig {
    /// Builds a config from built-in defaults only.
    pub fn new(input_root: PathBuf, email: String) -> Result<Self, PipelineError> {
        if !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
            return Err(PipelineError::InvalidConfig(format!(
                "Notification address '{}' is not an email address",
                email
            )));
        }
        check_directive_value("email", &email).map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;
        check_directive_value("input root", &input_root.to_string_lossy())
            .map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;
        let dirs = StageDirs::new(&input_root);
        Ok(RunConfig {
            input_root,
            email,
            dirs,
            filter: FilterSettings::default(),
            report: ReportSettings {
                env_prefix: PathBuf::from(DEFAULT_NANOCOMP_ENV),
                threads: DEFAULT_TOOL_THREADS,
            },
            classifier: ClassifierSettings {
                database: PathBuf::from(DEFAULT_EMU_DB),
                threads: EMU_THREADS,
            },
            slurm: SlurmSettings::default(),
        })
    }

    /// Builds a config from defaults, then applies the deployment overrides
    /// found in the process environment. Stages never read the environment.
    pub fn from_env(input_root: PathBuf, email: String) -> Result<Self, PipelineError> {
        let mut config = Self::new(input_root, email)?;
        if let Ok(db) = env::var(EMU_DB_VAR) {
            config.classifier.database = PathBuf::from(db);
        }
        if let Ok(prefix) = env::var(NANOCOMP_ENV_VAR) {
            config.report.env_prefix = PathBuf::from(prefix);
        }
        if let Ok(node) = env::var(SLURM_NODE_VAR) {
            check_directive_value(SLURM_NODE_VAR, &node).map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;
            config.slurm.nodelist = node;
        }
        if let Ok(threads) = env::var(THREADS_VAR) {
            let threads: usize = threads.parse().map_err(|_| {
                PipelineError::InvalidConfig(format!("{} must be a positive integer, got '{}'", THREADS_VAR, threads))
            })?;
            if threads == 0 {
                return Err(PipelineError::InvalidConfig(format!("{} must be at least 1", THREADS_VAR)));
            }
            config.filter.threads = threads;
            config.report.threads = threads;
        }
        Ok(config)
    }
}


#[derive(Debug, Clone, PartialEq)]
pub struct FilterFailure {
    pub sample: SampleId,
    pub error: String,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Sample discovery failed: {0}")]
    Discovery(String),

    #[error("Sample id '{id}' is produced by both {first:?} and {second:?}")]
    DuplicateSample {
        id: SampleId,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("Aggregation failed for sample {sample}: cannot read {path:?}: {source}")]
    Aggregation {
        sample: SampleId,
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Filtering failed for {} sample(s): {}", .failures.len(), failure_list(.failures))]
    FilterTool { failures: Vec<FilterFailure> },

    #[error("No filtered files found in {dir:?}")]
    NoInput { dir: PathBuf },

    #[error("Discovered {files} files but {labels} labels")]
    DiscoveryInvariant { files: usize, labels: usize },

    #[error("Environment check failed: {0}")]
    Environment(String),

    #[error("Job submission failed: {0}")]
    Submission(String),

    #[error("{tool} failed: {error}")]
    ToolExecution { tool: String, error: String },

    #[error("Invalid sample id: {0}")]
    InvalidSampleId(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    IOError(String),
}

fn failure_list(failures: &[FilterFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.sample, f.error))
        .collect::<Vec<_>>()
        .join(", ")
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_dirs_layout() {
        let dirs = StageDirs::new(Path::new("/data/run1"));
        assert_eq!(dirs.concat, PathBuf::from("/data/run1/concat_fastqpass"));
        assert_eq!(dirs.filtered, PathBuf::from("/data/run1/seqfiltered"));
        assert_eq!(dirs.report, PathBuf::from("/data/run1/nanocomp_output"));
        assert_eq!(dirs.classification, PathBuf::from("/data/run1/emu_results"));
    }

    #[test]
    fn test_run_config_rejects_bad_email() {
        assert!(matches!(
            RunConfig::new(PathBuf::from("run1"), "nobody".to_string()),
            Err(PipelineError::InvalidConfig(_))
        ));
        assert!(RunConfig::new(PathBuf::from("run1"), "lab@example.org".to_string()).is_ok());
    }

    #[test]
    fn test_run_config_rejects_values_that_break_job_headers() {
        for email in ["lab@x.org\nrm -rf \"$HOME\"", "lab@x.org extra", "lab@x.org\t", "lab\u{7}@x.org"] {
            assert!(
                matches!(
                    RunConfig::new(PathBuf::from("/r"), email.to_string()),
                    Err(PipelineError::InvalidConfig(_))
                ),
                "accepted {:?}",
                email
            );
        }
        assert!(matches!(
            RunConfig::new(PathBuf::from("/runs/my run"), "lab@example.org".to_string()),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_stage_dir_names_match_layout() {
        let dirs = StageDirs::new(Path::new("/data/run1"));
        for dir in [&dirs.concat, &dirs.filtered, &dirs.report, &dirs.classification] {
            let name = dir.file_name().and_then(|n| n.to_str()).unwrap();
            assert!(STAGE_DIR_NAMES.iter().any(|s| *s == name), "{} not listed", name);
        }
    }

    #[test]
    fn test_filter_defaults() {
        let config = RunConfig::new(PathBuf::from("run1"), "lab@example.org".to_string()).unwrap();
        assert_eq!(config.filter.min_len, 1200);
        assert_eq!(config.filter.max_len, 1800);
        assert_eq!(config.filter.min_qual, 10);
        assert_eq!(config.slurm.cpus_per_task, 8);
        assert_eq!(config.slurm.mem, "16G");
    }
}
