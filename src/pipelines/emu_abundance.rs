use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use log::{debug, error, info, warn};

use crate::config::defs::{
    FilterFailure, PipelineError, RunConfig, SeqkitSubcommand, CONCAT_PREFIX, FILTERED_EXT, FRAGMENT_EXT,
    JOB_DESCRIPTOR, NANOCOMP_TAG, PARTIAL_PREFIX, SEQKIT_TAG,
};
use crate::utils::command::seqkit::SeqkitConfig;
use crate::utils::command::{check_version, nanocomp, seqkit, ToolRunner};
use crate::utils::discovery::{discover_samples, Sample};
use crate::utils::file::{concatenate_atomic, find_files_recursive, is_gzipped, list_files_with_suffix, ConcatError};
use crate::utils::sample::SampleId;
use crate::utils::slurm::{BatchScheduler, JobDescriptor, JobHandle};


#[derive(Debug, Default, Clone, PartialEq)]
pub struct FilterSummary {
    pub filtered: Vec<SampleId>,
    pub skipped: Vec<SampleId>,
}

/// File paths and display labels for the comparative report, index-aligned.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportInputs {
    files: Vec<PathBuf>,
    labels: Vec<String>,
}

impl ReportInputs {
    pub fn new(files: Vec<PathBuf>, labels: Vec<String>) -> Result<Self, PipelineError> {
        if files.len() != labels.len() {
            return Err(PipelineError::DiscoveryInvariant { files: files.len(), labels: labels.len() });
        }
        Ok(ReportInputs { files, labels })
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub samples: Vec<SampleId>,
    pub filter: FilterSummary,
    pub job: JobHandle,
}

fn ensure_dir(dir: &Path) -> Result<(), PipelineError> {
    fs::create_dir_all(dir).map_err(|e| PipelineError::IOError(format!("Cannot create {:?}: {}", dir, e)))
}


/// Concatenates every sample's fragments into `concatenated_<id>.fastq.gz`.
/// Output is always rewritten; a failed read aborts the whole stage.
///
/// # Arguments
///
/// * `samples` - Discovered samples with their fragment lists.
/// * `out_dir` - Aggregation directory, created if absent.
///
/// # Returns
/// Paths of the aggregated files, one per sample.
pub fn aggregate_samples(samples: &[Sample], out_dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    let stage_start = Instant::now();
    ensure_dir(out_dir)?;

    let mut outputs = Vec::with_capacity(samples.len());
    for sample in samples {
        if sample.fragments.is_empty() {
            warn!("Sample {} has no .{} files in {:?}; writing an empty aggregate", sample.id, FRAGMENT_EXT, sample.dir);
        }
        for fragment in &sample.fragments {
            if let Ok(false) = is_gzipped(fragment) {
                warn!("{:?} does not look gzip-compressed", fragment);
            }
        }

        let out_path = out_dir.join(sample.id.concatenated_name());
        concatenate_atomic(&sample.fragments, &out_path).map_err(|e| match e {
            ConcatError::Input(path, source) => PipelineError::Aggregation { sample: sample.id.clone(), path, source },
            ConcatError::Output(e) => PipelineError::IOError(format!("Cannot write {:?}: {}", out_path, e)),
        })?;
        info!("Aggregated {} fragment(s) for sample {} into {:?}", sample.fragments.len(), sample.id, out_path);
        outputs.push(out_path);
    }

    info!("Aggregation finished for {} samples in {} ms", samples.len(), stage_start.elapsed().as_millis());
    Ok(outputs)
}


/// Length/quality filters every aggregated file that has no filtered
/// counterpart yet. seqkit must answer `--version` before any sample is
/// filtered. Per-sample tool failures are collected; the stage reports them
/// all once every sample has been attempted.
///
/// # Arguments
///
/// * `config` - RunConfig from main.
/// * `runner` - Runs seqkit.
/// * `in_dir` - Aggregation directory to scan.
/// * `out_dir` - Filter output directory, created if absent.
///
/// # Returns
/// Which samples were filtered and which were skipped.
pub async fn filter_samples<R: ToolRunner>(
    config: &RunConfig,
    runner: &R,
    in_dir: &Path,
    out_dir: &Path,
) -> Result<FilterSummary, PipelineError> {
    let stage_start = Instant::now();

    let inputs = list_files_with_suffix(in_dir, FRAGMENT_EXT)
        .map_err(|e| PipelineError::IOError(e.to_string()))?;

    let seqkit_config = SeqkitConfig { subcommand: SeqkitSubcommand::Seq, settings: &config.filter };
    let mut summary = FilterSummary::default();
    let mut failures = Vec::new();

    let mut pending = Vec::new();
    for input in inputs {
        let is_aggregate = input
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(CONCAT_PREFIX));
        if !is_aggregate {
            debug!("Ignoring {:?}: not an aggregated sample file", input);
            continue;
        }
        let id = match SampleId::from_concatenated(&input) {
            Ok(id) => id,
            Err(e) => {
                warn!("Skipping {:?}: {}", input, e);
                continue;
            }
        };
        let final_path = out_dir.join(id.filtered_name());
        if final_path.exists() {
            info!("Skipping sample {}: {:?} already exists", id, final_path);
            summary.skipped.push(id);
            continue;
        }
        pending.push((id, input, final_path));
    }

    if !pending.is_empty() {
        let version = check_version(runner, SEQKIT_TAG, SEQKIT_TAG)
            .await
            .map_err(|e| PipelineError::Environment(e.to_string()))?;
        info!("Using {} {}", SEQKIT_TAG, version);
    }
    ensure_dir(out_dir)?;

    for (id, input, final_path) in pending {
        let file_start = Instant::now();
        let partial_path = out_dir.join(format!("{}{}", PARTIAL_PREFIX, id.filtered_name()));
        let invocation = seqkit::arg_generator(&seqkit_config, &input, &partial_path);

        let result = match runner.run(&invocation).await {
            Ok(output) if output.success => fs::rename(&partial_path, &final_path)
                .map_err(|e| format!("cannot move {:?} into place: {}", partial_path, e)),
            Ok(output) => Err(output.failure_summary()),
            Err(e) => Err(e.to_string()),
        };

        match result {
            Ok(()) => {
                info!("Filtered sample {} in {} ms", id, file_start.elapsed().as_millis());
                summary.filtered.push(id);
            }
            Err(error) => {
                error!("{} failed for sample {}: {}", SEQKIT_TAG, id, error);
                let _ = fs::remove_file(&partial_path);
                failures.push(FilterFailure { sample: id, error });
            }
        }
    }

    info!(
        "Filtering finished in {} ms: {} filtered, {} skipped, {} failed",
        stage_start.elapsed().as_millis(),
        summary.filtered.len(),
        summary.skipped.len(),
        failures.len()
    );

    if !failures.is_empty() {
        return Err(PipelineError::FilterTool { failures });
    }
    Ok(summary)
}


/// Finds every filtered file under `dir` and pairs it with its sample label.
pub fn collect_report_inputs(dir: &Path) -> Result<ReportInputs, PipelineError> {
    let files = find_files_recursive(dir, FILTERED_EXT).map_err(|e| PipelineError::IOError(e.to_string()))?;
    let dotted = format!(".{}", FILTERED_EXT);
    let labels = files
        .iter()
        .filter_map(|f| f.file_name().and_then(|n| n.to_str()))
        .filter_map(|n| n.strip_suffix(&dotted))
        .map(str::to_string)
        .collect();
    ReportInputs::new(files, labels)
}

/// Produces one NanoComp comparison across all filtered samples.
/// Every precondition is checked before NanoComp is run for real, and an
/// empty input set is rejected before NanoComp is touched at all.
///
/// # Arguments
///
/// * `config` - RunConfig from main.
/// * `runner` - Runs NanoComp.
/// * `in_dir` - Directory holding the filtered files.
/// * `out_dir` - Report directory.
///
/// # Returns
/// The inputs the report was built from.
pub async fn compare_reads<R: ToolRunner>(
    config: &RunConfig,
    runner: &R,
    in_dir: &Path,
    out_dir: &Path,
) -> Result<ReportInputs, PipelineError> {
    let stage_start = Instant::now();

    if !in_dir.is_dir() {
        return Err(PipelineError::Discovery(format!("Report input directory {:?} does not exist", in_dir)));
    }
    let env_prefix = &config.report.env_prefix;
    if !env_prefix.is_dir() {
        return Err(PipelineError::Environment(format!(
            "{} environment {:?} does not exist",
            NANOCOMP_TAG, env_prefix
        )));
    }
    let inputs = collect_report_inputs(in_dir)?;
    if inputs.is_empty() {
        return Err(PipelineError::NoInput { dir: in_dir.to_path_buf() });
    }
    let version = check_version(runner, NANOCOMP_TAG, config.report.program())
        .await
        .map_err(|e| PipelineError::Environment(e.to_string()))?;
    info!("Using {} {} from {:?}", NANOCOMP_TAG, version, env_prefix);

    ensure_dir(out_dir)?;
    let invocation = nanocomp::arg_generator(&config.report, inputs.files(), inputs.labels(), out_dir);
    let output = runner.run(&invocation).await.map_err(|e| PipelineError::ToolExecution {
        tool: NANOCOMP_TAG.to_string(),
        error: e.to_string(),
    })?;
    if !output.success {
        return Err(PipelineError::ToolExecution {
            tool: NANOCOMP_TAG.to_string(),
            error: output.failure_summary(),
        });
    }

    info!(
        "{} report for {} samples written to {:?} in {} ms",
        NANOCOMP_TAG,
        inputs.files().len(),
        out_dir,
        stage_start.elapsed().as_millis()
    );
    Ok(inputs)
}


/// Writes the classification job script into `out_dir` and submits it.
/// Returns as soon as the scheduler accepts the job.
pub async fn submit_classification<S: BatchScheduler>(
    config: &RunConfig,
    scheduler: &S,
    in_dir: &Path,
    out_dir: &Path,
) -> Result<JobHandle, PipelineError> {
    ensure_dir(out_dir)?;

    let present: Vec<SampleId> = list_files_with_suffix(in_dir, FILTERED_EXT)
        .map_err(|e| PipelineError::IOError(e.to_string()))?
        .iter()
        .filter_map(|f| SampleId::from_filtered(f).ok())
        .collect();

    let descriptor = JobDescriptor::classification(
        &config.slurm,
        &config.classifier,
        &config.email,
        in_dir,
        out_dir,
        &present,
    )
    .map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;
    let descriptor_path = out_dir.join(JOB_DESCRIPTOR);
    fs::write(&descriptor_path, &descriptor.script)
        .map_err(|e| PipelineError::IOError(format!("Cannot write {:?}: {}", descriptor_path, e)))?;
    debug!("Wrote job descriptor {:?}", descriptor_path);

    let handle = scheduler
        .submit(&descriptor_path)
        .await
        .map_err(|e| PipelineError::Submission(e.to_string()))?;
    info!("Submitted classification job {} for {} samples", handle.job_id, present.len());
    Ok(handle)
}


/// Run function for the emu abundance pipeline
///
/// # Arguments
///
/// * `config` - RunConfig struct from main.
/// * `runner` - Runs seqkit and NanoComp.
/// * `scheduler` - Accepts the classification job.
///
/// # Returns
/// Result<RunSummary, PipelineError>
pub async fn run<R: ToolRunner, S: BatchScheduler>(
    config: &RunConfig,
    runner: &R,
    scheduler: &S,
) -> Result<RunSummary, PipelineError> {
    let dirs = &config.dirs;

    let samples = discover_samples(&config.input_root)?;
    info!(
        "Discovered {} samples: {}",
        samples.len(),
        samples.iter().map(|s| s.id.as_str()).collect::<Vec<_>>().join(", ")
    );

    aggregate_samples(&samples, &dirs.concat)?;
    let filter = filter_samples(config, runner, &dirs.concat, &dirs.filtered).await?;
    compare_reads(config, runner, &dirs.filtered, &dirs.report).await?;
    let job = submit_classification(config, scheduler, &dirs.filtered, &dirs.classification).await?;

    Ok(RunSummary {
        samples: samples.into_iter().map(|s| s.id).collect(),
        filter,
        job,
    })
}


#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn test_report_inputs_reject_misaligned_lists() {
        let err = ReportInputs::new(
            vec![PathBuf::from("S1.filtered.fastq.gz"), PathBuf::from("S2.filtered.fastq.gz")],
            vec!["S1".to_string()],
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::DiscoveryInvariant { files: 2, labels: 1 }));
    }

    #[test]
    fn test_collect_report_inputs_labels_strip_extension() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("S2.filtered.fastq.gz"), b"")?;
        fs::write(dir.path().join("S1.filtered.fastq.gz"), b"")?;
        fs::write(dir.path().join(".partial_S3.filtered.fastq.gz"), b"")?;
        fs::write(dir.path().join("S4.fastq.gz"), b"")?;

        let inputs = collect_report_inputs(dir.path())?;
        assert_eq!(inputs.labels(), &["S1".to_string(), "S2".to_string()]);
        assert_eq!(inputs.files()[0], dir.path().join("S1.filtered.fastq.gz"));
        Ok(())
    }

    #[test]
    fn test_aggregate_empty_sample_writes_empty_file() -> Result<()> {
        let root = tempfile::tempdir()?;
        let sample = Sample {
            id: SampleId::parse("S9")?,
            dir: root.path().join("run1_S9"),
            fragments: Vec::new(),
        };
        let out_dir = root.path().join("concat_fastqpass");
        let outputs = aggregate_samples(&[sample], &out_dir)?;
        assert_eq!(outputs, vec![out_dir.join("concatenated_S9.fastq.gz")]);
        assert_eq!(fs::read(&outputs[0])?.len(), 0);
        Ok(())
    }

    #[test]
    fn test_aggregate_unreadable_fragment_names_sample() -> Result<()> {
        let root = tempfile::tempdir()?;
        let missing = root.path().join("run1_S1/gone.fastq.gz");
        let sample = Sample {
            id: SampleId::parse("S1")?,
            dir: root.path().join("run1_S1"),
            fragments: vec![missing.clone()],
        };
        match aggregate_samples(&[sample], &root.path().join("concat_fastqpass")) {
            Err(PipelineError::Aggregation { sample, path, .. }) => {
                assert_eq!(sample.as_str(), "S1");
                assert_eq!(path, missing);
            }
            other => panic!("expected aggregation error, got {:?}", other),
        }
        Ok(())
    }
}
