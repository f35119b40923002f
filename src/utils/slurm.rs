// src/utils/slurm.rs: Batch job scripts and submission

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use lazy_static::lazy_static;
use regex::Regex;

use crate::config::defs::{ClassifierSettings, EmuSubcommand, SlurmSettings, EMU_SEQ_TYPE, EMU_TAG, FILTERED_EXT, SBATCH_TAG};
use crate::utils::command::{ToolInvocation, ToolRunner};
use crate::utils::sample::SampleId;


/// One word of a generated shell command line.
#[derive(Debug, Clone, PartialEq)]
pub enum ShellArg {
    /// Emitted single-quoted, so the shell sees it byte for byte.
    Literal(String),
    /// Emitted as `"$name"`: expanded when the script runs, never word-split.
    Var(String),
}

/// Builds a command line for a generated script from structured words
/// instead of string concatenation.
#[derive(Debug, Clone, PartialEq)]
pub struct ShellCommand {
    words: Vec<ShellArg>,
}

impl ShellCommand {
    pub fn new(program: &str) -> Self {
        ShellCommand { words: vec![ShellArg::Literal(program.to_string())] }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.words.push(ShellArg::Literal(arg.into()));
        self
    }

    pub fn path(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy())
    }

    pub fn var(mut self, name: &str) -> Self {
        self.words.push(ShellArg::Var(name.to_string()));
        self
    }

    pub fn words(&self) -> &[ShellArg] {
        &self.words
    }

    pub fn render(&self) -> String {
        self.words
            .iter()
            .map(|w| match w {
                ShellArg::Literal(s) => shell_quote(s),
                ShellArg::Var(name) => format!("\"${}\"", name),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// POSIX single-quoting. Words made only of safe characters are left bare.
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ',' | ':' | '=' | '@' | '+'));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', "'\\''"))
    }
}

/// The emu call run once per filtered file inside the job's loop.
pub fn emu_command(subcommand: EmuSubcommand, settings: &ClassifierSettings, out_dir_var: &str, sample_var: &str, file_var: &str) -> ShellCommand {
    match subcommand {
        EmuSubcommand::Abundance => ShellCommand::new(EMU_TAG)
            .arg("abundance")
            .arg("--type")
            .arg(EMU_SEQ_TYPE)
            .arg("--keep-counts")
            .arg("--keep-read-assignments")
            .arg("--threads")
            .arg(settings.threads.to_string())
            .arg("--db")
            .path(&settings.database)
            .arg("--output-unclassified")
            .arg("--output-dir")
            .var(out_dir_var)
            .arg("--output-basename")
            .var(sample_var)
            .var(file_var),
    }
}

/// `#SBATCH` values are written verbatim and must stay one token on one line:
/// sbatch stops reading directives at the first line that is not one.
pub fn check_directive_value(name: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(anyhow!("{} is empty", name));
    }
    if let Some(bad) = value.chars().find(|c| c.is_whitespace() || c.is_control() || matches!(c, '"' | '\'' | '\\')) {
        return Err(anyhow!("{} {:?} contains {:?}, which cannot appear in a job script header", name, value, bad));
    }
    Ok(())
}

/// A rendered sbatch script, ready to be written and submitted.
#[derive(Debug, Clone, PartialEq)]
pub struct JobDescriptor {
    pub script: String,
}

impl JobDescriptor {
    /// Renders the classification job. The sample loop globs the input
    /// directory when the job runs, so files added after submission are
    /// still classified; `samples` only documents what existed at render time.
    pub fn classification(
        slurm: &SlurmSettings,
        classifier: &ClassifierSettings,
        email: &str,
        input_dir: &Path,
        output_dir: &Path,
        samples: &[SampleId],
    ) -> Result<Self> {
        let out = output_dir.to_string_lossy();
        let directives = [
            ("job-name", slurm.job_name.clone()),
            ("ntasks", slurm.ntasks.to_string()),
            ("cpus-per-task", slurm.cpus_per_task.to_string()),
            ("mem", slurm.mem.clone()),
            ("nodelist", slurm.nodelist.clone()),
            ("mail-type", slurm.mail_type.clone()),
            ("mail-user", email.to_string()),
            ("chdir", out.to_string()),
            ("output", format!("{}/{}_%j.log", out, slurm.job_name)),
        ];

        let mut lines = vec!["#!/bin/bash".to_string()];
        for (name, value) in &directives {
            check_directive_value(name, value)?;
            lines.push(format!("#SBATCH --{}={}", name, value));
        }
        lines.push(String::new());
        lines.push("# Samples present at submission:".to_string());
        lines.extend(samples.iter().map(|sample| format!("#   {}", sample)));
        lines.push(String::new());
        lines.push("set -euo pipefail".to_string());
        lines.push(String::new());
        lines.push(format!("IN_DIR={}", shell_quote(&input_dir.to_string_lossy())));
        lines.push(format!("OUT_DIR={}", shell_quote(&out)));
        lines.push(String::new());
        lines.push(format!("for f in \"$IN_DIR\"/*.{}; do", FILTERED_EXT));
        lines.push("    [ -e \"$f\" ] || continue".to_string());
        lines.push(format!("    sample=\"$(basename \"$f\" .{})\"", FILTERED_EXT));
        lines.push(format!("    {}", emu_command(EmuSubcommand::Abundance, classifier, "OUT_DIR", "sample", "f").render()));
        lines.push("done".to_string());
        lines.push(String::new());

        Ok(JobDescriptor { script: lines.join("\n") })
    }
}

/// Acknowledgement of a submitted job. Holding one says nothing about the
/// job's progress; the pipeline's responsibility ends at submission.
#[derive(Debug, Clone, PartialEq)]
pub struct JobHandle {
    pub job_id: String,
    pub descriptor: PathBuf,
}

#[allow(async_fn_in_trait)]
pub trait BatchScheduler {
    async fn submit(&self, descriptor: &Path) -> Result<JobHandle>;
}

lazy_static! {
    static ref SUBMITTED_RE: Regex = Regex::new(r"Submitted batch job (\d+)").expect("valid sbatch regex");
}

pub fn parse_sbatch_output(stdout: &str) -> Option<String> {
    SUBMITTED_RE.captures(stdout).map(|c| c[1].to_string())
}

/// Submits through `sbatch`, using the given runner to spawn it.
pub struct SlurmScheduler<R: ToolRunner> {
    runner: R,
}

impl<R: ToolRunner> SlurmScheduler<R> {
    pub fn new(runner: R) -> Self {
        SlurmScheduler { runner }
    }
}

impl<R: ToolRunner> BatchScheduler for SlurmScheduler<R> {
    async fn submit(&self, descriptor: &Path) -> Result<JobHandle> {
        let invocation = ToolInvocation::new(SBATCH_TAG, SBATCH_TAG).arg(descriptor);
        let output = self.runner.run(&invocation).await?;
        if !output.success {
            return Err(anyhow!("sbatch rejected {:?} with {}", descriptor, output.failure_summary()));
        }
        let job_id = parse_sbatch_output(&output.stdout)
            .ok_or_else(|| anyhow!("Unexpected sbatch output: {}", output.stdout.trim()))?;
        Ok(JobHandle { job_id, descriptor: descriptor.to_path_buf() })
    }
}
