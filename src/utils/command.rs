/// Functions and structs for building and running external tool command lines

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{anyhow, Result};
use lazy_static::lazy_static;
use log::{debug, warn};
use regex::Regex;
use tokio::process::Command;

use crate::config::defs::TOOL_VERSIONS;


/// One fully specified external call: program plus argument vector.
/// Arguments are passed to the OS as-is, never through a shell.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub tool: String,
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl ToolInvocation {
    pub fn new(tool: &str, program: impl Into<PathBuf>) -> Self {
        ToolInvocation {
            tool: tool.to_string(),
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    /// Short description of a failed run for error messages.
    pub fn failure_summary(&self) -> String {
        let code = self.code.map_or_else(|| "signal".to_string(), |c| c.to_string());
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            format!("exit status {}", code)
        } else {
            format!("exit status {}: {}", code, stderr.lines().last().unwrap_or(stderr))
        }
    }
}

/// Runs external tools. The pipeline only ever talks to tools through this,
/// so tests can substitute a recording implementation.
#[allow(async_fn_in_trait)]
pub trait ToolRunner {
    /// Runs the invocation to completion. Err only when the process could
    /// not be started; a nonzero exit is reported through `ToolOutput`.
    async fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput>;
}

/// Spawns real processes with tokio.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ToolRunner for ProcessRunner {
    async fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput> {
        debug!("{} args: {:?}", invocation.tool, invocation.args);
        let output = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| anyhow!("Failed to spawn {}: {}. Is {} installed?", invocation.program.display(), e, invocation.tool))?;

        Ok(ToolOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}


pub mod seqkit {
    use std::path::Path;
    use crate::config::defs::{FilterSettings, SeqkitSubcommand, SEQKIT_TAG};
    use super::ToolInvocation;

    #[derive(Debug)]
    pub struct SeqkitConfig<'a> {
        pub subcommand: SeqkitSubcommand,
        pub settings: &'a FilterSettings,
    }

    pub fn arg_generator(config: &SeqkitConfig, input: &Path, output: &Path) -> ToolInvocation {
        match config.subcommand {
            SeqkitSubcommand::Seq => ToolInvocation::new(SEQKIT_TAG, SEQKIT_TAG)
                .arg("seq")
                .arg("-m")
                .arg(config.settings.min_len.to_string())
                .arg("-M")
                .arg(config.settings.max_len.to_string())
                .arg("-Q")
                .arg(config.settings.min_qual.to_string())
                .arg("-j")
                .arg(config.settings.threads.to_string())
                .arg("-o")
                .arg(output)
                .arg(input),
        }
    }
}

pub mod nanocomp {
    use std::path::{Path, PathBuf};
    use crate::config::defs::{ReportSettings, NANOCOMP_TAG};
    use super::ToolInvocation;

    /// One call covering every sample: all files, then all labels in the same order.
    pub fn arg_generator(settings: &ReportSettings, files: &[PathBuf], labels: &[String], out_dir: &Path) -> ToolInvocation {
        ToolInvocation::new(NANOCOMP_TAG, settings.program())
            .arg("--fastq")
            .args(files.iter().map(|f| f.as_os_str().to_owned()))
            .arg("--names")
            .args(labels.iter())
            .arg("--outdir")
            .arg(out_dir)
            .arg("--threads")
            .arg(settings.threads.to_string())
    }
}


lazy_static! {
    static ref VERSION_RE: Regex = Regex::new(r"(\d+)\.(\d+)(?:\.\d+)*").expect("valid version regex");
}

/// Extracts the first dotted version number from tool output, e.g. "NanoComp 1.24.0".
pub fn parse_version(text: &str) -> Option<String> {
    VERSION_RE.find(text).map(|m| m.as_str().to_string())
}

fn major_minor(version: &str) -> Option<(u32, u32)> {
    let caps = VERSION_RE.captures(version)?;
    Some((caps[1].parse().ok()?, caps[2].parse().ok()?))
}

/// Confirms a tool responds to `--version` and returns its version string.
/// Warns, without failing, when it is older than the known-good minimum.
pub async fn check_version<R: ToolRunner>(runner: &R, tool: &str, program: impl Into<PathBuf>) -> Result<String> {
    let invocation = ToolInvocation::new(tool, program).arg("--version");
    let output = runner.run(&invocation).await?;
    if !output.success {
        return Err(anyhow!("{} --version failed with {}", tool, output.failure_summary()));
    }
    let version = parse_version(&output.stdout)
        .or_else(|| parse_version(&output.stderr))
        .ok_or_else(|| anyhow!("No version number in {} --version output: {}", tool, output.stdout.trim()))?;

    if let (Some(found), Some(min)) = (major_minor(&version), TOOL_VERSIONS.get(tool)) {
        if found < *min {
            warn!("{} version {} is older than the tested minimum {}.{}", tool, version, min.0, min.1);
        }
    }
    Ok(version)
}
