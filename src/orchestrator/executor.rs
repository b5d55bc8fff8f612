//! Kernel compilation collaborator
//!
//! The pipeline only prepares the tree; turning it into an image is delegated
//! to a [`Compiler`]. [`MakeCompiler`] drives the kernel's own Kbuild.

use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Command, Stdio};

use crate::config::BuildSettings;
use crate::error::BuildError;

pub trait Compiler {
    /// Build the image for the configuration already written to the tree.
    fn compile(&self, tree_root: &Path, settings: &BuildSettings) -> Result<(), BuildError>;
}

/// Clang/LLVM Kbuild invocation: `olddefconfig`, then the image target.
#[derive(Debug, Clone)]
pub struct MakeCompiler {
    program: String,
    jobs: usize,
    extra_args: Vec<String>,
}

impl Default for MakeCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl MakeCompiler {
    pub fn new() -> Self {
        MakeCompiler {
            program: "make".to_string(),
            jobs: num_cpus::get(),
            extra_args: Vec::new(),
        }
    }

    pub fn with_program(mut self, program: &str) -> Self {
        self.program = program.to_string();
        self
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    /// Extra `VAR=value` arguments passed to every invocation.
    pub fn with_args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.extra_args.extend(args);
        self
    }

    fn base_args(&self, settings: &BuildSettings) -> Vec<String> {
        let mut args = vec![
            format!("O={}", settings.out_dir.display()),
            format!("ARCH={}", settings.arch),
            "LLVM=1".to_string(),
            "LLVM_IAS=1".to_string(),
        ];
        args.extend(self.extra_args.iter().cloned());
        args
    }

    fn olddefconfig_args(&self, settings: &BuildSettings) -> Vec<String> {
        let mut args = self.base_args(settings);
        args.push("olddefconfig".to_string());
        args
    }

    fn image_args(&self, settings: &BuildSettings) -> Vec<String> {
        let mut args = self.base_args(settings);
        args.push(format!("-j{}", self.jobs));
        args.push(settings.image_target.clone());
        args
    }

    fn run(&self, tree_root: &Path, args: &[String]) -> Result<(), BuildError> {
        log::info!("[Build] [EXECUTOR] {} {}", self.program, args.join(" "));
        let mut child = Command::new(&self.program)
            .args(args)
            .current_dir(tree_root)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| BuildError::BuildFailure(format!("failed to start {}: {}", self.program, e)))?;

        // Drain stderr on its own thread so a chatty compiler cannot stall on a full pipe
        let stderr_reader = child.stderr.take().map(|mut stderr| {
            std::thread::spawn(move || {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf);
                buf
            })
        });

        if let Some(stdout) = child.stdout.take() {
            let mut units = 0usize;
            for line in BufReader::new(stdout).lines().map_while(Result::ok) {
                if line.trim_start().starts_with("CC ") {
                    units += 1;
                    if units % 500 == 0 {
                        crate::log_parsed!("[Build] {} compilation units done", units);
                    }
                }
                log::debug!("[Build] {}", line);
            }
        }

        let status = child
            .wait()
            .map_err(|e| BuildError::BuildFailure(format!("{} did not finish: {}", self.program, e)))?;
        let stderr = stderr_reader
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        if !status.success() {
            let tail: Vec<&str> = stderr.lines().rev().take(20).collect::<Vec<_>>().into_iter().rev().collect();
            for line in &tail {
                log::error!("[Build] {}", line);
            }
            return Err(BuildError::BuildFailure(format!(
                "{} exited with {}{}",
                self.program,
                status,
                tail.last().map(|l| format!(": {}", l)).unwrap_or_default()
            )));
        }
        Ok(())
    }
}

impl Compiler for MakeCompiler {
    fn compile(&self, tree_root: &Path, settings: &BuildSettings) -> Result<(), BuildError> {
        self.run(tree_root, &self.olddefconfig_args(settings))?;
        self.run(tree_root, &self.image_args(settings))?;
        crate::log_parsed!("[Build] ✓ {} built", settings.image_target);
        Ok(())
    }
}
