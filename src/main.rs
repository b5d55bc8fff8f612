//! gki_builder - GKI variant builder.
//!
//! Resolves KernelSU/SuSFS/LXC/Baseband-guard selections into a patch plan,
//! applies it to a kernel tree and writes the regenerated configuration.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::LevelFilter;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use gki_builder::config::loader;
use gki_builder::orchestrator::detect_kernel_version;
use gki_builder::{
    log_parsed, BuildError, BuildSettings, DiskTree, FeatureSpec, GitSourceCache, GnuPatch,
    LogCollector, MakeCompiler, PatchResolver, Pipeline, RawFlags,
};

#[derive(Parser)]
#[command(name = "gki_builder")]
#[command(version, about = "GKI kernel variant builder")]
#[command(
    after_help = "QUICK START:\n  KSU=NEXT SUSFS=1 gki_builder plan     Show what would be applied\n  KSU=NEXT SUSFS=1 gki_builder apply    Patch ./ and write out/.config\n  gki_builder apply --compile           ...and build the image"
)]
struct Cli {
    /// Settings file (default: ~/.config/gki-builder/settings.toml)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Echo debug output to the terminal
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct FeatureArgs {
    /// Root-management module: NONE, OFFICIAL, NEXT or SUKI
    #[arg(long, env = "KSU")]
    ksu: Option<String>,

    /// Integrate SuSFS (1/y/yes/t/true/on)
    #[arg(long, env = "SUSFS")]
    susfs: Option<String>,

    /// Container support patch
    #[arg(long, env = "LXC")]
    lxc: Option<String>,

    /// Baseband-guard LSM
    #[arg(long, env = "BBG")]
    bbg: Option<String>,

    /// LTO mode: thin or full
    #[arg(long, env = "LTO")]
    lto: Option<String>,
}

impl FeatureArgs {
    fn into_spec(self) -> Result<FeatureSpec, BuildError> {
        RawFlags {
            ksu: self.ksu,
            susfs: self.susfs,
            lxc: self.lxc,
            bbg: self.bbg,
            lto: self.lto,
        }
        .into_spec()
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve the feature selection and print the plan
    Plan {
        #[command(flatten)]
        features: FeatureArgs,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Patch the kernel tree and write the regenerated configuration
    Apply {
        #[command(flatten)]
        features: FeatureArgs,

        /// Kernel source tree
        #[arg(long, default_value = ".")]
        tree: PathBuf,

        /// Build the image after configuring
        #[arg(long)]
        compile: bool,

        /// Parallel compile jobs (default: all CPUs)
        #[arg(short, long)]
        jobs: Option<usize>,
    },

    /// Print the artifact name for a feature selection
    Name {
        #[command(flatten)]
        features: FeatureArgs,

        /// Kernel version (default: read from the tree's Makefile)
        #[arg(long)]
        kernel_version: Option<String>,

        /// Kernel source tree
        #[arg(long, default_value = ".")]
        tree: PathBuf,
    },

    /// Write the effective settings to a file
    InitSettings {
        /// Destination (default: ~/.config/gki-builder/settings.toml)
        path: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => {
            log::logger().flush();
            ExitCode::SUCCESS
        }
        Err(e) => {
            match e.downcast_ref::<BuildError>() {
                Some(build) => {
                    log::error!("[Main] {}", build);
                    eprintln!("error: {}", build.user_message());
                }
                None => {
                    log::error!("[Main] {:#}", e);
                    eprintln!("error: {:#}", e);
                }
            }
            log::logger().flush();
            ExitCode::FAILURE
        }
    }
}

fn init_logging(settings: &BuildSettings, verbose: bool) -> Result<LogCollector> {
    let level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };
    let collector = LogCollector::new(&settings.log_dir, level)
        .map_err(anyhow::Error::msg)
        .with_context(|| format!("initializing logs in {}", settings.log_dir.display()))?;
    collector.install().map_err(anyhow::Error::msg)
}

fn run(cli: Cli) -> Result<()> {
    let settings = loader::load_or_default(cli.settings.as_deref()).map_err(BuildError::from)?;
    let logger = init_logging(&settings, cli.verbose)?;
    log::info!(
        "[Main] gki_builder {} (logs: {})",
        gki_builder::VERSION,
        logger.session().full.display()
    );

    match cli.command {
        Commands::Plan { features, json } => {
            let spec = features.into_spec()?;
            let mut sources = GitSourceCache::new(settings.cache_dir.clone(), settings.hosts.clone());
            let plan = PatchResolver::new(&settings).resolve(&spec, &mut sources).map_err(BuildError::from)?;
            if json {
                println!("{}", plan.to_json().context("serializing plan")?);
            } else {
                for (idx, step) in plan.steps().iter().enumerate() {
                    println!("{:>3}. {}", idx + 1, step);
                }
            }
        }

        Commands::Apply {
            features,
            tree,
            compile,
            jobs,
        } => {
            let spec = features.into_spec()?;
            let mut sources = GitSourceCache::new(settings.cache_dir.clone(), settings.hosts.clone());
            let mut tree = DiskTree::new(tree);
            let patcher = GnuPatch::new();
            let mut compiler = MakeCompiler::new();
            if let Some(jobs) = jobs {
                compiler = compiler.with_jobs(jobs);
            }

            let mut pipeline = Pipeline::new(&settings, &patcher);
            if compile {
                pipeline = pipeline.with_compiler(&compiler);
            }
            let outcome = pipeline.run(&spec, &mut sources, &mut tree)?;

            for skipped in &outcome.report.skipped {
                log_parsed!("[Main] Skipped optional step: {}", skipped);
            }
            println!("{}", outcome.variant_name);
        }

        Commands::Name {
            features,
            kernel_version,
            tree,
        } => {
            let spec = features.into_spec()?;
            let version = match kernel_version {
                Some(v) => v,
                None => detect_kernel_version(&DiskTree::new(tree))?,
            };
            println!(
                "{}",
                gki_builder::kernel::variant::name(&settings.kernel_name, &spec, &version)
            );
        }

        Commands::InitSettings { path } => {
            let path = match path {
                Some(p) => p,
                None => loader::get_global_settings_path().map_err(BuildError::from)?,
            };
            write_settings(&settings, &path)?;
            println!("{}", path.display());
        }
    }

    logger
        .wait_for_empty()
        .map_err(anyhow::Error::msg)
        .context("flushing logs")
}

fn write_settings(settings: &BuildSettings, path: &Path) -> Result<()> {
    loader::save_settings_to_file(settings, path)
        .map_err(BuildError::from)
        .with_context(|| format!("writing {}", path.display()))
}
