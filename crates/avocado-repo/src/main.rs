use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use avocado_repo::Result;
use avocado_repo::metadata::{CommandIndexer, Variant};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Log filter directive (e.g. `info`, `avocado_repo=debug`)
    #[arg(long, global = true, env = "AVOCADO_REPO_LOG", default_value = "info")]
    log_level: String,
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
    /// Package file extension (repeatable)
    #[arg(long = "package-ext", global = true, default_value = "rpm")]
    package_ext: Vec<String>,
    /// Repository metadata indexer program (default: createrepo_c)
    #[arg(long, global = true, env = "AVOCADO_REPO_INDEXER")]
    indexer: Option<String>,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Write `<target>-fragment.json` listing the target's populated repositories
    Fragment {
        /// Deploy directory of the target's package build
        source_dir: PathBuf,
        target: String,
        output_dir: PathBuf,
        /// Value for `$releasever` (empty: take it from the map file)
        releasever: String,
        /// Repository map (default: <source_dir>/repo-map.conf)
        #[arg(long)]
        map_file: Option<PathBuf>,
    },
    /// Merge fragments into a targets.json manifest
    Aggregate {
        fragments_dir: PathBuf,
        output: PathBuf,
        /// Previous manifest (default: the output file when present)
        existing: Option<PathBuf>,
        /// Also refresh this persistent copy after a successful write
        #[arg(long)]
        persist: Option<PathBuf>,
    },
    /// Create or update repository metadata for every selected leaf directory
    Metadata {
        #[arg(value_enum)]
        variant: Variant,
        deploy_dir: PathBuf,
        /// Reserved; accepted but not applied to generated metadata
        base_url: Option<String>,
        /// Write metadata here instead of next to the packages
        output_dir: Option<PathBuf>,
    },
    /// Print the latest release under a codename's releases directory
    LatestRelease {
        releases_base: PathBuf,
        #[arg(long, default_value = avocado_repo::release::DEFAULT_RELEASE_PATTERN)]
        pattern: String,
    },
    /// Print a fresh release id
    NewRelease {
        releases_base: PathBuf,
        /// Create the release directory as well
        #[arg(long)]
        create: bool,
    },
    /// Write SHA256SUMS for every package file under a tree
    Checksums {
        root: PathBuf,
        /// Worker threads (0 = CPU count)
        #[arg(long, default_value_t = 0)]
        jobs: usize,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Run fragments, aggregation and metadata from a TOML config
    Publish {
        config: PathBuf,
        /// Print what would run without writing anything
        #[arg(long)]
        dry_run: bool,
    },
}

fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let args = Args::parse();
    if let Err(e) = avocado_repo::logging::init_logging(&args.log_level, args.log_json) {
        eprintln!("error: {e}");
        return ExitCode::FAILURE;
    }
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let exts = args.package_ext.clone();
    match args.cmd {
        Command::Fragment {
            source_dir,
            target,
            output_dir,
            releasever,
            map_file,
        } => {
            avocado_repo::fragment::generate(&avocado_repo::fragment::GenerateRequest {
                source_dir,
                target,
                output_dir,
                releasever,
                map_file,
                package_extensions: exts,
            })?;
            Ok(())
        }
        Command::Aggregate {
            fragments_dir,
            output,
            existing,
            persist,
        } => {
            avocado_repo::manifest::aggregate(&avocado_repo::manifest::AggregateRequest {
                fragments_dir,
                output,
                existing,
                persist,
            })?;
            Ok(())
        }
        Command::Metadata {
            variant,
            deploy_dir,
            base_url,
            output_dir,
        } => {
            let program = args
                .indexer
                .unwrap_or_else(|| avocado_repo::metadata::indexer::DEFAULT_INDEXER.into());
            let indexer = CommandIndexer::new(program, Vec::new());
            let req = avocado_repo::metadata::UpdateRequest {
                variant,
                deploy_dir,
                base_url,
                output_dir,
                package_extensions: exts,
            };
            avocado_repo::metadata::update(&req, &indexer)?.into_result(variant)?;
            Ok(())
        }
        Command::LatestRelease {
            releases_base,
            pattern,
        } => {
            println!(
                "{}",
                avocado_repo::release::latest_release(&releases_base, &pattern)?
            );
            Ok(())
        }
        Command::NewRelease {
            releases_base,
            create,
        } => {
            let now = chrono::Utc::now();
            let id = if create {
                avocado_repo::release::create_release(&releases_base, &now)?.0
            } else {
                avocado_repo::release::new_release_id(&now)
            };
            println!("{id}");
            Ok(())
        }
        Command::Checksums { root, jobs, output } => {
            avocado_repo::checksums::write_checksums(&avocado_repo::checksums::ChecksumRequest {
                root,
                output,
                jobs,
                package_extensions: exts,
            })?;
            Ok(())
        }
        Command::Publish { config, dry_run } => {
            let doc = avocado_repo::config::load(&config)?;
            let mut cfg = avocado_repo::publish::PublishConfig::from_doc(&doc)?;
            if let Some(program) = args.indexer {
                cfg.indexer.program = program;
            }
            let indexer = cfg.command_indexer();
            let report = avocado_repo::publish::run(&cfg, &indexer, dry_run)?;
            println!("{}", report.release_id);
            Ok(())
        }
    }
}
