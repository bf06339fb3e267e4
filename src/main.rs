use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mc_core::config::{environment_snapshot, RepositoryConfigurationCompiler, RepositoryReflection};
use mc_core::maven::coordinates::{ArtifactIdentification, Coordinate, PartIdentification, Scope};
use mc_core::maven::pom::PomReader;
use mc_core::resolve::clash::{ClashStrategy, ReResolution};
use mc_core::session::{ResolutionRequest, ResolutionSession};

const DEFAULT_CONFIG_FILE: &str = "mc.toml";

#[derive(Parser)]
#[command(name = "mc", version, about = "Resolves Maven dependency graphs into a local cache")]
struct Cli {
    /// settings file; `mc.toml` in the working directory is used if it exists
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// additional configuration layers, applied in order after the settings file
    #[arg(long = "view", global = true)]
    views: Vec<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolves root coordinates (`group:artifact#version`) and prints the result as JSON
    Resolve {
        #[arg(required = true)]
        coordinates: Vec<Coordinate>,
        #[arg(long, default_value = "highest")]
        strategy: ClashStrategy,
        #[arg(long)]
        offline: bool,
        #[arg(long, value_delimiter = ',', default_value = "compile,runtime")]
        scope: Vec<Scope>,
        #[arg(long, value_delimiter = ',', default_value = "jar")]
        parts: Vec<PartIdentification>,
        /// `group:artifact` patterns to leave out everywhere, `*` matching anything
        #[arg(long, value_delimiter = ',')]
        exclude: Vec<ArtifactIdentification>,
        /// walk again with the clash winners pinned
        #[arg(long)]
        full_reresolution: bool,
        /// fail on dependency cycles
        #[arg(long)]
        strict: bool,
        #[arg(long)]
        include_optional: bool,
        #[arg(long)]
        fail_fast: bool,
    },
    /// Removes a coordinate from the local cache
    Purge {
        coordinate: Coordinate,
    },
    /// Removes leftovers of interrupted downloads, stale locks and corrupt parts from the cache
    Repair,
}

fn load_configuration(cli: &Cli, environment: &BTreeMap<String, String>) -> anyhow::Result<RepositoryReflection> {
    let home = environment.get("HOME").map(Path::new);
    let mut compiler = RepositoryConfigurationCompiler::new(RepositoryConfigurationCompiler::default_cache_root(home));

    match &cli.config {
        Some(path) => compiler = compiler.toml_file(path)?,
        None => {
            let default = Path::new(DEFAULT_CONFIG_FILE);
            if default.exists() {
                compiler = compiler.toml_file(default)?;
            }
        }
    }
    for view in &cli.views {
        compiler = compiler.toml_file(view)?;
    }

    let reflection = compiler
        .environment(environment.iter().map(|(k, v)| (k.as_str(), v.as_str())))?
        .compile()?;
    Ok(reflection)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("MC_LOG").unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let environment = environment_snapshot();
    let reflection = load_configuration(&cli, &environment)
        .context("invalid configuration")?;
    let session = ResolutionSession::new(reflection, Arc::new(PomReader)).await?
        .with_environment(environment);

    let cancel = session.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, finishing downloads in progress");
            cancel.cancel();
        }
    });

    match cli.command {
        Command::Resolve { coordinates, strategy, offline, scope, parts, exclude, full_reresolution, strict, include_optional, fail_fast } => {
            let mut request = ResolutionRequest::new(coordinates);
            request.strategy = strategy;
            request.offline = offline;
            request.scopes = scope.into_iter().collect();
            request.parts = parts;
            request.exclusions = exclude.into_iter().collect();
            request.strict = strict;
            request.include_optional = include_optional;
            request.fail_fast = fail_fast;
            if full_reresolution {
                request.re_resolution = ReResolution::Full;
            }

            let result = session.resolve(request).await?;
            println!("{}", result.to_json()?);
            if !result.is_complete() {
                std::process::exit(2);
            }
        }
        Command::Purge { coordinate } => {
            let purged = session.purge(&coordinate).await?;
            info!("{} {}", coordinate, if purged { "purged" } else { "was not cached" });
        }
        Command::Repair => {
            let report = session.repair().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}
