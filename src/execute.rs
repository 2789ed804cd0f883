use std::fmt::Display;
use std::path::PathBuf;
use anyhow::{bail, Context as _, Result};
use colored::Colorize;
use tracing::warn;
use kindly::generate::generate_template;
use kindly::logging::init_logging;
use kindly::util::expand_path;
use kindly::{
    BatchReport, Config, Context, InstallRequest, Kindly, KindlyError, PipelineError,
    SpecLocation, UpdateOutcome,
};
use crate::cli::{KindlyCommand, LocationArgs, CLI};

pub fn execute(cli: CLI, ctx: &Context) -> Result<()> {
    let config = build_config(&cli)?;
    init_logging(config.verbose);
    let handler_ctx = ctx.clone();
    if let Err(e) = ctrlc::set_handler(move || handler_ctx.cancel()) {
        warn!(error = %e, "Could not install Ctrl-C handler");
    }

    let kindly = Kindly::new(config)?;
    match cli.command {
        KindlyCommand::Install { packages, location } => {
            execute_install(&kindly, ctx, &packages, location)
        }
        KindlyCommand::Remove { names, all } => execute_remove(&kindly, ctx, &names, all),
        KindlyCommand::Update { names, all } => execute_update(&kindly, ctx, &names, all),
        KindlyCommand::List { installed, source } => {
            execute_list(&kindly, ctx, source.as_deref(), installed)
        }
        KindlyCommand::Check { packages, output, location } => {
            execute_check(&kindly, ctx, &packages, output, location)
        }
        KindlyCommand::Template { owner, repo } => execute_template(&kindly, ctx, &owner, &repo),
    }
}

/// Loads the config file and applies command-line and environment overrides.
fn build_config(cli: &CLI) -> Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;
    config.verbose |= cli.verbose;
    if let Some(dir) = &cli.bin_dir {
        config.out_bin_dir = expand_path(dir);
    }
    if let Some(dir) = &cli.completion_dir {
        config.out_completion_dir = expand_path(dir);
    }
    if let Some(dir) = &cli.man_dir {
        config.out_man_dir = expand_path(dir);
    }
    if let Some(dir) = &cli.manifest_dir {
        config.manifest_dir = expand_path(dir);
    }
    if let Some(shell) = &cli.completion {
        config.completion = shell.clone();
    }
    if let Some(os) = &cli.os {
        config.platform.os = os.clone();
    }
    if let Some(arch) = &cli.arch {
        config.platform.arch = arch.clone();
    }
    Ok(config)
}

fn location(args: LocationArgs) -> Result<SpecLocation> {
    // the path or URL itself comes from each positional argument
    let location = SpecLocation::from_options(
        args.source,
        args.file.then(PathBuf::new),
        args.url.then(String::new),
    )?;
    Ok(location)
}

fn report_failure(name: &str, error: &dyn Display) {
    eprintln!("{} {}: {error}", "✗".red().bold(), name.bold());
}

/// Prints one line per failed package and turns any failure into an error.
fn finish<T, E>(verb: &str, report: &BatchReport<T, E>, describe: impl Fn(&E) -> String) -> Result<()> {
    let mut failed = Vec::new();
    for (name, error) in report.failures() {
        report_failure(name, &describe(error));
        failed.push(name);
    }
    if !failed.is_empty() {
        bail!("could not {verb} {}", failed.join(", "));
    }
    Ok(())
}

fn describe_pipeline(e: &PipelineError) -> String {
    format!("failed while {}: {}", e.stage, e.error)
}

pub fn execute_install(
    kindly: &Kindly,
    ctx: &Context,
    packages: &[String],
    args: LocationArgs,
) -> Result<()> {
    let location = location(args)?;
    let requests: Vec<_> = packages
        .iter()
        .map(|arg| InstallRequest::parse(arg, location.clone()))
        .collect();

    let report = kindly.install_many(ctx, &requests);
    for (_, result) in &report.results {
        if let Ok(installed) = result {
            println!(
                "{} {}",
                "Installed".green().bold(),
                installed.manifest.display_name()
            );
            for member in installed.members.iter().filter(|m| m.copied().is_none()) {
                println!("  {} {} was not installed", "!".yellow(), member.member);
            }
        }
    }
    finish("install", &report, describe_pipeline)
}

pub fn execute_remove(kindly: &Kindly, ctx: &Context, names: &[String], all: bool) -> Result<()> {
    let report = if all {
        kindly.remove_all(ctx)?
    } else {
        kindly.remove_many(ctx, names)
    };
    for (name, result) in &report.results {
        if let Ok(removed) = result {
            println!("{} {name}", "Removed".green().bold());
            for (path, error) in &removed.failed {
                println!("  {} {}: {error}", "!".yellow(), path.display());
            }
        }
    }
    finish("remove", &report, KindlyError::to_string)
}

pub fn execute_update(kindly: &Kindly, ctx: &Context, names: &[String], all: bool) -> Result<()> {
    let report = if all {
        kindly.update_all(ctx)?
    } else {
        kindly.update_many(ctx, names)
    };
    for (name, result) in &report.results {
        match result {
            Ok(UpdateOutcome::Updated { from, to }) => {
                println!("{} {name} {from} -> {to}", "Updated".green().bold());
            }
            Ok(UpdateOutcome::UpToDate { version }) => {
                println!("{name}@{version} is up to date");
            }
            Err(_) => {}
        }
    }
    finish("update", &report, describe_pipeline)
}

pub fn execute_list(
    kindly: &Kindly,
    ctx: &Context,
    source: Option<&str>,
    installed: bool,
) -> Result<()> {
    let lines = kindly.list_packages(ctx, source, installed)?;
    if lines.is_empty() && installed {
        eprintln!("No packages installed");
    }
    for line in lines {
        println!("{line}");
    }
    Ok(())
}

pub fn execute_check(
    kindly: &Kindly,
    ctx: &Context,
    packages: &[String],
    output: bool,
    args: LocationArgs,
) -> Result<()> {
    let location = location(args)?;
    let mut failed = Vec::new();
    for package in packages {
        let request = InstallRequest::parse(package, location.clone());
        match kindly.check(ctx, &request) {
            Ok(spec) if output => {
                println!("# Package: {package}");
                print!("---\n{}", spec.to_yaml()?);
            }
            Ok(_) => eprintln!("{} {}", "✓".green().bold(), package.bold()),
            Err(e) => {
                report_failure(package, &e);
                failed.push(package.as_str());
            }
        }
    }
    if !failed.is_empty() {
        bail!("could not resolve {}", failed.join(", "));
    }
    Ok(())
}

pub fn execute_template(kindly: &Kindly, ctx: &Context, owner: &str, repo: &str) -> Result<()> {
    let spec = generate_template(ctx, kindly.transport(), owner, repo)
        .with_context(|| format!("Could not generate a template for {owner}/{repo}"))?;
    print!("{}", spec.to_yaml()?);
    Ok(())
}
