use clap::Parser;
use colored::*;
use env_logger::Env;
use forgectl::args::{Args, SubCommand};
use forgectl::catalog::{Generator, GeneratorConfig};
use forgectl::db;
use forgectl::executor::{self, Executor};
use forgectl::models::{Build, NewBuild, NewSyncState};
use forgectl::scanner::Scanner;
use forgectl::{args, catalog};
use forgectl_common::config::DEFAULT_ARCHES;
use forgectl_common::errors::*;
use forgectl_common::utils;
use forgectl_common::{BuildStatus, Recipe, RepoClass};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn db_url(db: &Path) -> Result<String> {
    db.to_str()
        .map(String::from)
        .ok_or_else(|| format_err!("Database path contains invalid characters"))
}

fn print_build(build: &Build) {
    let status = build
        .status()
        .map(|s| s.fancy())
        .unwrap_or_else(|_| build.status.clone());

    let duration = if let Some(duration) = build.duration_seconds {
        utils::secs_to_human(duration)
    } else if let Some(started_at) = build.started_at {
        let elapsed = (chrono::Utc::now().naive_utc() - started_at).num_seconds();
        format!("{} (in progress)", utils::secs_to_human(elapsed))
    } else {
        String::new()
    };

    println!(
        "{} {:-30} [{:-14}] {:>12}  {}",
        status,
        build.pkg_name.bold(),
        build.arch,
        duration,
        build
            .created_at
            .format("%Y-%m-%d %H:%M")
            .to_string()
            .bright_black(),
    );
    if let Some(error) = &build.error_message {
        if let Some(line) = error.lines().last() {
            println!("    {}", line.red());
        }
    }
}

fn sync(db: &str, sync: args::Sync) -> Result<()> {
    println!("Scanning recipes from: {}", sync.repo.display());

    let scanner = Scanner::new(&sync.repo);
    let recipes = scanner.scan_all()?;
    let (binaries, packages) = scanner.recipe_counts()?;

    println!("Found {} recipes", recipes.len());
    println!("  Binaries: {}", binaries);
    println!("  Packages: {}", packages);

    let repo_name = sync
        .repo
        .canonicalize()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "soarpkgs".to_string());

    let mut connection = db::setup(db)?;
    NewSyncState::new(&repo_name, Some("HEAD"), recipes.len() as i32).insert(&mut connection)?;

    println!("Sync completed successfully");
    Ok(())
}

fn enqueue_recipes(
    db: &str,
    recipes: &[Recipe],
    arches: &[&str],
    priority: i32,
    force: bool,
) -> Result<usize> {
    let mut connection = db::setup(db)?;

    let mut queued = 0;
    for recipe in recipes {
        for arch in arches {
            match NewBuild::new(
                &recipe.name,
                &recipe.pkg_id,
                &recipe.build_script,
                arch,
                priority,
                force,
            )
            .insert(&mut connection)
            {
                Ok(id) => {
                    queued += 1;
                    println!("Queued: {} [{}] (build id: {})", recipe.pkg_id, arch, id);
                }
                Err(err) => error!("Failed to queue {} [{}]: {:#}", recipe.pkg_id, arch, err),
            }
        }
    }

    Ok(queued)
}

fn queue(db: &str, queue: args::Queue) -> Result<()> {
    let scanner = Scanner::new(&queue.repo);

    let recipes = if queue.all {
        scanner.scan_all()?
    } else if let Some(pkg) = &queue.pkg {
        vec![scanner.scan_by_package(pkg)?]
    } else {
        bail!("Either --all or --pkg must be specified");
    };

    let arches = match &queue.arch {
        Some(arch) => vec![arch.as_str()],
        None => DEFAULT_ARCHES.to_vec(),
    };

    let queued = enqueue_recipes(db, &recipes, &arches, queue.priority, queue.force)?;
    println!("\nQueued {} builds", queued);
    Ok(())
}

fn force(db: &str, force: args::Force) -> Result<()> {
    let scanner = Scanner::new(&force.repo);
    let recipe = scanner.scan_by_package(&force.pkg)?;

    // forced builds jump the queue
    let queued = enqueue_recipes(db, &[recipe], &[force.arch.as_str()], 100, true)?;
    if queued == 0 {
        bail!("Failed to queue force build for {}", force.pkg);
    }
    Ok(())
}

async fn build(db: &str, build: args::Build) -> Result<()> {
    let driver = executor::locate_driver(&build.sbuild)?;
    match executor::driver_version(&driver).await {
        Ok(version) => info!("Using build driver: {}", version),
        Err(err) => warn!("Could not get build driver version: {:#}", err),
    }

    let pool = db::setup_pool(db)?;
    let mut config = executor::Config::new(&build.repo);
    config.driver_path = build.sbuild.clone();
    let executor = Executor::new(pool, config)?;

    if let Some(id) = build.id {
        let finished = executor.execute_build(id).await?;
        print_build(&finished);
        return Ok(());
    }

    println!("Starting {} workers for {}", build.workers, build.arch);
    let max_duration = match build.max_duration {
        0 => None,
        minutes => Some(Duration::from_secs(minutes * 60)),
    };

    Arc::new(executor)
        .run_workers(&build.arch, build.workers, max_duration)
        .await
}

fn status(db: &str, status: args::Status) -> Result<()> {
    let mut connection = db::setup(db)?;

    if let Some(pkg) = &status.pkg {
        let builds = Build::get_by_package(pkg, &mut connection)?;
        if builds.is_empty() {
            println!("No builds found for package: {}", pkg);
            return Ok(());
        }
        println!("Build history for: {}", pkg.bold());
        for build in &builds {
            print_build(build);
        }
        return Ok(());
    }

    let stats = Build::stats(&mut connection)?;
    println!("{}", "Build queue status".bold());
    println!("Queued:    {}", stats.queued);
    println!("Building:  {}", stats.building);
    println!("Succeeded: {}", stats.succeeded);
    println!("Failed:    {}", stats.failed);
    println!("Cancelled: {}", stats.cancelled);
    println!("Total:     {}", stats.total_builds);

    let recent = Build::list(None, Some(10), &mut connection)?;
    if !recent.is_empty() {
        println!();
        println!("{}", "Recent builds".bold());
        for build in &recent {
            print_build(build);
        }
    }

    Ok(())
}

fn stats(db: &str) -> Result<()> {
    let mut connection = db::setup(db)?;
    let stats = Build::stats(&mut connection)?;

    println!("{}", "Build statistics".bold());
    println!("Total builds:     {}", stats.total_builds);
    println!("Success rate:     {:.2}%", stats.success_rate_percent);
    println!("Average duration: {:.2}s", stats.avg_duration_seconds);
    println!();
    println!("Queued:    {}", stats.queued);
    println!("Building:  {}", stats.building);
    println!("Succeeded: {}", stats.succeeded);
    println!("Failed:    {}", stats.failed);
    println!("Cancelled: {}", stats.cancelled);

    Ok(())
}

fn reset(db: &str, reset: args::Reset) -> Result<()> {
    let status = if reset.failed {
        Some(BuildStatus::Failed)
    } else if reset.queued {
        Some(BuildStatus::Queued)
    } else {
        None
    };

    let mut connection = db::setup(db)?;
    let deleted = Build::clear(status, &mut connection)?;

    match status {
        Some(status) => println!("Cleared {} {} builds", deleted, status),
        None => println!("Cleared all {} builds", deleted),
    }
    Ok(())
}

fn cancel(db: &str, cancel: args::Cancel) -> Result<()> {
    let mut connection = db::setup(db)?;
    Build::cancel(cancel.id, &mut connection)?;
    println!("Build {} cancelled", cancel.id);
    Ok(())
}

fn list(db: &str, list: args::List) -> Result<()> {
    let limit = if list.limit > 0 { Some(list.limit) } else { None };

    let mut connection = db::setup(db)?;
    let builds = Build::list(list.status, limit, &mut connection)?;

    if builds.is_empty() {
        println!("No builds found");
        return Ok(());
    }

    println!("Found {} builds:", builds.len());
    for build in &builds {
        print_build(build);
    }
    Ok(())
}

async fn generate(db: &str, generate: args::Generate) -> Result<()> {
    let mut connection = db::setup(db)?;
    catalog::write_index(&mut connection, &generate.output)?;

    for (enabled, repo_class) in [
        (generate.bincache, RepoClass::Bincache),
        (generate.pkgcache, RepoClass::Pkgcache),
    ] {
        if !enabled {
            continue;
        }
        Generator::new(GeneratorConfig {
            arch: generate.arch.clone(),
            output_dir: generate.output.clone(),
            repo_class,
        })
        .generate()
        .await?;
    }

    Ok(())
}

async fn run(args: Args) -> Result<()> {
    let db = db_url(&args.db)?;

    match args.subcommand {
        SubCommand::Sync(opts) => sync(&db, opts),
        SubCommand::Queue(opts) => queue(&db, opts),
        SubCommand::Force(opts) => force(&db, opts),
        SubCommand::Build(opts) => build(&db, opts).await,
        SubCommand::Status(opts) => status(&db, opts),
        SubCommand::Stats => stats(&db),
        SubCommand::Reset(opts) => reset(&db, opts),
        SubCommand::Cancel(opts) => cancel(&db, opts),
        SubCommand::List(opts) => list(&db, opts),
        SubCommand::Generate(opts) => generate(&db, opts).await,
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let logging = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::init_from_env(Env::default().default_filter_or(logging));

    if let Err(err) = run(args).await {
        eprintln!("Error: {}", err);
        for cause in err.chain().skip(1) {
            eprintln!("Because: {}", cause);
        }
        std::process::exit(1);
    }
}
