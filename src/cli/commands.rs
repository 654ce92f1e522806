use std::path::Path;

use crate::app::{AppContext, Result};
use crate::config::Config;
use crate::manifest::{Manifest, RunOptions, RunSummary};

fn load_manifest(path: &Path, vars: &[(String, String)]) -> Result<Manifest> {
    let mut manifest = Manifest::load(path)?;
    for (name, value) in vars {
        manifest.set_var(name.clone(), value.clone());
    }
    Ok(manifest)
}

/// Run a manifest once and print its summary.
///
/// Modules are instantiated by the fetch itself, so their constructors run
/// once per invocation.
pub async fn run_manifest(
    ctx: &AppContext,
    path: &Path,
    vars: &[(String, String)],
    options: RunOptions,
) -> Result<RunSummary> {
    let manifest = load_manifest(path, vars)?;
    let name = manifest.name.clone();
    let mut fetcher = manifest.into_fetcher(ctx, options)?;

    println!("Fetching {}...", name);
    fetcher.fetch().await?;

    let summary = fetcher.fetchable().summary();
    let total = summary.succeeded + summary.failed + summary.errored;
    if total == 0 {
        println!("Nothing fetched for {}", name);
    } else {
        println!(
            "Fetch complete: {} succeeded ({} bytes), {} failed, {} errors",
            summary.succeeded, summary.bytes, summary.failed, summary.errored
        );
    }
    Ok(summary)
}

pub fn plan_manifest(
    ctx: &AppContext,
    path: &Path,
    vars: &[(String, String)],
    json: bool,
) -> Result<()> {
    let manifest = load_manifest(path, vars)?;
    let name = manifest.name.clone();
    let fetcher = manifest.into_fetcher(ctx, RunOptions::default())?;
    let plan = fetcher.plan()?;
    let requests = plan.describe();

    if json {
        println!("{}", serde_json::to_string_pretty(&requests)?);
        return Ok(());
    }

    if requests.is_empty() {
        println!("No requests planned for {}", name);
        return Ok(());
    }

    println!(
        "{}: {} requests in {} modules",
        name,
        requests.len(),
        plan.module_names().len()
    );
    for request in requests {
        println!(
            "  {:<16} {:<10} {:<6} {}",
            request.module,
            request.mode.to_string(),
            request.method,
            request.url
        );
    }
    Ok(())
}

pub fn init_config(path: Option<&Path>) -> Result<()> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => Config::default_config_path()?,
    };

    if Config::create_default_config(&path)? {
        println!("Created default config at {}", path.display());
    } else {
        println!("Config already exists at {}", path.display());
    }
    Ok(())
}
