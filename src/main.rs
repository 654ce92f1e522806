use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use harvest::app::AppContext;
use harvest::cli::{commands, Cli, Commands};
use harvest::manifest::RunOptions;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Commands::InitConfig = cli.command {
        commands::init_config(cli.config.as_deref())?;
        return Ok(());
    }

    let ctx = AppContext::new(cli.config.as_deref())?.with_workers(cli.workers);

    match cli.command {
        Commands::Run {
            manifest,
            out,
            strict,
            vars,
        } => {
            let options = RunOptions {
                out_dir: out,
                strict,
            };
            commands::run_manifest(&ctx, &manifest, &vars, options).await?;
        }
        Commands::Plan {
            manifest,
            json,
            vars,
        } => {
            commands::plan_manifest(&ctx, &manifest, &vars, json)?;
        }
        Commands::InitConfig => {}
    }

    Ok(())
}
