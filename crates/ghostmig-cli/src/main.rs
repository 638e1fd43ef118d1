//! Ghostmig - online ghost-table schema migrations.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ghostmig_cli::{Args, MigrationReport};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ghostmig_core=info,ghostmig_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting ghostmig");

    // Parse command-line arguments
    let args = Args::parse();
    let ctx = args.into_context()?;

    tracing::info!(
        database = %ctx.database_name,
        table = %ctx.original_table_name,
        ghost_table = %ctx.ghost_table_name(),
        mode = %ctx.mode,
        cut_over = %ctx.cut_over_type,
        noop = ctx.noop,
        "migration configured"
    );

    let report = match MigrationReport::build(&ctx) {
        Ok(report) => report,
        Err(e) => {
            tracing::error!(error = %e, "migration aborted");
            return Err(e.into());
        }
    };
    println!("{}", report.to_json()?);

    if ctx.noop {
        tracing::info!("noop run, nothing executed");
    }

    Ok(())
}
