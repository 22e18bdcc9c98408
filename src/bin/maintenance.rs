use std::env;

use anyhow::{Context, Result};

use docbuilder::{config::AppConfig, db, init_tracing, styles};

const USAGE: &str = "Usage: maintenance <assign-style-ids>";

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        Some("assign-style-ids") => assign_style_ids()?,
        Some(cmd) => {
            eprintln!("Unknown command: {cmd}\n{USAGE}");
            std::process::exit(1);
        }
        None => {
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    }

    Ok(())
}

fn assign_style_ids() -> Result<()> {
    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        "loaded configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    let mut conn = pool.get().context("failed to get database connection")?;

    let updated = styles::assign_style_ids(&mut conn)?;
    println!("Linked {updated} tags to style ids.");
    Ok(())
}
