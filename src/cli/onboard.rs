//! Onboard command - Initialize configuration.

use anyhow::Result;

use crate::config;

pub async fn cmd_onboard() -> Result<()> {
    let cfg_path = config::config_path();
    if cfg_path.exists() {
        println!("Config already exists at {}", cfg_path.display());
        println!("Delete it first if you want to re-initialize.");
        return Ok(());
    }

    let cfg = config::Config::default();
    config::save_config(&cfg, None)?;
    println!("✓ Created config at {}", cfg_path.display());

    println!("\ngatebot is ready!");
    println!("\nNext steps:");
    println!("  1. Review the config at {}", cfg_path.display());
    println!("  2. Start the gateway: gatebot start");
    println!("  3. Schedule work: gatebot cron add --name brief --message \"morning brief\" --cron \"0 9 * * *\"");
    Ok(())
}
