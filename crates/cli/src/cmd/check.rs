//! Validate a configuration file

use anyhow::Result;
use owo_colors::OwoColorize;
use std::path::Path;

pub fn run(path: &Path) -> Result<()> {
    let config = super::load_config(path)?;

    println!("{}", "Configuration OK".green().bold());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!();

    if config.channels.is_empty() {
        println!("{}", "No channels configured".dimmed());
        return Ok(());
    }

    for channel in &config.channels {
        let state = if channel.enabled {
            "enabled".green().to_string()
        } else {
            "disabled".yellow().to_string()
        };
        println!("Channel:       {} ({})", channel.id.cyan(), state);
        for root in &channel.roots {
            println!("  Root:        {}", root.display());
        }
        println!("  Store:       {}", channel.db.display());
        if let Some(include) = &channel.include {
            println!("  Include:     {}", include);
        }
        if let Some(exclude) = &channel.exclude {
            println!("  Exclude:     {}", exclude);
        }
        println!(
            "  Delivery:    every {}s, up to {} events",
            channel.delay_secs, channel.max_events
        );
        match channel.retain_days {
            Some(days) => println!("  Retain:      {} day(s)", days),
            None => println!("  Retain:      {}", "everything".dimmed()),
        }
        println!();
    }

    Ok(())
}
