use colored::Colorize;

use crate::cli::Cli;
use crate::commands::{effective_config, endpoint};
use crate::controller::is_eligible_url;
use crate::error::Result;

pub async fn run(cli: &Cli) -> Result<()> {
    let config = effective_config(cli)?;
    let targets = endpoint(&config)?.list_targets().await?;

    if cli.json {
        let pages: Vec<_> = targets
            .iter()
            .map(|t| {
                serde_json::json!({
                    "id": t.id,
                    "title": t.title,
                    "url": t.url,
                    "capturable": is_eligible_url(&t.url),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&pages)?);
        return Ok(());
    }

    if targets.is_empty() {
        println!("{} No pages open", "!".yellow());
        return Ok(());
    }

    println!("{} {} pages open\n", "✓".green(), targets.len());
    for (i, target) in targets.iter().enumerate() {
        let marker = if i == 0 { " (active)".cyan().to_string() } else { String::new() };
        let title = if target.title.is_empty() { "(no title)" } else { &target.title };
        println!(
            "{}. {}{} {}",
            (i + 1).to_string().cyan(),
            title.bold(),
            marker,
            format!("({})", short_id(&target.id)).dimmed()
        );
        if is_eligible_url(&target.url) {
            println!("   {}", target.url.dimmed());
        } else {
            println!("   {} {}", target.url.dimmed(), "not capturable".yellow());
        }
    }

    Ok(())
}

/// First eight characters of a target id.
fn short_id(id: &str) -> String {
    id.chars().take(8).collect()
}
