//! Info command - Show configured job types and available handlers
//!
//! Usage:
//! ```bash
//! dbq info --jobs-config jobs.toml
//! ```

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Color, Table};

use dbq_queue::{Handlers, TaskRegistry};

use crate::builtins;
use crate::context::GlobalArgs;

/// Arguments for the info command
#[derive(Args, Debug)]
pub struct InfoArgs;

fn registry_table(registry: &TaskRegistry, handlers: &Handlers) -> Table {
    let missing = handlers.missing_for(registry);

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Job type").fg(Color::Cyan),
            Cell::new("Tasks").fg(Color::Cyan),
            Cell::new("Hooks").fg(Color::Cyan),
        ]);

    for (name, spec) in registry.iter() {
        let tasks: Vec<String> = spec
            .tasks
            .iter()
            .map(|t| {
                if missing.contains(t) {
                    format!("{t} (missing)")
                } else {
                    t.clone()
                }
            })
            .collect();
        let hooks: Vec<String> = spec
            .hooks()
            .map(|(role, id)| format!("{role}: {id}"))
            .collect();

        let task_color = if spec.tasks.iter().any(|t| missing.contains(t)) {
            Color::Red
        } else {
            Color::Reset
        };
        table.add_row(vec![
            Cell::new(name).fg(Color::Green),
            Cell::new(tasks.join(" → ")).fg(task_color),
            Cell::new(hooks.join("\n")).fg(Color::Yellow),
        ]);
    }
    table
}

/// Run the info command
pub fn run(global: &GlobalArgs, _args: InfoArgs) -> Result<()> {
    let version = env!("CARGO_PKG_VERSION");
    let handlers = builtins::handlers()?;

    println!("{}", "DBQ - Database-backed job queue".bold().cyan());
    println!("{}", "═".repeat(50).cyan());
    println!();

    println!("{}", "Version Information:".bold());
    println!("  {} {}", "CLI Version:".dimmed(), version.green());
    println!();

    println!("{}", "Built-in Handlers:".bold());
    for id in handlers.task_ids() {
        println!("  {} {}", "•".cyan(), id.green());
    }
    for id in handlers.failure_hook_ids() {
        println!("  {} {} {}", "•".cyan(), id.green(), "(failure hook)".dimmed());
    }
    println!();

    println!("{}", "Configuration:".bold());
    println!(
        "  {} {}",
        "Job registry:".dimmed(),
        global.jobs_config.display()
    );
    println!("  {} {}", "Database:".dimmed(), global.sqlite_config()?.url);
    println!();

    match global.registry() {
        Ok(registry) => {
            println!("{}", "Job Types:".bold());
            println!("{}", registry_table(&registry, &handlers));
        }
        Err(e) => println!("  {} {:#}", "⚠".yellow(), e),
    }
    println!();

    Ok(())
}
