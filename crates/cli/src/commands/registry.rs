// Registry inspection commands

use std::path::Path;

use anyhow::{Context, Result};
use clap::Subcommand;
use crawlfleet_pool::registry::WorkerRegistry;
use crawlfleet_pool::ConfigSignature;

use crate::output::{print_table_header, print_table_row, OutputFormat};

#[derive(Subcommand)]
pub enum RegistryCommand {
    /// List registered containers
    List,

    /// Forget a container by id, or every container for a signature
    Remove {
        /// Container id or full config signature
        target: String,
    },
}

pub fn run(command: RegistryCommand, path: &Path, output: OutputFormat, quiet: bool) -> Result<()> {
    let registry = WorkerRegistry::open(path)
        .with_context(|| format!("Failed to open registry: {}", path.display()))?;

    match command {
        RegistryCommand::List => list(&registry, output),
        RegistryCommand::Remove { target } => remove(&registry, &target, output, quiet),
    }
}

fn list(registry: &WorkerRegistry, output: OutputFormat) -> Result<()> {
    let records = registry.records();
    if !output.is_text() {
        return output.print_value(&records);
    }

    if records.is_empty() {
        println!("No registered containers");
        return Ok(());
    }

    print_table_header(&[("CONTAINER", 20), ("PORT", 6), ("SIGNATURE", 16), ("CREATED", 20)]);
    for record in &records {
        let port = record.host_port.to_string();
        let created = record.created_at.format("%Y-%m-%d %H:%M:%S").to_string();
        print_table_row(&[
            (&record.container_id, 20),
            (&port, 6),
            (record.signature.prefix(16), 16),
            (&created, 20),
        ]);
    }
    Ok(())
}

fn remove(registry: &WorkerRegistry, target: &str, output: OutputFormat, quiet: bool) -> Result<()> {
    let mut removed: Vec<_> = registry
        .remove(target)
        .context("Failed to update registry")?
        .into_iter()
        .collect();

    if let Some(signature) = ConfigSignature::parse(target).filter(|_| removed.is_empty()) {
        removed = registry
            .remove_signature(&signature)
            .context("Failed to update registry")?;
    }

    if !output.is_text() {
        return output.print_value(&removed);
    }

    if removed.is_empty() {
        anyhow::bail!("No registry record matches {}", target);
    }
    if !quiet {
        for record in &removed {
            println!("Removed {} (port {})", record.container_id, record.host_port);
        }
    }
    Ok(())
}
