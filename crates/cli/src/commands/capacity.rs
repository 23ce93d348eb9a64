// Host capacity probe

use anyhow::Result;
use crawlfleet_pool::host::HostResources;
use crawlfleet_pool::sizing::{capacity_breakdown, CapacityBreakdown, SizingParams};
use serde::Serialize;

use crate::output::{print_field, OutputFormat};

#[derive(Debug, Serialize)]
struct CapacityReport {
    host: HostResources,
    sizing: SizingParams,
    auto_size: bool,
    breakdown: CapacityBreakdown,
    /// Permit count the failover orchestrator would use
    effective_capacity: usize,
}

pub fn run(sizing: &SizingParams, auto_size: bool, output: OutputFormat) -> Result<()> {
    let host = HostResources::probe();
    let breakdown = capacity_breakdown(host.total_ram_mb, host.cpu_cores, host.fd_limit, sizing);
    let report = CapacityReport {
        host,
        sizing: sizing.clone(),
        auto_size,
        effective_capacity: sizing.resolve_capacity(auto_size, &host),
        breakdown,
    };

    if !output.is_text() {
        return output.print_value(&report);
    }

    print_field("RAM", &format!("{} MiB", report.host.total_ram_mb));
    print_field("CPU cores", &report.host.cpu_cores.to_string());
    print_field("FD limit", &report.host.fd_limit.to_string());
    println!();
    print_field(
        "Available RAM",
        &format!("{} MiB", report.breakdown.available_ram_mb),
    );
    print_field("Memory ceiling", &ceiling(report.breakdown.mem_ceiling));
    print_field("FD ceiling", &ceiling(report.breakdown.fd_ceiling));
    print_field("CPU ceiling", &report.breakdown.cpu_ceiling.to_string());
    print_field("Bound by", &report.breakdown.binding.to_string());
    print_field(
        "Bounds",
        &format!("[{}, {}]", sizing.min_capacity, sizing.max_capacity),
    );
    println!();
    print_field("Capacity", &report.breakdown.capacity.to_string());
    if !auto_size {
        print_field(
            "Effective",
            &format!("{} (auto-sizing disabled)", report.effective_capacity),
        );
    }
    Ok(())
}

fn ceiling(value: Option<u64>) -> String {
    value.map_or_else(|| "unbounded".to_string(), |v| v.to_string())
}
