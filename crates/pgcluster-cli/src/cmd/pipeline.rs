use crate::output::{print_json, print_phases, print_table, tail};
use pgcluster_core::orchestrator::PhaseReport;
use pgcluster_core::types::{ProvisioningRequest, TuningRequest};
use pgcluster_core::{Orchestrator, ProvisionError};

/// Lines of captured tool output echoed on failure.
const DIAGNOSTIC_LINES: usize = 20;

pub fn generate(
    orch: &Orchestrator,
    machine_class: &str,
    replicas: u32,
    json: bool,
) -> anyhow::Result<()> {
    let request = ProvisioningRequest::new(machine_class, replicas)?;
    let report = run(orch.generate_descriptor(request), json)?;
    if json {
        return print_json(&report);
    }
    println!("{}", report.message);
    println!("  wrote: {}", report.infrastructure_path.display());
    println!("  wrote: {}", report.outputs_path.display());
    Ok(())
}

pub fn plan(orch: &Orchestrator, json: bool) -> anyhow::Result<()> {
    let report = run(orch.plan(), json)?;
    phases(&report, json, true)
}

pub fn apply(orch: &Orchestrator, json: bool) -> anyhow::Result<()> {
    let report = run(orch.apply(), json)?;
    phases(&report, json, false)
}

pub fn inventory(orch: &Orchestrator, json: bool) -> anyhow::Result<()> {
    let report = run(orch.derive_inventory(), json)?;
    if json {
        return print_json(&report);
    }
    let rows = report
        .inventory
        .hosts()
        .map(|h| {
            vec![
                h.group.as_str().to_string(),
                h.hostname.clone(),
                h.address.clone(),
            ]
        })
        .collect();
    print_table(&["GROUP", "HOST", "ADDRESS"], rows);
    println!("\n{} ({})", report.message, report.path.display());
    Ok(())
}

pub fn configure(orch: &Orchestrator, tuning: TuningRequest, json: bool) -> anyhow::Result<()> {
    let report = run(orch.render_and_run_config(&tuning), json)?;
    phases(&report, json, false)
}

pub fn up(
    orch: &Orchestrator,
    machine_class: &str,
    replicas: u32,
    tuning: TuningRequest,
    json: bool,
) -> anyhow::Result<()> {
    let request = ProvisioningRequest::new(machine_class, replicas)?;
    let report = run(orch.provision(request, &tuning), json)?;
    phases(&report, json, false)
}

fn phases(report: &PhaseReport, json: bool, echo_stdout: bool) -> anyhow::Result<()> {
    if json {
        return print_json(report);
    }
    if echo_stdout {
        println!("{}", report.last_stdout().trim_end());
        println!();
    }
    print_phases(&report.phases);
    Ok(())
}

/// Run one orchestrator operation; on a tool failure, echo the tail of its
/// captured output to stderr before handing the error back.
fn run<T>(
    op: impl std::future::Future<Output = pgcluster_core::Result<T>>,
    json: bool,
) -> anyhow::Result<T> {
    super::block_on(op)?.map_err(|e| {
        if !json {
            report_failure(&e);
        }
        anyhow::Error::new(e)
    })
}

fn report_failure(err: &ProvisionError) {
    let Some(result) = err.phase_result() else {
        return;
    };
    for (label, text) in [("stdout", &result.stdout), ("stderr", &result.stderr)] {
        let text = tail(text, DIAGNOSTIC_LINES);
        if !text.trim().is_empty() {
            eprintln!("--- {} {label} (last {DIAGNOSTIC_LINES} lines) ---", result.phase);
            eprintln!("{text}");
        }
    }
}
