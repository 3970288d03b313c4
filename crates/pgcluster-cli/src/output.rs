use pgcluster_core::types::PhaseResult;
use serde::Serialize;

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{}", json);
    Ok(())
}

pub fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.len());
        }
    }

    let line = |cells: Vec<String>| {
        let padded: Vec<String> = cells
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                let w = widths.get(i).copied().unwrap_or(0);
                format!("{:width$}", cell, width = w)
            })
            .collect();
        println!("{}", padded.join("  ").trim_end());
    };

    line(headers.iter().map(|h| h.to_string()).collect());
    line(widths.iter().map(|&w| "-".repeat(w)).collect());
    for row in rows {
        line(row);
    }
}

/// One row per phase: name, outcome, exit code, duration.
pub fn print_phases(phases: &[PhaseResult]) {
    let rows = phases
        .iter()
        .map(|p| {
            vec![
                p.phase.to_string(),
                if p.succeeded { "ok" } else { "failed" }.to_string(),
                p.exit_code.map(|c| c.to_string()).unwrap_or_else(|| "-".into()),
                format!("{:.1}s", p.duration_ms as f64 / 1000.0),
            ]
        })
        .collect();
    print_table(&["PHASE", "RESULT", "EXIT", "DURATION"], rows);
}

/// Tail of a captured stream, for terminal diagnostics.
pub fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}
