use crate::output::{print_json, print_table};
use pgcluster_core::Orchestrator;

pub fn run(orchestrator: &Orchestrator, json: bool) -> anyhow::Result<()> {
    let status = orchestrator.status()?;
    if json {
        return print_json(&status);
    }

    let yes_no = |b: bool| if b { "yes" } else { "no" }.to_string();
    let mut rows = vec![
        vec!["terraform dir".into(), status.terraform_dir.display().to_string()],
        vec!["ansible dir".into(), status.ansible_dir.display().to_string()],
        vec!["busy".into(), yes_no(status.busy)],
        vec!["descriptor".into(), yes_no(status.descriptor_present)],
        vec![
            "inventory".into(),
            match (status.inventory_present, status.inventory_current) {
                (false, _) => "no".to_string(),
                (true, true) => "yes".to_string(),
                (true, false) => "stale".to_string(),
            },
        ],
        vec!["playbook".into(), yes_no(status.playbook_present)],
        vec!["terraform".into(), yes_no(status.tools.terraform)],
        vec!["ansible-playbook".into(), yes_no(status.tools.ansible_playbook)],
    ];
    if let Some(m) = &status.manifest {
        rows.push(vec!["machine class".into(), m.request.machine_class().to_string()]);
        rows.push(vec!["replicas".into(), m.request.replica_count().to_string()]);
        rows.push(vec!["rendered at".into(), m.rendered_at.to_rfc3339()]);
        rows.push(vec![
            "applied at".into(),
            m.applied_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "-".into()),
        ]);
    }
    print_table(&["FIELD", "VALUE"], rows);
    Ok(())
}
