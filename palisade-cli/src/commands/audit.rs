use clap::Subcommand;

use palisade_core::{AuditQuery, AuditStore, ChainVerification, PermissionEngine};

#[derive(Subcommand)]
pub enum AuditAction {
    /// List audit events, newest last
    List {
        #[arg(long)]
        resource: Option<String>,
        #[arg(long)]
        actor: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Verify the audit hash chain
    Verify,
}

pub async fn handle_audit_action<A: AuditStore>(
    action: AuditAction,
    engine: &PermissionEngine<A>,
) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        AuditAction::List {
            resource,
            actor,
            limit,
        } => {
            let events = engine
                .query_audit(&AuditQuery {
                    resource_id: resource,
                    actor_id: actor,
                    limit,
                    ..Default::default()
                })
                .await?;
            if events.is_empty() {
                println!("No audit events");
            } else {
                for event in events {
                    let actor = event
                        .actor
                        .as_ref()
                        .map(|a| a.id.as_str())
                        .unwrap_or("-");
                    println!(
                        "#{} {} {}/{} by {} {}",
                        event.sequence,
                        event.timestamp.to_rfc3339(),
                        event.resource.resource_type,
                        event.resource.resource_id,
                        actor,
                        serde_json::to_string(&event.event_type)?,
                    );
                }
            }
        }
        AuditAction::Verify => match engine.verify_audit_chain().await? {
            ChainVerification::Valid {
                events_checked,
                last_sequence,
            } => {
                println!(
                    "✓ Chain valid: {} events checked, last sequence {}",
                    events_checked, last_sequence
                );
            }
            ChainVerification::Broken { at_sequence, .. } => {
                eprintln!("✗ Chain broken at sequence {}", at_sequence);
                std::process::exit(1);
            }
            ChainVerification::Tampered { at_sequence } => {
                eprintln!("✗ Event tampered at sequence {}", at_sequence);
                std::process::exit(1);
            }
        },
    }
    Ok(())
}
