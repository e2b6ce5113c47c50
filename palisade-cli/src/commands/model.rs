use clap::Subcommand;
use std::path::{Path, PathBuf};

use palisade_core::{AccessModel, AuditStore, PermissionEngine};

#[derive(Subcommand)]
pub enum ModelAction {
    /// Validate a model document without applying it
    Validate {
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Apply a model document onto the configured stores
    Load {
        #[arg(short, long)]
        file: PathBuf,
    },
}

fn parse_model(path: &Path) -> Result<AccessModel, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)?;
    let model = if path.extension().is_some_and(|ext| ext == "json") {
        AccessModel::from_json(&content)?
    } else {
        AccessModel::from_yaml(&content)?
    };
    Ok(model)
}

pub async fn handle_model_action<A: AuditStore>(
    action: ModelAction,
    engine: &PermissionEngine<A>,
    actor: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        ModelAction::Validate { file } => match parse_model(&file) {
            Ok(model) => {
                println!("✓ Model valid");
                if let Some(desc) = &model.description {
                    println!("  Description: {}", desc);
                }
                println!("  Permissions: {}", model.permissions.len());
                println!("  Roles: {}", model.roles.len());
                println!("  Inheritance rules: {}", model.inheritance.len());
                println!("  Dependencies: {}", model.dependencies.len());
                println!("  Grants: {}", model.grants.len());
            }
            Err(e) => {
                eprintln!("✗ Validation failed: {}", e);
                std::process::exit(1);
            }
        },
        ModelAction::Load { file } => {
            let model = parse_model(&file)?;
            model.apply(engine, actor).await?;
            println!(
                "Loaded model v{}: {} permissions, {} roles, {} grants",
                model.version,
                model.permissions.len(),
                model.roles.len(),
                model.grants.len()
            );
        }
    }
    Ok(())
}
