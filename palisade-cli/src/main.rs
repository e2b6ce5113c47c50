#![forbid(unsafe_code)]

mod commands;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use commands::{handle_audit_action, handle_model_action, AuditAction, ModelAction};
use palisade_core::{
    AccessDecision, CatalogStore, Config, Effect, Grant, GrantStore, InMemoryAuditStore,
    InMemoryCatalogStore, InMemoryGrantStore, InMemoryRoleStore, InheritanceMode,
    InheritanceRule, Permission, PermissionCode, PermissionEngine, RedbStorage, ResolveRequest,
    Role, RoleId, RoleStore, Scope,
};

#[derive(Parser)]
#[command(name = "palisade")]
#[command(about = "Palisade permission engine CLI", version)]
struct Cli {
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Use in-memory stores instead of the redb database
    #[arg(long, global = true)]
    memory: bool,

    /// Actor recorded in the audit trail
    #[arg(long, global = true, default_value = "cli")]
    actor: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Permission {
        #[command(subcommand)]
        action: PermissionAction,
    },
    Role {
        #[command(subcommand)]
        action: RoleAction,
    },
    Grant {
        #[command(subcommand)]
        action: GrantAction,
    },
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
    Resolve {
        #[arg(long)]
        role: String,
        #[arg(long, default_value = "global")]
        scope: String,
        /// RFC 3339 instant to evaluate at (defaults to now)
        #[arg(long)]
        at: Option<String>,
        #[arg(long)]
        trace: bool,
    },
    Check {
        #[arg(long)]
        role: String,
        #[arg(long)]
        permission: String,
        #[arg(long, default_value = "global")]
        scope: String,
    },
    Conflicts {
        #[arg(long)]
        role: String,
        #[arg(long, default_value = "global")]
        scope: String,
    },
    Audit {
        #[command(subcommand)]
        action: AuditAction,
    },
}

#[derive(Subcommand)]
enum PermissionAction {
    List {
        #[arg(long)]
        category: Option<String>,
    },
    Register {
        code: String,
        #[arg(long)]
        category: String,
        #[arg(long)]
        description: Option<String>,
    },
    Deactivate {
        code: String,
    },
}

#[derive(Subcommand)]
enum RoleAction {
    List,
    Get {
        id: String,
    },
    Create {
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
    Deactivate {
        id: String,
    },
    Link {
        child: String,
        parent: String,
        /// Restrict inheritance to these permission codes
        #[arg(long)]
        select: Vec<String>,
        #[arg(long, default_value_t = 0)]
        priority: u32,
    },
    Unlink {
        child: String,
        parent: String,
    },
}

#[derive(Subcommand)]
enum GrantAction {
    List {
        #[arg(long)]
        role: Option<String>,
    },
    Issue {
        #[arg(long)]
        role: String,
        #[arg(long)]
        permission: String,
        #[arg(long, value_parser = parse_effect)]
        effect: Effect,
        #[arg(long, default_value = "global")]
        scope: String,
        #[arg(long, default_value_t = 0)]
        priority: u32,
        /// RFC 3339 expiry instant
        #[arg(long)]
        expires: Option<String>,
        /// Also issue allow-grants for transitive prerequisites
        #[arg(long)]
        with_prerequisites: bool,
    },
    Revoke {
        id: String,
    },
}

fn parse_effect(s: &str) -> Result<Effect, String> {
    match s.to_ascii_lowercase().as_str() {
        "allow" => Ok(Effect::Allow),
        "deny" => Ok(Effect::Deny),
        other => Err(format!("effect must be allow or deny, got '{}'", other)),
    }
}

fn parse_instant(s: &str) -> Result<DateTime<Utc>, Box<dyn std::error::Error>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

struct Stores {
    catalog: Arc<dyn CatalogStore>,
    roles: Arc<dyn RoleStore>,
    grants: Arc<dyn GrantStore>,
    _storage: Option<RedbStorage>,
}

impl Stores {
    fn new_memory() -> Self {
        Self {
            catalog: Arc::new(InMemoryCatalogStore::new()),
            roles: Arc::new(InMemoryRoleStore::new()),
            grants: Arc::new(InMemoryGrantStore::new()),
            _storage: None,
        }
    }

    fn new_redb(config: &Config) -> Result<Self, Box<dyn std::error::Error>> {
        config.ensure_data_dir()?;
        let storage = RedbStorage::open(config.db_path())?;
        Ok(Self {
            catalog: Arc::new(storage.catalog_store()),
            roles: Arc::new(storage.role_store()),
            grants: Arc::new(storage.grant_store()),
            _storage: Some(storage),
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let config = match cli.data_dir {
        Some(ref data_dir) => Config::default().with_data_dir(data_dir.clone()),
        None => Config::new()?,
    };

    let stores = if cli.memory {
        Stores::new_memory()
    } else {
        Stores::new_redb(&config)?
    };

    let engine = PermissionEngine::with_max_depth(
        Arc::clone(&stores.catalog),
        Arc::clone(&stores.roles),
        Arc::clone(&stores.grants),
        InMemoryAuditStore::new(),
        config.max_hierarchy_depth,
    )
    .await?;
    let actor = cli.actor.clone();

    match cli.command {
        Commands::Permission { action } => match action {
            PermissionAction::List { category } => {
                let permissions = match category {
                    Some(ref cat) => stores.catalog.list_category(cat).await?,
                    None => stores.catalog.list().await?,
                };
                if permissions.is_empty() {
                    println!("No permissions found");
                } else {
                    for p in permissions {
                        println!(
                            "{} [{}] {}",
                            p.code,
                            p.category,
                            if p.active { "active" } else { "inactive" }
                        );
                    }
                }
            }
            PermissionAction::Register {
                code,
                category,
                description,
            } => {
                let mut permission =
                    Permission::new(PermissionCode::new(code)?, category);
                if let Some(desc) = description {
                    permission = permission.with_description(desc);
                }
                let created = engine.register_permission(permission, &actor).await?;
                println!("Registered permission: {}", created.code);
            }
            PermissionAction::Deactivate { code } => {
                let code = PermissionCode::new(code)?;
                engine.deactivate_permission(&code, &actor).await?;
                println!("Deactivated permission: {}", code);
            }
        },
        Commands::Role { action } => match action {
            RoleAction::List => {
                let roles = stores.roles.list().await?;
                if roles.is_empty() {
                    println!("No roles found");
                } else {
                    for r in roles {
                        println!(
                            "{} \"{}\" {}",
                            r.id,
                            r.name,
                            if r.active { "active" } else { "inactive" }
                        );
                    }
                }
            }
            RoleAction::Get { id } => {
                let role_id = RoleId::new(id)?;
                if let Some(role) = stores.roles.get(&role_id).await? {
                    print!("{}", serde_yaml::to_string(&role)?);
                    let rules = stores.roles.rules().await?;
                    let parents: Vec<_> =
                        rules.iter().filter(|r| r.child == role_id).collect();
                    if !parents.is_empty() {
                        println!("\nInherits from:");
                        for rule in parents {
                            let mode = match &rule.mode {
                                InheritanceMode::All => "all".to_string(),
                                InheritanceMode::Selected(codes) => {
                                    format!("selected({})", codes.len())
                                }
                            };
                            println!(
                                "  {} [{}] priority {}",
                                rule.parent, mode, rule.priority
                            );
                        }
                    }
                } else {
                    eprintln!("Role not found: {}", role_id);
                }
            }
            RoleAction::Create {
                id,
                name,
                description,
            } => {
                let mut role = Role::new(RoleId::new(id)?, name);
                if let Some(desc) = description {
                    role = role.with_description(desc);
                }
                let created = engine.create_role(role, &actor).await?;
                println!("Created role: {}", created.id);
            }
            RoleAction::Deactivate { id } => {
                let role_id = RoleId::new(id)?;
                engine.deactivate_role(&role_id, &actor).await?;
                println!("Deactivated role: {}", role_id);
            }
            RoleAction::Link {
                child,
                parent,
                select,
                priority,
            } => {
                let mut rule =
                    InheritanceRule::new(RoleId::new(child)?, RoleId::new(parent)?)
                        .with_priority(priority);
                if !select.is_empty() {
                    let codes = select
                        .into_iter()
                        .map(PermissionCode::new)
                        .collect::<Result<Vec<_>, _>>()?;
                    rule = rule.with_mode(InheritanceMode::selected(codes));
                }
                let linked = engine.link_roles(rule, &actor).await?;
                println!("Linked {} -> {}", linked.child, linked.parent);
            }
            RoleAction::Unlink { child, parent } => {
                let child = RoleId::new(child)?;
                let parent = RoleId::new(parent)?;
                engine.unlink_roles(&child, &parent, &actor).await?;
                println!("Unlinked {} -> {}", child, parent);
            }
        },
        Commands::Grant { action } => match action {
            GrantAction::List { role } => {
                let grants = match role {
                    Some(ref id) => stores.grants.list_for_role(&RoleId::new(id.clone())?).await?,
                    None => stores.grants.list().await?,
                };
                if grants.is_empty() {
                    println!("No grants found");
                } else {
                    for g in grants {
                        let status = if g.revoked_at.is_some() {
                            "revoked"
                        } else if g.is_expired(Utc::now()) {
                            "expired"
                        } else {
                            "active"
                        };
                        println!(
                            "{} {} {} {} @ {} priority {} [{}]",
                            g.id, g.role, g.effect, g.permission, g.scope, g.priority, status
                        );
                    }
                }
            }
            GrantAction::Issue {
                role,
                permission,
                effect,
                scope,
                priority,
                expires,
                with_prerequisites,
            } => {
                let mut grant = Grant::new(
                    RoleId::new(role)?,
                    PermissionCode::wildcard(permission)?,
                    effect,
                    actor.clone(),
                )
                .with_scope(scope.parse::<Scope>()?)
                .with_priority(priority);
                if let Some(ref instant) = expires {
                    grant = grant.with_expiry(parse_instant(instant)?);
                }
                let issued = engine
                    .issue_grant(grant, &actor, with_prerequisites)
                    .await?;
                for g in issued {
                    println!("Issued grant {} ({} {})", g.id, g.effect, g.permission);
                }
            }
            GrantAction::Revoke { id } => {
                let uuid = uuid::Uuid::parse_str(&id)?;
                let revoked = engine.revoke_grant(&uuid, &actor).await?;
                println!(
                    "Revoked grant {} ({} {})",
                    revoked.id, revoked.effect, revoked.permission
                );
            }
        },
        Commands::Model { action } => handle_model_action(action, &engine, &actor).await?,
        Commands::Resolve {
            role,
            scope,
            at,
            trace,
        } => {
            let mut request =
                ResolveRequest::new(RoleId::new(role)?, scope.parse::<Scope>()?);
            if let Some(ref instant) = at {
                request.at = Some(parse_instant(instant)?);
            }
            let resolved = engine.resolve(&request, &actor).await?;

            println!(
                "Effective permissions for {} in {} ({}μs):",
                resolved.role, resolved.scope, resolved.evaluation_time_us
            );
            if resolved.entries.is_empty() {
                println!("  (none)");
            }
            for entry in &resolved.entries {
                println!(
                    "  {} {} via {} (grant {}, depth {})",
                    entry.effect,
                    entry.permission,
                    entry.source.origin,
                    entry.source.grant_id,
                    entry.source.depth
                );
            }

            if trace {
                println!("\nTrace:");
                for entry in &resolved.trace {
                    println!(
                        "  [{}] {} from {} (grant {}): {}",
                        if entry.included { "USE" } else { "DROP" },
                        entry.permission,
                        entry.origin,
                        entry.grant_id,
                        entry.detail
                    );
                }
            }
        }
        Commands::Check {
            role,
            permission,
            scope,
        } => {
            let decision = engine
                .check(
                    &RoleId::new(role)?,
                    &PermissionCode::new(permission)?,
                    &scope.parse::<Scope>()?,
                    None,
                    &actor,
                )
                .await?;
            match decision {
                AccessDecision::Granted {
                    permission,
                    origin,
                    depth,
                    ..
                } => {
                    println!("GRANTED {} (via {} at depth {})", permission, origin, depth);
                }
                AccessDecision::Denied { permission, reason } => {
                    println!("DENIED {}: {}", permission, reason);
                }
            }
        }
        Commands::Conflicts { role, scope } => {
            let conflicts = engine
                .detect_conflicts(
                    &RoleId::new(role)?,
                    &scope.parse::<Scope>()?,
                    None,
                    &actor,
                )
                .await?;
            if conflicts.is_empty() {
                println!("No conflicts");
            } else {
                for conflict in conflicts {
                    println!(
                        "{:?} on {} (resolved {}):",
                        conflict.kind, conflict.permission, conflict.resolved_effect
                    );
                    for g in &conflict.grants {
                        println!(
                            "  grant {} from {} depth {} {} priority {}",
                            g.grant_id, g.origin, g.depth, g.effect, g.priority
                        );
                    }
                }
            }
        }
        Commands::Audit { action } => handle_audit_action(action, &engine).await?,
    }

    Ok(())
}
