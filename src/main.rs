use std::path::Path;

use clap::Parser;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use fedicache::capability::{
    CapabilityGate, CapabilityMode, FeatureFlag, Operation, ServerDescriptor, ServerFamily, Version,
};
use fedicache::cli::{
    CapsCheckArgs, CapsCommand, Cli, Commands, IdentitiesCommand, IngestCommand, PageArgs,
    ServerCommand, ShowCommand, StatusCommand,
};
use fedicache::completions::run_completions_command;
use fedicache::config::Config;
use fedicache::db::StatusFlag;
use fedicache::entities::{Context, Conversation, FilterContext, FilterPayload, Notification, Status};
use fedicache::identity::{IdentityId, StoreDirectory};
use fedicache::timeline::{PageAnchor, TimelineKey};
use fedicache::{Engine, EngineError};

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}

fn print_json(value: &impl serde::Serialize) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).expect("json serialization should work")
    );
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// A fetched thread: the focused status plus its context payload.
#[derive(Debug, Deserialize)]
struct ThreadPayload {
    status: Status,
    #[serde(flatten)]
    context: Context,
}

fn run() -> Result<(), EngineError> {
    let cli = Cli::parse();
    if let Commands::Completions(args) = &cli.command {
        return run_completions_command(args.shell.as_deref(), args.install);
    }

    let config = Config::load(cli.config.as_deref())?;
    init_logging(&config.logging.level);
    let root = cli.root.clone().unwrap_or_else(|| config.store.root.clone());
    let directory = StoreDirectory::new(root, config.store_options());
    let open_engine = || -> Result<Engine, EngineError> {
        let raw = cli.identity.as_deref().ok_or_else(|| {
            EngineError::InvalidArgument("--identity is required for this command".to_string())
        })?;
        let identity: IdentityId = raw.parse()?;
        Engine::open(&directory, &identity, &cli.key, &config)
    };

    match &cli.command {
        Commands::Completions(_) => {}
        Commands::Caps(CapsCommand::Check(args)) => run_caps_check(args)?,
        Commands::Caps(CapsCommand::Ls) => {
            let operations: Vec<&str> = Operation::ALL.iter().map(|op| op.as_str()).collect();
            print_json(&operations);
        }
        Commands::Identities(IdentitiesCommand::Ls) => print_json(&directory.list()?),
        Commands::Identities(IdentitiesCommand::Rm { id }) => {
            let identity: IdentityId = id.parse()?;
            let deleted = directory.delete(&identity)?;
            print_json(&json!({ "identity": identity, "deleted": deleted }));
        }
        Commands::Server(ServerCommand::Set(args)) => {
            let engine = open_engine()?;
            let mut server = ServerDescriptor::detect(&args.software, &args.version);
            for feature in &args.features {
                server = server.with_feature(FeatureFlag::from(feature.clone()));
            }
            engine.set_server(&server)?;
            print_json(&server);
        }
        Commands::Server(ServerCommand::Show) => print_json(&open_engine()?.server()?),
        Commands::Ingest(command) => run_ingest(&open_engine()?, command)?,
        Commands::Show(command) => run_show(&open_engine()?, command)?,
        Commands::Cursor(args) => {
            let key = parse_key(&args.key)?;
            let max_id = open_engine()?.cursor(&key)?;
            print_json(&json!({ "timeline": key.id(), "max_id": max_id }));
        }
        Commands::Status(StatusCommand::Flag { id, flag, off }) => {
            let flag: StatusFlag = flag.parse().map_err(EngineError::InvalidArgument)?;
            open_engine()?.set_status_flag(id, flag, !off)?;
            print_json(&json!({ "status_id": id, "value": !off }));
        }
        Commands::Status(StatusCommand::Delete { id }) => {
            let deleted = open_engine()?.delete_status(id)?;
            print_json(&json!({ "status_id": id, "deleted": deleted }));
        }
        Commands::ShowAnyway(args) => {
            let context = FilterContext::from(args.context.clone());
            if let FilterContext::Unknown(raw) = &context {
                return Err(EngineError::InvalidArgument(format!(
                    "unknown filter context '{}'",
                    raw
                )));
            }
            open_engine()?.set_show_anyway(&args.status_id, &context, !args.off)?;
            print_json(&json!({
                "status_id": args.status_id,
                "context": context,
                "shown": !args.off,
            }));
        }
    }
    Ok(())
}

fn run_caps_check(args: &CapsCheckArgs) -> Result<(), EngineError> {
    let version = match &args.version {
        Some(raw) => Some(Version::parse(raw).ok_or_else(|| {
            EngineError::InvalidArgument(format!("invalid version '{}'", raw))
        })?),
        None => None,
    };
    let mut server = ServerDescriptor::new(ServerFamily::parse(&args.family), version);
    for feature in &args.features {
        server = server.with_feature(FeatureFlag::from(feature.clone()));
    }
    let operation: Operation = args.operation.parse().map_err(EngineError::InvalidArgument)?;
    let mode = if args.lenient {
        CapabilityMode::Lenient
    } else {
        CapabilityMode::Strict
    };
    let allowed = CapabilityGate::new(mode).check(operation, &server)?;
    print_json(&json!({
        "operation": operation.as_str(),
        "family": server.family,
        "allowed": allowed,
    }));
    Ok(())
}

fn run_ingest(engine: &Engine, command: &IngestCommand) -> Result<(), EngineError> {
    match command {
        IngestCommand::Timeline { key, file, page } => {
            let key = parse_key(key)?;
            let statuses: Vec<Status> = read_json(file)?;
            let outcome = engine.save_timeline_page(
                &key,
                &statuses,
                &page_anchor(page),
                page.next_max_id.as_deref(),
            )?;
            print_json(&json!({
                "timeline": key.id(),
                "skipped": outcome.is_none(),
                "merge": outcome,
            }));
        }
        IngestCommand::Context { file } => {
            let payload: ThreadPayload = read_json(file)?;
            let stats = engine.save_context(&payload.status, &payload.context)?;
            print_json(&json!({
                "parent": payload.status.id,
                "statuses": stats.statuses,
                "accounts": stats.accounts,
            }));
        }
        IngestCommand::Notifications { file, page } => {
            let notifications: Vec<Notification> = read_json(file)?;
            let outcome = engine.save_notifications_page(
                &notifications,
                &page_anchor(page),
                page.next_max_id.as_deref(),
            )?;
            print_json(&json!({ "timeline": "notifications", "merge": outcome }));
        }
        IngestCommand::Conversations { file, page } => {
            let conversations: Vec<Conversation> = read_json(file)?;
            let outcome = engine.save_conversations_page(
                &conversations,
                &page_anchor(page),
                page.next_max_id.as_deref(),
            )?;
            print_json(&json!({ "timeline": "conversations", "merge": outcome }));
        }
        IngestCommand::Filters { file } => {
            let payloads: Vec<FilterPayload> = read_json(file)?;
            let rules = engine.replace_filters(payloads)?;
            print_json(&json!({ "rules": rules }));
        }
    }
    Ok(())
}

fn run_show(engine: &Engine, command: &ShowCommand) -> Result<(), EngineError> {
    match command {
        ShowCommand::Timeline { key } => print_json(&engine.timeline(&parse_key(key)?)?),
        ShowCommand::Context { id } => {
            let sections = engine.context(id)?;
            if sections.is_empty() {
                return Err(EngineError::NotFound {
                    kind: "status",
                    id: id.clone(),
                });
            }
            print_json(&sections);
        }
        ShowCommand::Status { id } => match engine.status(id)? {
            Some(view) => print_json(&view),
            None => {
                return Err(EngineError::NotFound {
                    kind: "status",
                    id: id.clone(),
                })
            }
        },
        ShowCommand::Filters => print_json(&engine.filter_rules()?),
    }
    Ok(())
}

fn parse_key(raw: &str) -> Result<TimelineKey, EngineError> {
    raw.parse().map_err(EngineError::InvalidArgument)
}

fn page_anchor(page: &PageArgs) -> PageAnchor {
    match (&page.max_id, &page.min_id) {
        (Some(max_id), _) => PageAnchor::OlderThan(max_id.clone()),
        (None, Some(min_id)) => PageAnchor::NewerThan(min_id.clone()),
        (None, None) => PageAnchor::Top,
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, EngineError> {
    let raw = std::fs::read_to_string(path).map_err(|err| {
        EngineError::InvalidArgument(format!("failed to read {}: {}", path.display(), err))
    })?;
    serde_json::from_str(&raw).map_err(|err| {
        EngineError::InvalidArgument(format!("invalid JSON in {}: {}", path.display(), err))
    })
}
