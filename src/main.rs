use std::{process, sync::Arc};

use pubcache::{
    application::error::AppError,
    application::repos::ContentSource,
    cache::{
        CacheConfig, LeadershipToken, PublishedContent, PublishedContentCache, RouteLookup,
        XmlTreeStore, remove_if_exists,
    },
    config::{self, Command, InspectArgs, RebuildArgs, Settings, WarmArgs},
    domain::types::TreeKind,
    infra::{
        db::{PgLeaderElection, PostgresContentSource},
        error::InfraError,
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(i32::from(error.exit_code()));
    }
}

fn report_application_error(error: &AppError) {
    let chain = error.messages().join(": ");
    if dispatcher::has_been_set() {
        error!(error = %chain, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %chain, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;
    telemetry::init(&settings.logging)?;

    match cli_args.command {
        Command::Warm(args) => run_warm(settings, args).await,
        Command::Rebuild(args) => run_rebuild(settings, args).await,
        Command::Inspect(args) => run_inspect(settings, args).await,
    }
}

async fn init_source(
    settings: &Settings,
) -> Result<(Arc<PostgresContentSource>, PgLeaderElection), AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))?;

    let pool =
        PostgresContentSource::connect(database_url, settings.database.max_connections.get())
            .await
            .map_err(InfraError::from)?;

    PostgresContentSource::run_migrations(&pool)
        .await
        .map_err(|err| InfraError::Migration(err.to_string()))?;

    let election = PgLeaderElection::acquire(&pool, settings.cache.leadership_key)
        .await
        .map_err(InfraError::from)?;

    Ok((Arc::new(PostgresContentSource::new(pool)), election))
}

async fn open_store(
    kind: TreeKind,
    config: CacheConfig,
    source: Arc<PostgresContentSource>,
    token: LeadershipToken,
) -> Result<Arc<XmlTreeStore>, AppError> {
    let source: Arc<dyn ContentSource> = source;
    Ok(XmlTreeStore::open(kind, config, source, token).await?)
}

/// Flush what the store still owes the snapshot file and give up leadership.
async fn finish(store: &XmlTreeStore, election: &PgLeaderElection) -> Result<(), AppError> {
    store.release_leadership().await;
    election.release().await.map_err(InfraError::from)?;
    Ok(())
}

async fn run_warm(settings: Settings, args: WarmArgs) -> Result<(), AppError> {
    let (source, election) = init_source(&settings).await?;
    let config = CacheConfig::from(&settings.cache);
    let token = election.token();

    if !token.is_held() {
        warn!("Another process owns the snapshot file; warming without writing it");
    } else if args.from_database {
        remove_if_exists(&config.file_path).map_err(InfraError::from)?;
    }

    let store = open_store(TreeKind::Content, config, source, token).await?;
    let nodes = store.snapshot().len();
    finish(&store, &election).await?;

    info!(nodes, "Warm completed");
    Ok(())
}

async fn run_rebuild(settings: Settings, args: RebuildArgs) -> Result<(), AppError> {
    if args.group_size == 0 {
        return Err(AppError::validation("--group-size must be positive"));
    }

    let (source, election) = init_source(&settings).await?;
    let store = open_store(
        TreeKind::from(args.tree),
        CacheConfig::from(&settings.cache),
        source,
        election.token(),
    )
    .await?;

    let content_type_ids =
        (!args.content_type_ids.is_empty()).then_some(args.content_type_ids.as_slice());
    let written = store.rebuild(args.group_size, content_type_ids).await?;
    finish(&store, &election).await?;

    info!(
        written,
        tree = %TreeKind::from(args.tree),
        "Rebuild completed"
    );
    Ok(())
}

async fn run_inspect(settings: Settings, args: InspectArgs) -> Result<(), AppError> {
    let (source, election) = init_source(&settings).await?;
    // Read-only: pick up the snapshot file if present, never write it.
    election.release().await.map_err(InfraError::from)?;
    let mut config = CacheConfig::from(&settings.cache);
    config.continuously_update_file = false;
    config.sync_from_file = config.file_enabled;

    let store = open_store(TreeKind::Content, config, source, LeadershipToken::denied()).await?;
    let preview = args.preview;
    let cache = match (preview, args.id) {
        (true, Some(id)) => PublishedContentCache::with_preview(Arc::clone(&store), id, true).await?,
        (true, None) => return Err(AppError::validation("--preview requires --id")),
        (false, _) => PublishedContentCache::new(Arc::clone(&store)),
    };

    if let Some(route) = args.route.as_deref() {
        let content = cache.get_by_route(preview, route).ok_or(AppError::NotFound)?;
        println!("{route} -> {}", describe(&content));
    }

    if let Some(id) = args.id {
        let content = cache.get_by_id(preview, id).ok_or(AppError::NotFound)?;
        println!("{}", describe(&content));
        match cache.get_route_by_id(preview, id) {
            RouteLookup::Found(route) => println!("  route: {route}"),
            RouteLookup::Collision {
                route,
                conflicting_id,
            } => println!("  route: {route} (resolves to {conflicting_id})"),
            RouteLookup::NotFound => println!("  route: none"),
        }
    }

    if args.children {
        let children = match args.id {
            Some(id) => cache.children(preview, id),
            None => cache.get_at_root(preview),
        };
        for child in &children {
            println!("  {}", describe(child));
        }
    }

    if args.id.is_none() && args.route.is_none() && !args.children {
        println!("{} nodes", store.snapshot().len());
    }

    store.shutdown().await;
    Ok(())
}

fn describe(content: &PublishedContent) -> String {
    let node = &content.node;
    let draft = if node.is_draft { " (draft)" } else { "" };
    format!(
        "{} {:?} [{}] path={}{draft}",
        node.id, node.name, node.type_alias, node.path
    )
}
