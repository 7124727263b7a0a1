//! Administrative CLI over the tenant-forge engines.
//!
//! Reads `DATABASE_URL` and `META_SCHEMA` from the environment (or `.env`).
//! Run from repo root: `cargo run -p tenant-admin -- provision --tenant <uuid> --model tenant.json`

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tenant_forge::{
    ensure_database_exists, CallContext, EngineSettings, EntityDefinition, EntityEngine, NoScripts, PgMetaStore,
    PreResultRights, ProviderRegistry, Record, SchemaEngine,
};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(author, version, about = "Tenant schema and entity administration", long_about = None)]
struct Args {
    /// Acting user recorded on metadata changes.
    #[arg(long, global = true)]
    user: Option<Uuid>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the metadata database and tables.
    Init,
    /// Provision a tenant or apply a new tenant model.
    Provision {
        #[arg(long)]
        tenant: Uuid,
        #[arg(long, default_value = "postgres")]
        provider: String,
        /// Tenant model JSON file.
        #[arg(long)]
        model: PathBuf,
    },
    DropTenant {
        #[arg(long)]
        tenant: Uuid,
    },
    /// Create or update an entity table from a model JSON file.
    ApplyEntity {
        #[arg(long)]
        tenant: Uuid,
        #[arg(long)]
        model: PathBuf,
    },
    DropEntity {
        #[arg(long)]
        tenant: Uuid,
        #[arg(long)]
        table: String,
    },
    /// Run an export function and write its payload into `out_dir`.
    Export {
        #[arg(long)]
        tenant: Uuid,
        /// Entity definition JSON file.
        #[arg(long)]
        definition: PathBuf,
        #[arg(long)]
        identifier: String,
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Run an import function over a CSV or JSON file.
    Import {
        #[arg(long)]
        tenant: Uuid,
        #[arg(long)]
        definition: PathBuf,
        #[arg(long)]
        identifier: String,
        #[arg(long)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tenant_forge=info")),
        )
        .init();

    let args = Args::parse();
    let settings = EngineSettings::from_env();
    let database_url = settings
        .postgres_admin_url
        .clone()
        .unwrap_or_else(|| "postgres://localhost/tenant_forge".into());

    if matches!(args.command, Command::Init) {
        ensure_database_exists(&database_url).await?;
    }
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;
    let store = Arc::new(PgMetaStore::new(pool, settings.meta_schema.clone())?);
    let providers = Arc::new(ProviderRegistry::from_settings(&settings));
    let schema = SchemaEngine::new(providers, store.clone(), store.clone());

    match args.command {
        Command::Init => {
            store.ensure_sys_tables().await?;
            tracing::info!(schema = %settings.meta_schema, "metadata tables ready");
        }
        Command::Provision { tenant, provider, model } => {
            let model = std::fs::read_to_string(model)?;
            let connection = schema
                .create_or_update_tenant(tenant, &provider, &model, args.user)
                .await?;
            println!("{}", connection.schema.unwrap_or_default());
        }
        Command::DropTenant { tenant } => schema.drop_tenant(tenant).await?,
        Command::ApplyEntity { tenant, model } => {
            let model = std::fs::read_to_string(model)?;
            let changes = schema.create_or_update_entity(tenant, &model, args.user).await?;
            tracing::info!(
                created = changes.created,
                changed = !changes.columns_unchanged(),
                "entity applied"
            );
        }
        Command::DropEntity { tenant, table } => schema.drop_entity(tenant, &table).await?,
        Command::Export {
            tenant,
            definition,
            identifier,
            out_dir,
        } => {
            let def = read_definition(&definition)?;
            let engine = EntityEngine::new(schema.resolver().clone(), Arc::new(NoScripts));
            let call = call_context(tenant, args.user);
            let export = engine.export(&call, &def, &identifier, &Record::new()).await?;
            let path = out_dir.join(&export.file_name);
            std::fs::write(&path, &export.data)?;
            println!("{}", path.display());
        }
        Command::Import {
            tenant,
            definition,
            identifier,
            file,
        } => {
            let def = read_definition(&definition)?;
            let payload = std::fs::read(file)?;
            let engine = EntityEngine::new(schema.resolver().clone(), Arc::new(NoScripts));
            let call = call_context(tenant, args.user);
            let summary = engine
                .import(&call, &def, &identifier, &payload, &PreResultRights)
                .await?;
            println!("imported {} skipped {}", summary.imported, summary.skipped);
        }
    }
    Ok(())
}

fn read_definition(path: &PathBuf) -> Result<EntityDefinition, Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

fn call_context(tenant: Uuid, user: Option<Uuid>) -> CallContext {
    let call = CallContext::new(tenant);
    match user {
        Some(user) => call.with_user(user),
        None => call,
    }
}
