//! formflow-forms - catalog-driven form filling
//!
//! One binary for every command plus `serve`, which exposes the catalog,
//! background workflows and the event stream over HTTP.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use formflow_common::config::AppConfig;
use formflow_common::events::{EventBus, EventPhase, Subscription};
use formflow_forms::models::{FieldMap, Template};
use formflow_forms::services::field_extractor::default_template_path;
use formflow_forms::services::{
    Catalog, CaseStore, FillRequest, OutputTarget, WorkflowOrchestrator,
};
use formflow_forms::AppState;
use serde::Serialize;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for formflow-forms
#[derive(Parser, Debug)]
#[command(name = "formflow-forms")]
#[command(about = "Download, template and fill catalogued forms")]
#[command(version)]
struct Cli {
    /// Configuration file (default: <config dir>/formflow/config.toml)
    #[arg(long, global = true, env = "FORMFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Root folder for catalog, downloads, cases and output
    #[arg(long, global = true)]
    root_folder: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API and event stream
    Serve {
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Query the form catalog
    Catalog {
        #[command(subcommand)]
        query: CatalogCommand,
    },
    /// Download a form and write its provenance sidecar
    Download {
        code: String,
        /// Destination directory (default: configured downloads dir)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },
    /// List a document's fields and provenance
    Inspect { document: PathBuf },
    /// Export a blank field template for a document
    Template {
        document: PathBuf,
        /// Template file (default: <stem>_template.json next to the document)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Fill the document a template points at with the template's values
    Fill {
        template: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long)]
        output_dir: Option<PathBuf>,
        #[arg(long)]
        flatten: bool,
    },
    /// Manage saved cases
    Case {
        #[command(subcommand)]
        action: CaseCommand,
    },
    /// Download, template and fill one form
    Workflow {
        code: String,
        /// JSON object of field values
        #[arg(long)]
        data: Option<PathBuf>,
        #[arg(long)]
        output_dir: Option<PathBuf>,
        #[arg(long)]
        flatten: bool,
    },
    /// Run the workflow for several forms
    Bulk {
        #[arg(required = true)]
        codes: Vec<String>,
        /// JSON object of form code -> field values
        #[arg(long)]
        data: Option<PathBuf>,
        #[arg(long)]
        output_dir: Option<PathBuf>,
        #[arg(long)]
        flatten: bool,
    },
    /// Download a form unless a copy already exists
    Update {
        code: String,
        #[arg(short, long)]
        dir: Option<PathBuf>,
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
enum CatalogCommand {
    /// Look up one form code
    Code { code: String },
    /// Forms of one region
    Region { region: String },
    /// Known regions
    States,
    /// Search code, name and description
    Search { term: String },
}

#[derive(Subcommand, Debug)]
enum CaseCommand {
    /// Create an empty case
    Create {
        form_code: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        entity: String,
        /// Seed fields and document from this template
        #[arg(long)]
        template: Option<PathBuf>,
    },
    /// Check a case against its template and save the result
    Validate {
        case: PathBuf,
        /// Template to check against (default: the case's template reference)
        #[arg(long)]
        template: Option<PathBuf>,
    },
    /// Fill a case's document with its values
    Fill {
        case: PathBuf,
        #[arg(long)]
        output_dir: Option<PathBuf>,
        #[arg(long)]
        flatten: bool,
    },
    /// List saved cases
    List {
        #[arg(long)]
        entity: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref(), cli.root_folder.as_deref())
        .context("Failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    debug!("Root folder: {}", config.root_folder.display());
    config
        .ensure_directories()
        .context("Failed to initialize root folder")?;

    let event_bus = EventBus::new(config.event_capacity);

    if let Command::Serve { port } = cli.command {
        return serve(config, event_bus, port).await;
    }

    let logger = EventLogger::start(&event_bus);
    let result = run_command(cli.command, &config, &event_bus).await;
    logger.finish(&event_bus).await;
    result
}

async fn run_command(command: Command, config: &AppConfig, bus: &EventBus) -> Result<()> {
    let orchestrator = WorkflowOrchestrator::from_config(config, bus.clone())?;

    match command {
        Command::Serve { .. } => Err(anyhow!("serve is not a one-shot command")),

        Command::Catalog { query } => {
            let catalog = Catalog::load(&config.catalog_path)?;
            match query {
                CatalogCommand::Code { code } => print_json(catalog.require(&code)?),
                CatalogCommand::Region { region } => print_json(&catalog.by_region(&region)),
                CatalogCommand::States => print_json(&catalog.states()),
                CatalogCommand::Search { term } => print_json(&catalog.search(&term)),
            }
        }

        Command::Download { code, dir } => {
            let catalog = Catalog::load(&config.catalog_path)?;
            let dir = dir.unwrap_or_else(|| config.downloads_dir.clone());
            let outcome = orchestrator.downloader().download(&catalog, &code, &dir).await?;
            println!("{}", outcome.path.display());
            Ok(())
        }

        Command::Inspect { document } => {
            let report = orchestrator.extractor().inspect(&document).await?;
            print_json(&report)
        }

        Command::Template { document, output } => {
            let destination = output.unwrap_or_else(|| default_template_path(&document));
            orchestrator
                .extractor()
                .export_template(&document, &destination)
                .await?;
            println!("{}", destination.display());
            Ok(())
        }

        Command::Fill {
            template,
            output,
            output_dir,
            flatten,
        } => {
            let template = Template::load(&template).await?;
            let target = OutputTarget::from_options(output, output_dir);
            let outcome = orchestrator
                .engine()
                .fill(&FillRequest::from(&template), &target, flatten)
                .await?;
            println!("{}", outcome.output_path.display());
            Ok(())
        }

        Command::Case { action } => {
            let store = CaseStore::new(config.cases_dir.clone(), bus.clone());
            run_case_command(action, &store, &orchestrator).await
        }

        Command::Workflow {
            code,
            data,
            output_dir,
            flatten,
        } => {
            let catalog = Catalog::load(&config.catalog_path)?;
            let fields: FieldMap = match data {
                Some(path) => read_json(&path)?,
                None => FieldMap::new(),
            };
            let output_dir = output_dir.unwrap_or_else(|| config.output_dir.clone());
            let result = orchestrator
                .run_workflow(&catalog, &code, &fields, &output_dir, flatten)
                .await?;
            print_json(&result)
        }

        Command::Bulk {
            codes,
            data,
            output_dir,
            flatten,
        } => {
            let catalog = Catalog::load(&config.catalog_path)?;
            let fields: HashMap<String, FieldMap> = match data {
                Some(path) => read_json(&path)?,
                None => HashMap::new(),
            };
            let output_dir = output_dir.unwrap_or_else(|| config.output_dir.clone());
            let result = orchestrator
                .run_bulk_workflow(&catalog, &codes, &fields, &output_dir, flatten)
                .await;
            print_json(&result)?;
            if result.failed > 0 {
                return Err(anyhow!("{} of {} forms failed", result.failed, codes.len()));
            }
            Ok(())
        }

        Command::Update { code, dir, force } => {
            let catalog = Catalog::load(&config.catalog_path)?;
            let dir = dir.unwrap_or_else(|| config.downloads_dir.clone());
            let outcome = orchestrator
                .run_update_workflow(&catalog, &code, &dir, force)
                .await?;
            print_json(&outcome)
        }
    }
}

async fn run_case_command(
    action: CaseCommand,
    store: &CaseStore,
    orchestrator: &WorkflowOrchestrator,
) -> Result<()> {
    match action {
        CaseCommand::Create {
            form_code,
            name,
            entity,
            template,
        } => {
            let (mut case, path) = store.create(&form_code, &name, &entity).await?;
            if let Some(template_path) = template {
                let template = Template::load(&template_path).await?;
                case.apply_template(&template);
                case.form_reference.template_reference = Some(template_path);
                store.save(&mut case, &path).await?;
            }
            println!("{}", path.display());
            Ok(())
        }

        CaseCommand::Validate { case, template } => {
            let mut loaded = store.load(&case).await?;
            let template_path = template
                .or_else(|| loaded.form_reference.template_reference.clone())
                .ok_or_else(|| anyhow!("Case has no template reference; pass --template"))?;
            let template = Template::load(&template_path).await?;
            let result = store.validate(&mut loaded, &template);
            store.save(&mut loaded, &case).await?;
            print_json(&result)
        }

        CaseCommand::Fill {
            case,
            output_dir,
            flatten,
        } => {
            let outcome = store
                .fill_from_case(&case, output_dir.as_deref(), flatten, orchestrator.engine())
                .await?;
            println!("{}", outcome.output_path.display());
            Ok(())
        }

        CaseCommand::List { entity } => {
            for path in store.list(entity.as_deref())? {
                println!("{}", path.display());
            }
            Ok(())
        }
    }
}

async fn serve(config: AppConfig, event_bus: EventBus, port: Option<u16>) -> Result<()> {
    info!("Starting formflow-forms");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let catalog = Catalog::load(&config.catalog_path)
        .with_context(|| format!("Failed to load catalog {}", config.catalog_path.display()))?;
    let orchestrator = WorkflowOrchestrator::from_config(&config, event_bus.clone())?;
    let port = port.unwrap_or(config.port);

    let logger = EventLogger::start(&event_bus);
    let state = AppState::new(config, catalog, orchestrator, event_bus.clone());
    let app = formflow_forms::build_router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    logger.finish(&event_bus).await;
    info!("Server shutdown complete");
    Ok(())
}

/// Forwards every bus event to the log
struct EventLogger {
    id: u64,
    task: JoinHandle<()>,
}

impl EventLogger {
    fn start(bus: &EventBus) -> Self {
        let subscription = bus.subscribe("*");
        let id = subscription.id();
        let task = tokio::spawn(log_events(subscription));
        Self { id, task }
    }

    /// Close the subscription and wait until buffered events are logged
    async fn finish(self, bus: &EventBus) {
        bus.unsubscribe(self.id);
        if let Err(e) = self.task.await {
            warn!("Event logger stopped abnormally: {}", e);
        }
    }
}

async fn log_events(mut subscription: Subscription) {
    while let Some(event) = subscription.recv().await {
        let data = serde_json::to_string(&event.data).unwrap_or_default();
        match (event.phase(), &event.error) {
            (EventPhase::Error, Some(error)) => {
                warn!(event = %event.event_type, data = %data, "{}", error)
            }
            (EventPhase::Progress, _) => debug!(event = %event.event_type, data = %data),
            _ => info!(event = %event.event_type, data = %data),
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {}", path.display()))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
