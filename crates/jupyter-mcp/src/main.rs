use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::*,
    tool, tool_handler, tool_router,
    transport::stdio,
    ServiceExt,
};
use schemars::JsonSchema;
use serde::Deserialize;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[cfg(feature = "http")]
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpService,
};

mod backend;
mod config;
mod error;
mod kernel;
mod state;
#[cfg(test)]
mod test_support;
mod tools;

use backend::{JupyterRestBackend, NotebookBackend};
use config::Config;
use kernel::{KernelExecutor, KernelRegistry, WebSocketKernel};
use state::StateGuard;
use tools::common::{position_index, CellAddress, ExecutionCountParam};
use tools::execute::ExecutionType;
use tools::modify::{ModifyOperation, ModifyRequest};
use tools::query::QueryType;

/// Parameters for the QueryNotebook tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct QueryNotebookParams {
    /// Path to the notebook relative to the Jupyter server root. The .ipynb extension is optional.
    pub notebook_path: String,
    /// What to query: view_source, check_server, list_sessions or get_position_index
    pub query_type: QueryType,
    /// Execution count shown in the notebook, e.g. 3, "3", "[3]" or "(3)". For view_source and get_position_index.
    pub execution_count: Option<ExecutionCountParam>,
    /// 0-based cell position. For view_source only; omit both this and execution_count to view all cells.
    pub position_index: Option<f64>,
    /// Cell id. For get_position_index.
    pub cell_id: Option<String>,
    /// Jupyter server URL. For check_server and list_sessions; defaults to the notebook's registered server.
    pub server_url: Option<String>,
}

/// Parameters for the ModifyNotebookCells tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ModifyNotebookCellsParams {
    /// Path to the notebook relative to the Jupyter server root. The .ipynb extension is optional.
    pub notebook_path: String,
    /// add_code, edit_code, add_markdown, edit_markdown, delete, insert_code or insert_markdown
    pub operation: ModifyOperation,
    /// New cell source. Required for every operation except delete.
    pub cell_content: Option<String>,
    /// 0-based cell position. Target for edits and deletes, insertion point for inserts.
    pub position_index: Option<f64>,
    /// Execution count of the target cell, as an alternative to position_index for edits and deletes
    pub execution_count: Option<ExecutionCountParam>,
    /// Id of the target cell, as an alternative to position_index for edits and deletes
    pub cell_id: Option<String>,
    /// Run the cell after add_code, edit_code or insert_code (default: true)
    #[serde(default = "default_execute")]
    pub execute: bool,
}

fn default_execute() -> bool {
    true
}

/// Parameters for the ExecuteNotebookCode tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExecuteNotebookCodeParams {
    /// Path to the notebook relative to the Jupyter server root. The .ipynb extension is optional.
    pub notebook_path: String,
    /// execute_cell or install_packages
    pub execution_type: ExecutionType,
    /// 0-based position of the cell to execute
    pub position_index: Option<f64>,
    /// Execution count of the cell to execute
    pub execution_count: Option<ExecutionCountParam>,
    /// Id of the cell to execute
    pub cell_id: Option<String>,
    /// Space-separated package names for install_packages, e.g. "pandas numpy"
    pub package_names: Option<String>,
}

/// Parameters for the SetupNotebook tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SetupNotebookParams {
    /// Path to the notebook relative to the Jupyter server root. The .ipynb extension is optional.
    pub notebook_path: String,
    /// Sources of code cells to create the notebook with. Ignored if the notebook already exists.
    pub cells: Option<Vec<String>>,
    /// Jupyter server URL for this notebook (default: JUPYTER_SERVER_URL or http://localhost:8888)
    pub server_url: Option<String>,
}

/// State shared by every MCP session.
///
/// Tracked fingerprints and kernel lookups are per notebook, not per client,
/// so HTTP sessions working on the same notebook see each other's changes
/// as their own.
#[derive(Clone)]
pub struct SharedState {
    config: Arc<Config>,
    backend: Arc<dyn NotebookBackend>,
    executor: Arc<dyn KernelExecutor>,
    guard: Arc<StateGuard>,
    kernels: Arc<KernelRegistry>,
}

impl SharedState {
    /// Connect to Jupyter over REST and kernel websockets.
    pub fn new(config: Config) -> Result<Self, Box<dyn std::error::Error>> {
        let backend = Arc::new(JupyterRestBackend::new(
            config.token.clone(),
            config.request_timeout,
        )?);
        let executor = Arc::new(WebSocketKernel::new(
            config.token.clone(),
            config.execution_timeout,
        ));
        Ok(Self::from_parts(config, backend, executor))
    }

    /// Assemble state from explicit backend and executor implementations.
    pub fn from_parts(
        config: Config,
        backend: Arc<dyn NotebookBackend>,
        executor: Arc<dyn KernelExecutor>,
    ) -> Self {
        let guard = Arc::new(StateGuard::new(
            backend.clone(),
            config.default_server_url.clone(),
        ));
        Self {
            config: Arc::new(config),
            backend,
            executor,
            guard,
            kernels: Arc::new(KernelRegistry::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn backend(&self) -> &dyn NotebookBackend {
        self.backend.as_ref()
    }

    pub fn executor(&self) -> &dyn KernelExecutor {
        self.executor.as_ref()
    }

    pub fn guard(&self) -> &StateGuard {
        &self.guard
    }

    pub fn kernels(&self) -> &KernelRegistry {
        &self.kernels
    }
}

/// The MCP server handed to each transport session.
#[derive(Clone)]
pub struct NotebookServer {
    shared: SharedState,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl NotebookServer {
    pub fn from_shared(shared: SharedState) -> Self {
        Self {
            shared,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(description = "Read-only queries on a notebook and its Jupyter server. view_source returns one cell (by position_index or execution_count) or all cells, with image and HTML outputs summarized. get_position_index finds a cell's position from its execution_count or cell_id. check_server reports whether the server is reachable. list_sessions lists running notebook sessions. Viewing a notebook marks its current content as seen, which later modifications require.")]
    async fn query_notebook(
        &self,
        params: Parameters<QueryNotebookParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let params = params.0;
        let address = CellAddress {
            position_index: position_index(params.position_index)?,
            execution_count: params.execution_count.as_ref(),
            cell_id: params.cell_id.as_deref(),
        };
        tools::query::execute(
            &self.shared,
            &params.notebook_path,
            params.query_type,
            address,
            params.server_url.as_deref(),
        )
        .await
    }

    #[tool(description = "Add, insert, edit or delete notebook cells. Fails with a stale state error if the notebook changed since you last viewed or modified it; view it again with query_notebook and retry. Code cells run after add_code, edit_code and insert_code unless execute is false.")]
    async fn modify_notebook_cells(
        &self,
        params: Parameters<ModifyNotebookCellsParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let params = params.0;
        let request = ModifyRequest {
            operation: params.operation,
            cell_content: params.cell_content.as_deref(),
            address: CellAddress {
                position_index: position_index(params.position_index)?,
                execution_count: params.execution_count.as_ref(),
                cell_id: params.cell_id.as_deref(),
            },
            execute: params.execute,
        };
        tools::modify::execute(&self.shared, &params.notebook_path, request).await
    }

    #[tool(description = "Run an existing code cell (addressed by position_index, execution_count or cell_id) and save its outputs, or install packages into the kernel's environment with uv pip by appending and running an install cell.")]
    async fn execute_notebook_code(
        &self,
        params: Parameters<ExecuteNotebookCodeParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let params = params.0;
        let address = CellAddress {
            position_index: position_index(params.position_index)?,
            execution_count: params.execution_count.as_ref(),
            cell_id: params.cell_id.as_deref(),
        };
        tools::execute::execute(
            &self.shared,
            &params.notebook_path,
            params.execution_type,
            address,
            params.package_names.as_deref(),
        )
        .await
    }

    #[tool(description = "Prepare a notebook for use: create it if missing (optionally with initial code cells), start a kernel session for it if none is running, and register the Jupyter server URL used for it by the other tools. Call this first.")]
    async fn setup_notebook(
        &self,
        params: Parameters<SetupNotebookParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let params = params.0;
        tools::setup::execute(
            &self.shared,
            &params.notebook_path,
            params.cells,
            params.server_url.as_deref(),
        )
        .await
    }
}

#[tool_handler]
impl rmcp::ServerHandler for NotebookServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "mcp-jupyter".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            instructions: Some(
                "Jupyter MCP server - view, edit and execute notebook cells on a running Jupyter server. Start with setup_notebook, and view a notebook before modifying it."
                    .into(),
            ),
        }
    }
}

/// CLI arguments for the MCP server.
#[cfg(feature = "http")]
#[derive(clap::Parser)]
#[command(name = "mcp-jupyter")]
#[command(about = "MCP server for Jupyter notebooks")]
struct Cli {
    /// Run in HTTP mode instead of stdio
    #[arg(long)]
    http: bool,

    /// Port to listen on in HTTP mode
    #[arg(long, default_value_t = DEFAULT_HTTP_PORT)]
    port: u16,

    /// Address to bind to in HTTP mode. Use 0.0.0.0 for all interfaces (unsafe without auth).
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,
}

#[cfg(feature = "http")]
const DEFAULT_HTTP_PORT: u16 = 8000;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr; stdout carries the stdio transport
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    tracing::info!("Default Jupyter server: {}", config.default_server_url);

    #[cfg(feature = "http")]
    {
        use clap::Parser;
        let cli = Cli::parse();

        if cli.http {
            return run_http_server(config, &cli.bind, cli.port).await;
        }
    }

    run_stdio_server(config).await
}

/// Run the server with STDIO transport (default mode).
async fn run_stdio_server(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let shared = SharedState::new(config)?;
    tracing::debug!(
        "REST timeout {:?}, execution timeout {:?}",
        shared.config().request_timeout,
        shared.config().execution_timeout
    );
    let server = NotebookServer::from_shared(shared);

    let service = server.serve(stdio()).await.inspect_err(|e| {
        tracing::error!("Error starting server: {}", e);
    })?;

    tracing::info!("Jupyter MCP server started (stdio)");
    service.waiting().await?;

    Ok(())
}

/// Run the server with HTTP transport.
#[cfg(feature = "http")]
async fn run_http_server(
    config: Config,
    bind: &str,
    port: u16,
) -> Result<(), Box<dyn std::error::Error>> {
    let shared = SharedState::new(config)?;

    // Every session gets a server over the same shared state.
    let service = StreamableHttpService::new(
        move || Ok(NotebookServer::from_shared(shared.clone())),
        LocalSessionManager::default().into(),
        Default::default(),
    );

    let router = axum::Router::new().nest_service("/mcp", service);

    let bind_addr: std::net::IpAddr = bind
        .parse()
        .map_err(|e| format!("Invalid bind address '{}': {}", bind, e))?;
    let addr = std::net::SocketAddr::from((bind_addr, port));

    if bind_addr.is_unspecified() {
        tracing::info!(
            "Binding to all interfaces ({}). Ensure a reverse proxy handles authentication.",
            bind
        );
    }

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("Failed to bind to {}:{} - {}", bind, port, e))?;

    tracing::info!("Jupyter MCP server started (HTTP) at http://{}/mcp", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM on Unix).
#[cfg(feature = "http")]
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, stopping server...");
}
