use pyenv_tools::tools::VenvCreator;
use pyenv_tools::{
    CancellationToken, CondaInstaller, CondaService, EnvToolError, EnvironmentApi, InstallerRegistry,
    JsonFileStateStore, MemoryStateStore, ModuleInstaller, PipInstaller, ProcessRunner, StateStore, StaticWorkspace,
    SystemConda, SystemEnvironmentApi, TokioProcessRunner, ToolContext, ToolRegistry, ToolServices,
    ToolsConfig, Workspace,
};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};

#[derive(Debug, Clone)]
struct WorkerArgs {
    config_path: Option<PathBuf>,
    workspace_folders: Vec<PathBuf>,
    state_dir: Option<PathBuf>,
    untrusted: bool,
}

impl WorkerArgs {
    fn from_args() -> Self {
        let args: Vec<String> = std::env::args().collect();
        let mut parsed = Self {
            config_path: std::env::var("PYENV_TOOLS_CONFIG").ok().map(PathBuf::from),
            workspace_folders: Vec::new(),
            state_dir: None,
            untrusted: false,
        };

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--config" => {
                    if let Some(v) = args.get(i + 1) {
                        parsed.config_path = Some(PathBuf::from(v));
                    }
                    i += 2;
                }
                "--workspace" => {
                    if let Some(v) = args.get(i + 1) {
                        parsed.workspace_folders.push(PathBuf::from(v));
                    }
                    i += 2;
                }
                "--state-dir" => {
                    if let Some(v) = args.get(i + 1) {
                        parsed.state_dir = Some(PathBuf::from(v));
                    }
                    i += 2;
                }
                "--untrusted" => {
                    parsed.untrusted = true;
                    i += 1;
                }
                _ => i += 1,
            }
        }
        parsed
    }

    /// File config, then environment, then command line
    fn into_config(self) -> anyhow::Result<ToolsConfig> {
        let mut config = match &self.config_path {
            Some(path) => ToolsConfig::from_file(path)?,
            None => ToolsConfig::default(),
        }
        .with_env_overrides();

        if !self.workspace_folders.is_empty() {
            config.workspace_folders = self.workspace_folders;
        }
        if self.state_dir.is_some() {
            config.state_dir = self.state_dir;
        }
        if self.untrusted {
            config.trusted = false;
        }
        Ok(config)
    }
}

fn state_store(path: Option<PathBuf>) -> Arc<dyn StateStore> {
    match path {
        Some(path) => Arc::new(JsonFileStateStore::new(path)),
        None => Arc::new(MemoryStateStore::new()),
    }
}

fn build_registry(config: ToolsConfig) -> ToolRegistry {
    let workspace: Arc<dyn Workspace> = Arc::new(StaticWorkspace::from_paths(
        &config.workspace_folders,
        config.trusted,
    ));
    let runner: Arc<dyn ProcessRunner> = Arc::new(TokioProcessRunner::new());
    let conda: Arc<dyn CondaService> = Arc::new(SystemConda::new());
    let api: Arc<dyn EnvironmentApi> = Arc::new(SystemEnvironmentApi::new(runner.clone()));
    let installers: Vec<Arc<dyn ModuleInstaller>> = vec![
        Arc::new(PipInstaller::new(runner.clone())),
        Arc::new(CondaInstaller::new(runner.clone(), conda.clone())),
    ];
    let installers = InstallerRegistry::new(installers);

    let context = Arc::new(ToolContext::new(ToolServices {
        workspace_state: state_store(config.workspace_state_file()),
        global_state: state_store(config.global_state_file()),
        config,
        workspace: workspace.clone(),
        api: Some(api),
        runner: runner.clone(),
        conda,
        installers,
    }));
    let creator = Arc::new(VenvCreator::new(runner, workspace));
    ToolRegistry::with_default_tools(context, creator)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "pyenv_tools_worker=info,pyenv_tools=info".to_string()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let config = WorkerArgs::from_args().into_config()?;
    tracing::info!(
        "pyenv-tools-worker starting (folders={:?}, state_dir={:?}, trusted={})",
        config.workspace_folders,
        config.state_dir,
        config.trusted
    );
    let registry = build_registry(config);

    let stdin = BufReader::new(io::stdin());
    let mut lines = stdin.lines();
    let mut stdout = io::stdout();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parsed: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("invalid json-rpc line: {} | err={}", line, e);
                continue;
            }
        };

        let response = handle_message(&registry, parsed).await;
        if let Some(resp) = response {
            let s = serde_json::to_string(&resp)?;
            stdout.write_all(s.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
    }

    Ok(())
}

async fn handle_message(registry: &ToolRegistry, msg: Value) -> Option<Value> {
    let method = msg.get("method").and_then(|m| m.as_str()).unwrap_or("");
    let id = msg.get("id").cloned();
    let params = msg.get("params").cloned().unwrap_or_else(|| json!({}));

    // Notifications have no id: ignore most, but allow "exit" to terminate.
    if id.is_none() {
        if method == "exit" {
            std::process::exit(0);
        }
        return None;
    }

    let result = match method {
        "initialize" => Ok(json!({
            "serverInfo": {
                "name": "pyenv-tools-worker",
                "version": env!("CARGO_PKG_VERSION")
            },
            "capabilities": { "tools": { "listChanged": false } }
        })),
        "tools/list" => Ok(json!({ "tools": tools_list(registry) })),
        "tools/call" => call_tool(registry, &params).await,
        "shutdown" => {
            std::process::exit(0);
        }
        _ => Err(json!({
            "code": -32601,
            "message": format!("Method not found: {}", method)
        })),
    };

    Some(match result {
        Ok(v) => json!({ "jsonrpc": "2.0", "result": v, "id": id }),
        Err(err_obj) => json!({ "jsonrpc": "2.0", "error": err_obj, "id": id }),
    })
}

fn tools_list(registry: &ToolRegistry) -> Vec<Value> {
    registry
        .tools()
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name(),
                "description": tool.description(),
                "inputSchema": tool.input_schema(),
            })
        })
        .collect()
}

async fn call_tool(registry: &ToolRegistry, params: &Value) -> std::result::Result<Value, Value> {
    let name = params.get("name").and_then(|v| v.as_str()).unwrap_or("");
    let args = params
        .get("arguments")
        .cloned()
        .unwrap_or_else(|| json!({}));

    let Some(tool) = registry.get(name) else {
        return Ok(json!({
            "content": [{ "type": "text", "text": format!("Unknown tool: {}", name) }],
            "isError": true
        }));
    };

    // The stdio shim has no cancel request; calls run to completion.
    let cancel = CancellationToken::new();
    match tool.invoke(args, &cancel).await {
        Ok(output) => Ok(json!({
            "content": [{ "type": "text", "text": output.text }],
            "isError": output.is_error
        })),
        Err(EnvToolError::Cancelled) => Err(json!({
            "code": -32800,
            "message": "Request cancelled"
        })),
        Err(e) => Err(json!({ "code": -32000, "message": e.to_string() })),
    }
}
