pub mod eval;
pub mod screenshot;
pub mod targets;
pub mod watch;

use anyhow::{anyhow, Context, Result};

use devtap_client::{discovery, BrowserEndpoint, ClientConfig, ConfigLoader, Connection};

use crate::EndpointArgs;

/// Load the layered configuration, adding `--config` on top when given.
pub fn load_config(args: &EndpointArgs) -> Result<ClientConfig> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.with_file(path.clone());
    }
    loader.load().context("failed to load configuration")
}

pub fn endpoint(args: &EndpointArgs, config: &ClientConfig) -> BrowserEndpoint {
    BrowserEndpoint::new(args.host.clone(), args.port).with_config(config)
}

/// Find the requested page target and open a connection to it.
pub async fn attach(args: &EndpointArgs) -> Result<Connection> {
    let config = load_config(args)?;
    let targets = endpoint(args, &config)
        .list_targets()
        .await
        .context("is the browser running with --remote-debugging-port?")?;

    let needle = args.target.as_deref().unwrap_or("");
    let target = discovery::find_target(&targets, needle)
        .ok_or_else(|| anyhow!("no page target with a URL containing {needle:?}"))?;
    let url = target
        .web_socket_debugger_url
        .as_deref()
        .ok_or_else(|| anyhow!("target {} is already attached to another client", target.id))?;

    tracing::info!(target_id = %target.id, title = %target.title, "attaching to target");
    Connection::connect_with_config(url, config)
        .await
        .with_context(|| format!("failed to attach to {}", target.url))
}
