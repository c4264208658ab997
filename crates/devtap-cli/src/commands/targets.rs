use anyhow::Result;

use crate::commands::{endpoint, load_config};
use crate::EndpointArgs;

/// Run the `devtap targets` command.
pub async fn run(args: &EndpointArgs, json: bool) -> Result<()> {
    let config = load_config(args)?;
    let targets = endpoint(args, &config).list_targets().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&targets)?);
        return Ok(());
    }

    if targets.is_empty() {
        println!("No targets.");
        return Ok(());
    }
    for target in &targets {
        let attached = if target.web_socket_debugger_url.is_some() {
            ""
        } else {
            "  (attached)"
        };
        println!("{:<34} {:<16} {}{attached}", target.id, target.target_type, target.title);
        println!("{:<34} {:<16} {}", "", "", target.url);
    }
    Ok(())
}
