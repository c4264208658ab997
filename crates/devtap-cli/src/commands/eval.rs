use anyhow::{Context, Result};
use serde_json::Value;

use devtap_client::Tab;

use crate::commands::attach;
use crate::EndpointArgs;

/// Run the `devtap eval` command.
pub async fn run(args: &EndpointArgs, expression: &str) -> Result<()> {
    let conn = attach(args).await?;
    let tab = Tab::new(conn.clone());

    let value = tab
        .evaluate_value(expression)
        .await
        .context("evaluation failed")?;
    match value {
        Value::String(s) => println!("{s}"),
        other => println!("{}", serde_json::to_string_pretty(&other)?),
    }

    conn.close().await?;
    Ok(())
}
