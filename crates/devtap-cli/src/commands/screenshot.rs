use std::path::Path;

use anyhow::{Context, Result};

use devtap_client::api::ScreenshotFormat;
use devtap_client::Tab;

use crate::commands::attach;
use crate::{EndpointArgs, ImageFormat};

impl From<ImageFormat> for ScreenshotFormat {
    fn from(format: ImageFormat) -> Self {
        match format {
            ImageFormat::Png => ScreenshotFormat::Png,
            ImageFormat::Jpeg => ScreenshotFormat::Jpeg,
            ImageFormat::Webp => ScreenshotFormat::Webp,
        }
    }
}

/// Run the `devtap screenshot` command.
pub async fn run(
    args: &EndpointArgs,
    path: &Path,
    format: ImageFormat,
    quality: Option<u8>,
) -> Result<()> {
    if let Some(q) = quality {
        anyhow::ensure!(q <= 100, "quality must be between 0 and 100, got {q}");
    }

    let conn = attach(args).await?;
    let tab = Tab::new(conn.clone());

    let bytes = tab
        .capture_screenshot(format.into(), quality)
        .await
        .context("Page.captureScreenshot failed")?;
    std::fs::write(path, &bytes)
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("Wrote {} bytes to {}", bytes.len(), path.display());

    conn.close().await?;
    Ok(())
}
