use anyhow::Result;
use guestbook::cli;

#[tokio::main]
async fn main() -> Result<()> {
    // Dropping the guard flushes the error log and exports pending spans.
    let (action, _telemetry) = cli::start()?;

    action.execute().await?;

    Ok(())
}
