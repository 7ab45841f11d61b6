/*!
 * Subscription Helper
 *
 * One-shot administrative tool: (re)attach this app to the configured
 * page's `feed` field so Meta starts delivering webhooks.
 *
 * Usage:
 *   subscribe            # POST subscribed_apps
 *   subscribe --verify   # also read the subscription list back
 *
 * Exit code 0 on success, 1 on failure.
 */

use anyhow::{Context, Result};
use tracing::info;

use pagerelay_worker::{GraphClient, GraphSettings};

#[tokio::main]
async fn main() -> Result<()> {
    pagerelay_common::init_tracing();

    let verify = std::env::args().any(|arg| arg == "--verify");

    let settings = GraphSettings::from_env().context("Failed to load configuration")?;
    let client = GraphClient::new(&settings).context("Failed to create Graph client")?;

    info!(page_id = %settings.page_id, "Subscribing app to the page feed...");
    client
        .subscribe_app()
        .await
        .context("Subscription request failed")?;
    info!("✅ Subscribed to the page feed");

    if verify {
        let subscriptions = client
            .list_subscriptions()
            .await
            .context("Failed to read back subscriptions")?;
        println!("{}", serde_json::to_string_pretty(&subscriptions)?);
    }

    Ok(())
}
