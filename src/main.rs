/// Aurora blobd - ATProto blob cache
///
/// Serves verified blobs from AT Protocol repositories out of a local
/// content-addressed cache.
use aurora_blobd::{config::ServerConfig, context::AppContext, error::BlobResult, server};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> BlobResult<()> {
    // Load configuration
    let config = ServerConfig::from_env()?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_new(&config.logging.level)
                .unwrap_or_else(|_| "aurora_blobd=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Print banner
    print_banner();

    // Create application context
    let ctx = AppContext::new(config).await?;

    // Start server
    server::serve(ctx).await?;

    Ok(())
}

fn print_banner() {
    println!(
        r#"
    ___                                   __    __      __    __
   /   | __  ___________  _________ _    / /_  / /___  / /_  / /___/ /
  / /| |/ / / / ___/ __ \/ ___/ __ `/   / __ \/ / __ \/ __ \/ / __  /
 / ___ / /_/ / /  / /_/ / /  / /_/ /   / /_/ / / /_/ / /_/ / / /_/ /
/_/  |_\__,_/_/   \____/_/   \__,_/   /_.___/_/\____/_.___/_/\__,_/

        ATProto Blob Cache v{}
        "#,
        env!("CARGO_PKG_VERSION")
    );
}
