use anyhow::Result;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use drive_sync::auth::Authenticator;
use drive_sync::cli;
use drive_sync::drive::DriveClient;
use drive_sync::sync::Uploader;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize the logger
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    // Parse command line arguments
    let args = cli::parse_args();

    // Process arguments into a sync configuration
    let config = match cli::process_sync_args(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Error processing arguments: {}", e);
            return Err(e);
        }
    };

    info!("Upload directory: {}", config.dir.display());
    info!("File pattern: {}", config.pattern);
    info!("Recursive: {}", if config.recursive { "yes" } else { "no" });
    info!(
        "MD5 checking: {}",
        if config.check_md5 { "enabled" } else { "disabled" }
    );
    info!("Force upload: {}", if config.force { "yes" } else { "no" });
    if let Some(folder_id) = &config.folder_id {
        info!("Target folder ID: {}", folder_id);
    }

    // Obtain an authenticated Drive client
    let authenticator = Authenticator::from_files(&config.credentials, &config.token)?;
    let token = authenticator.access_token().await?;
    let client = DriveClient::new(token)?;

    info!("Starting Drive sync operation");

    // Run the sync operation
    let mut uploader = Uploader::new(client, config.force, config.check_md5);
    match uploader
        .upload_directory(
            &config.dir,
            config.folder_id.as_deref(),
            &config.pattern,
            config.recursive,
        )
        .await
    {
        Ok(summary) => {
            summary.report();
            info!("Sync completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Sync failed: {}", e);
            Err(e)
        }
    }
}
