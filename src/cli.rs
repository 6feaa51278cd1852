use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use globset::Glob;
use std::path::PathBuf;

/// Command line arguments for the Drive sync tool
///
/// Every option can also be supplied through its environment variable, which
/// is the usual way to run the tool in cron jobs and containers.
#[derive(Parser, Debug, Clone)]
#[clap(
    name = "drive-sync",
    about = "A Google Drive directory uploader with duplicate detection"
)]
pub struct Args {
    /// Local directory to upload
    #[clap(long, env = "UPLOAD_DIR", default_value = "./uploads")]
    pub dir: PathBuf,

    /// Target Drive folder id (uploads go to the Drive root when omitted)
    #[clap(long, env = "DRIVE_FOLDER_ID")]
    pub folder_id: Option<String>,

    /// Glob pattern applied to file names
    #[clap(long, env = "FILE_PATTERN", default_value = "*")]
    pub pattern: String,

    /// Upload even when a remote copy already exists
    #[clap(long, env = "FORCE_UPLOAD", default_value_t = false, action = ArgAction::Set)]
    pub force: bool,

    /// Compare MD5 checksums when deciding whether a file is a duplicate
    #[clap(long, env = "CHECK_MD5", default_value_t = true, action = ArgAction::Set)]
    pub check_md5: bool,

    /// Descend into subdirectories, mirroring them as Drive folders
    #[clap(long, env = "RECURSIVE", default_value_t = true, action = ArgAction::Set)]
    pub recursive: bool,

    /// OAuth client secret file
    #[clap(long, env = "CREDENTIALS_FILE", default_value = "credentials.json")]
    pub credentials: PathBuf,

    /// Persisted OAuth token file
    #[clap(long, env = "TOKEN_FILE", default_value = "token.json")]
    pub token: PathBuf,
}

/// Runtime configuration for a sync run
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub dir: PathBuf,
    pub folder_id: Option<String>,
    pub pattern: String,
    pub force: bool,
    pub check_md5: bool,
    pub recursive: bool,
    pub credentials: PathBuf,
    pub token: PathBuf,
}

/// Parse command line arguments
pub fn parse_args() -> Args {
    Args::parse()
}

/// Process command line arguments into a SyncConfig
pub fn process_sync_args(args: &Args) -> Result<SyncConfig> {
    // Reject a broken glob before any remote call is made
    Glob::new(&args.pattern)
        .with_context(|| format!("Invalid file pattern: {}", args.pattern))?;

    Ok(SyncConfig {
        dir: args.dir.clone(),
        folder_id: args.folder_id.clone(),
        pattern: args.pattern.clone(),
        force: args.force,
        check_md5: args.check_md5,
        recursive: args.recursive,
        credentials: args.credentials.clone(),
        token: args.token.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let args = Args::try_parse_from(["drive-sync"]).unwrap();
        let config = process_sync_args(&args).unwrap();

        assert_eq!(config.pattern, "*");
        assert!(config.folder_id.is_none());
        assert!(!config.force);
        assert!(config.check_md5);
        assert!(config.recursive);
        assert_eq!(config.credentials, PathBuf::from("credentials.json"));
        assert_eq!(config.token, PathBuf::from("token.json"));
    }

    #[test]
    fn boolean_flags_accept_explicit_values() {
        let args = Args::try_parse_from([
            "drive-sync",
            "--force",
            "true",
            "--check-md5",
            "false",
            "--recursive",
            "false",
        ])
        .unwrap();

        assert!(args.force);
        assert!(!args.check_md5);
        assert!(!args.recursive);
    }

    #[test]
    fn target_folder_and_pattern_are_forwarded() {
        let args = Args::try_parse_from([
            "drive-sync",
            "--dir",
            "/data/out",
            "--folder-id",
            "folder-123",
            "--pattern",
            "*.csv",
        ])
        .unwrap();
        let config = process_sync_args(&args).unwrap();

        assert_eq!(config.dir, PathBuf::from("/data/out"));
        assert_eq!(config.folder_id.as_deref(), Some("folder-123"));
        assert_eq!(config.pattern, "*.csv");
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let args = Args::try_parse_from(["drive-sync", "--pattern", "a[unclosed"]).unwrap();
        assert!(process_sync_args(&args).is_err());
    }
}
