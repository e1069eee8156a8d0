use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};

use cairn_core::cas::{self, BlockManager, ObjectId, ObjectManager};
use cairn_core::commands::verify;
use cairn_core::fs::LocalDirectory;
use cairn_core::ignorefs::{self, FilesPolicy, FilesPolicyMap, OnIgnore};
use cairn_core::storage::{self, BlockStore, LocalBackend};
use cairn_core::vault::{Config, Credentials, Format as VaultFormat, MasterKey, Vault};

const DEFAULT_CONFIG_PATH: &str = "cairn.json";
const DEFAULT_DOT_IGNORE_FILE: &str = ".cairnignore";
const LATEST_ROOT_ITEM: &str = "latest";

type CliError = Box<dyn std::error::Error>;

#[derive(Parser)]
#[command(
    name = "cairn",
    version,
    about = "Content-addressed, deduplicated, encrypted backups",
    after_help = "\
Configuration file lookup order:
  1. --config <path>             (explicit flag)
  2. $CAIRN_CONFIG               (environment variable)
  3. ./cairn.json                (working directory)

Environment variables:
  CAIRN_CONFIG       Path to the vault connection file
  CAIRN_PASSPHRASE   Vault passphrase (skips interactive prompt)"
)]
struct Cli {
    /// Path to the vault connection file
    #[arg(short, long)]
    config: Option<String>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a vault and its repository
    Init {
        /// Directory for the vault storage
        #[arg(long)]
        vault: String,

        /// Directory for a dedicated repository storage; the vault and
        /// repository share one store when omitted
        #[arg(long)]
        repo: Option<String>,

        /// Encryption algorithm (none, aes-128, aes-192, aes-256)
        #[arg(long, default_value = "aes-256")]
        encryption: String,
    },

    /// Upload a directory tree, reusing the previous snapshot
    Backup {
        /// Directory to back up
        path: String,
    },

    /// Verify the contents of a stored object
    Verify {
        /// Object identifier, or a vault item name holding one
        path: String,

        /// Recursive verification of directories
        #[arg(short, long)]
        recursive: bool,

        /// Maximum number of errors before stopping (0 = stop on first)
        #[arg(long, default_value = "0")]
        max_errors: usize,
    },

    /// Operate on vault items
    Item {
        #[command(subcommand)]
        command: ItemCommand,
    },
}

#[derive(Subcommand)]
enum ItemCommand {
    /// Store a file's contents under a vault item name
    Put { id: String, file: String },

    /// Print a vault item's contents to stdout
    Get { id: String },

    /// List vault item names matching a prefix
    List {
        #[arg(default_value = "")]
        prefix: String,
    },

    /// Delete a vault item
    Remove { id: String },
}

fn main() {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = resolve_config_path(cli.config.as_deref());

    let result = match cli.command {
        Commands::Init {
            ref vault,
            ref repo,
            ref encryption,
        } => run_init(&config_path, vault, repo.as_deref(), encryption),
        Commands::Backup { ref path } => run_backup(&config_path, path),
        Commands::Verify {
            ref path,
            recursive,
            max_errors,
        } => run_verify(&config_path, path, recursive, max_errors),
        Commands::Item { ref command } => run_item(&config_path, command),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn resolve_config_path(flag: Option<&str>) -> PathBuf {
    if let Some(path) = flag {
        return PathBuf::from(path);
    }
    if let Ok(path) = std::env::var("CAIRN_CONFIG") {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }
    PathBuf::from(DEFAULT_CONFIG_PATH)
}

fn get_passphrase(confirm: bool) -> Result<String, CliError> {
    if let Ok(pass) = std::env::var("CAIRN_PASSPHRASE") {
        if !pass.is_empty() {
            return Ok(pass);
        }
    }

    let pass = rpassword::prompt_password("Enter passphrase: ")?;
    if confirm {
        let again = rpassword::prompt_password("Confirm passphrase: ")?;
        if pass != again {
            return Err("passphrases do not match".into());
        }
    }
    Ok(pass)
}

fn run_init(
    config_path: &Path,
    vault_dir: &str,
    repo_dir: Option<&str>,
    encryption: &str,
) -> Result<(), CliError> {
    if config_path.exists() {
        return Err(format!("config file already exists: {}", config_path.display()).into());
    }

    let encryption = encryption.parse::<cairn_core::vault::Encryption>()?;
    let passphrase = get_passphrase(true)?;

    let vault_storage: Arc<dyn BlockStore> = Arc::new(LocalBackend::new(vault_dir)?);
    let repo_storage: Option<Arc<dyn BlockStore>> = match repo_dir {
        Some(dir) => Some(Arc::new(LocalBackend::new(dir)?)),
        None => None,
    };

    let vault = Vault::create(
        vault_storage,
        &VaultFormat::new(encryption, cairn_core::vault::Checksum::HmacSha256),
        &Credentials::Passphrase(passphrase),
        repo_storage,
        &cas::Format::default(),
    )?;

    let config = vault.config()?;
    std::fs::write(config_path, serde_json::to_vec_pretty(&config)?)?;

    println!("Vault initialized at: {vault_dir}");
    match repo_dir {
        Some(dir) => println!("Repository at: {dir}"),
        None => println!("Repository colocated with the vault"),
    }
    println!("Connection config written to: {}", config_path.display());
    Ok(())
}

fn open_vault(config_path: &Path) -> Result<Vault, CliError> {
    let config_bytes = std::fs::read(config_path).map_err(|e| {
        format!(
            "cannot read config {}: {e}. Run `cairn init` first.",
            config_path.display()
        )
    })?;
    let config: Config = serde_json::from_slice(&config_bytes)?;

    let storage = storage::connect(&config.connection)?;
    let creds = Credentials::Key(MasterKey::from_bytes(&config.key)?);
    Ok(Vault::open(storage, &creds)?)
}

fn repository_manager(vault: &Vault) -> Result<Arc<dyn ObjectManager>, CliError> {
    vault.repo_config.format.validate()?;
    let store = match &vault.repo_config.connection {
        Some(connection) => storage::connect(connection)?,
        None => vault.storage(),
    };
    Ok(Arc::new(BlockManager::new(store)))
}

fn run_backup(config_path: &Path, source: &str) -> Result<(), CliError> {
    let vault = open_vault(config_path)?;
    let manager = repository_manager(&vault)?;

    let previous = match vault.get(LATEST_ROOT_ITEM) {
        Ok(bytes) => ObjectId::from(String::from_utf8(bytes)?.as_str()),
        Err(cairn_core::error::CairnError::ItemNotFound(_)) => ObjectId::NULL,
        Err(e) => return Err(e.into()),
    };

    let mut policies = FilesPolicyMap::new();
    policies.insert(
        ".".to_string(),
        FilesPolicy {
            dot_ignore_files: vec![DEFAULT_DOT_IGNORE_FILE.to_string()],
            ..FilesPolicy::default()
        },
    );
    let on_ignore: OnIgnore = Arc::new(|path, _metadata| {
        tracing::info!(path, "ignored");
    });

    let root = ignorefs::wrap(
        Arc::new(LocalDirectory::new(source)),
        Arc::new(policies),
        vec![on_ignore],
    );

    let uploader = cairn_core::upload::Uploader::new(manager);
    let root_id = uploader.upload_dir(root.as_ref(), ".", &previous)?;

    vault.put(LATEST_ROOT_ITEM, root_id.as_str().as_bytes())?;

    if root_id == previous {
        println!("No changes since previous snapshot");
    }
    println!("Snapshot root: {root_id}");
    Ok(())
}

fn resolve_object_id(vault: &Vault, path: &str) -> Result<ObjectId, CliError> {
    // A raw content identifier starts with a block-name prefix; anything
    // else is treated as a vault item holding one.
    if path.starts_with(cairn_core::upload::DIRECTORY_BLOCK_PREFIX)
        || path.starts_with(cairn_core::upload::FILE_BLOCK_PREFIX)
    {
        return Ok(ObjectId::from(path));
    }
    let bytes = vault.get(path)?;
    Ok(ObjectId::from(String::from_utf8(bytes)?.as_str()))
}

fn run_verify(
    config_path: &Path,
    path: &str,
    recursive: bool,
    max_errors: usize,
) -> Result<(), CliError> {
    let vault = open_vault(config_path)?;
    let manager = repository_manager(&vault)?;
    let root = resolve_object_id(&vault, path)?;

    let result = verify::run(
        manager.as_ref(),
        &root,
        &verify::VerifyOptions {
            recursive,
            max_errors,
        },
    )?;

    if result.errors.is_empty() {
        println!(
            "Verified {} objects, no errors",
            result.objects_verified
        );
        return Ok(());
    }

    if result.errors.len() == 1 {
        let issue = &result.errors[0];
        return Err(format!("error validating '{}': {}", issue.path, issue.message).into());
    }

    for (i, issue) in result.errors.iter().enumerate() {
        eprintln!("  {i:<3}: error validating '{}': {}", issue.path, issue.message);
    }
    Err(format!("encountered {} errors", result.errors.len()).into())
}

fn run_item(config_path: &Path, command: &ItemCommand) -> Result<(), CliError> {
    let vault = open_vault(config_path)?;

    match command {
        ItemCommand::Put { id, file } => {
            let content = std::fs::read(file)?;
            vault.put(id, &content)?;
        }
        ItemCommand::Get { id } => {
            let content = vault.get(id)?;
            use std::io::Write;
            std::io::stdout().write_all(&content)?;
        }
        ItemCommand::List { prefix } => {
            for item in vault.list(prefix)? {
                println!("{item}");
            }
        }
        ItemCommand::Remove { id } => {
            vault.remove(id)?;
        }
    }
    Ok(())
}
