use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use prettytable::{Table, row};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use visualsnoop_core::config::{Config, ConfigFile, update_config_file};
use visualsnoop_core::{CollectionClient, ImageSource, Timeout};

#[derive(Parser)]
#[command(name = "visualsnoop", version)]
#[command(about = "CLI for the VisualSnoop image search API")]
struct Cli {
    /// Override the API endpoint.
    #[arg(long, global = true)]
    endpoint: Option<String>,
    /// Per-request timeout, e.g. `30s` or `1m`.
    #[arg(long, global = true, value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,
    /// Log requests to stderr.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show or change stored configuration
    Config {
        #[command(subcommand)]
        cmd: ConfigCommands,
    },
    /// Collection bound to the configured keys
    Collection {
        #[command(subcommand)]
        cmd: CollectionCommands,
    },
    /// Manage indexed images
    Images {
        #[command(subcommand)]
        cmd: ImagesCommands,
    },
    /// Visual search
    Search {
        #[command(subcommand)]
        cmd: SearchCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show effective config (redacts the secret key)
    Doctor,
    /// Persist settings to the config file. `--endpoint` and `--timeout`
    /// are stored too when given.
    Set {
        #[arg(long)]
        public_key: Option<String>,
        #[arg(long)]
        secret_key: Option<String>,
        #[arg(long)]
        http_proxy: Option<String>,
        #[arg(long)]
        https_proxy: Option<String>,
        #[arg(long)]
        max_retries: Option<u32>,
    },
}

#[derive(Subcommand)]
enum CollectionCommands {
    /// Show collection id, name and owner
    Info {
        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },
}

#[derive(Subcommand)]
enum ImagesCommands {
    /// Show metadata for an indexed image
    Get {
        #[arg(long)]
        id: String,
        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },
    /// Index an image file
    Add {
        #[arg(long)]
        path: PathBuf,
        /// Image id; generated by the service when omitted.
        #[arg(long)]
        id: Option<String>,
        /// Overwrite an existing image with the same id.
        #[arg(long, requires = "id")]
        update_existing: bool,
        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },
    /// Remove an image from the collection
    Delete {
        #[arg(long)]
        id: String,
        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },
    /// List images in insertion order
    List {
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        count: Option<u32>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },
}

#[derive(Subcommand)]
enum SearchCommands {
    /// Search using an image already in the collection
    ById {
        #[arg(long)]
        id: String,
        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },
    /// Search using a local image file
    Image {
        #[arg(long)]
        path: PathBuf,
        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Table,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let timeout = cli.timeout.map(Timeout::Total);

    match cli.command {
        Commands::Config { cmd } => match cmd {
            ConfigCommands::Doctor => {
                let config = load_config(cli.endpoint)?;
                println!("{}", serde_json::to_string_pretty(&config.doctor())?);
            }
            ConfigCommands::Set {
                public_key,
                secret_key,
                http_proxy,
                https_proxy,
                max_retries,
            } => {
                let path = update_config_file(ConfigFile {
                    endpoint: cli.endpoint,
                    public_key,
                    secret_key,
                    http_proxy,
                    https_proxy,
                    max_retries,
                    timeout: cli
                        .timeout
                        .map(|d| humantime::format_duration(d).to_string()),
                })?;
                println!("Saved {}", path.display());
            }
        },
        Commands::Collection { cmd } => match cmd {
            CollectionCommands::Info { format } => {
                let client = CollectionClient::from_config(&load_config(cli.endpoint)?).await?;
                emit_json_or_table(format, client.info(), |info| {
                    let mut table = Table::new();
                    table.add_row(row!["collection_id", info.collection_id]);
                    table.add_row(row!["collection_name", info.collection_name]);
                    table.add_row(row!["user", info.user]);
                    table.add_row(row!["endpoint", client.endpoint()]);
                    table
                })?;
            }
        },
        Commands::Images { cmd } => {
            let client = CollectionClient::from_config(&load_config(cli.endpoint)?).await?;
            match cmd {
                ImagesCommands::Get { id, format } => {
                    let resp = client.get_image(&id, timeout).await?;
                    emit_json_or_table(format, &resp, value_table)?;
                }
                ImagesCommands::Add {
                    path,
                    id,
                    update_existing,
                    format,
                } => {
                    let resp = client
                        .add_image(
                            ImageSource::from_path(path),
                            id.as_deref(),
                            update_existing,
                            timeout,
                        )
                        .await?;
                    emit_json_or_table(format, &resp, value_table)?;
                }
                ImagesCommands::Delete { id, format } => {
                    let resp = client.delete_image(&id, timeout).await?;
                    emit_json_or_table(format, &resp, value_table)?;
                }
                ImagesCommands::List {
                    start,
                    count,
                    format,
                } => {
                    let resp = client
                        .get_images(start.as_deref(), count, timeout)
                        .await?;
                    emit_json_or_table(format, &resp, value_table)?;
                }
            }
        }
        Commands::Search { cmd } => {
            let client = CollectionClient::from_config(&load_config(cli.endpoint)?).await?;
            match cmd {
                SearchCommands::ById { id, format } => {
                    let resp = client.search_images_by_id(&id, timeout).await?;
                    emit_json_or_table(format, &resp, value_table)?;
                }
                SearchCommands::Image { path, format } => {
                    let resp = client
                        .search_images(ImageSource::from_path(path), timeout)
                        .await?;
                    emit_json_or_table(format, &resp, value_table)?;
                }
            }
        }
    }

    Ok(())
}

/// Effective config, with `--endpoint` taking precedence.
fn load_config(endpoint: Option<String>) -> Result<Config> {
    let mut config = Config::load()?;
    if let Some(endpoint) = endpoint {
        config.endpoint = endpoint;
    }
    Ok(config)
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("visualsnoop_core=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn emit_json_or_table<T: Serialize + ?Sized>(
    format: OutputFormat,
    value: &T,
    table_builder: impl FnOnce(&T) -> Table,
) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        OutputFormat::Table => {
            table_builder(value).printstd();
        }
    }
    Ok(())
}

/// One row per top-level field; arrays get one row per element.
fn value_table(value: &Value) -> Table {
    let mut table = Table::new();
    match value {
        Value::Object(map) => {
            for (key, field) in map {
                match field {
                    Value::Array(items) => {
                        for (idx, item) in items.iter().enumerate() {
                            table.add_row(row![format!("{key}[{idx}]"), cell_text(item)]);
                        }
                    }
                    other => {
                        table.add_row(row![key, cell_text(other)]);
                    }
                }
            }
        }
        Value::Array(items) => {
            for (idx, item) in items.iter().enumerate() {
                table.add_row(row![idx, cell_text(item)]);
            }
        }
        other => {
            table.add_row(row!["value", cell_text(other)]);
        }
    }
    table
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}
