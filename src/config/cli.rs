use crate::config::toml_config::LibraryConfig;
use crate::utils::error::Result;
use clap::Parser;
use uuid::Uuid;

#[derive(Debug, Clone, Parser)]
#[command(name = "library-loans")]
#[command(about = "Borrow books transactionally and watch the change feed")]
pub struct CliConfig {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    pub config: Option<String>,

    #[arg(long, default_value = "550e8400-e29b-41d4-a716-446655440000")]
    pub member: Uuid,

    #[arg(long, default_value = "7ca7b810-9dad-11d1-80b4-00c04fd430c8")]
    pub book: Uuid,

    /// Copies of the book seeded into the store
    #[arg(long, default_value = "5")]
    pub stock: u32,

    /// Borrow calls issued concurrently
    #[arg(long, default_value = "1")]
    pub borrows: usize,

    /// Override borrow.max_retries from the config
    #[arg(long)]
    pub max_retries: Option<u32>,

    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,
}

impl CliConfig {
    /// The file config (or defaults) with command-line overrides applied.
    pub fn load_config(&self) -> Result<LibraryConfig> {
        let mut config = match &self.config {
            Some(path) => LibraryConfig::from_file(path)?,
            None => LibraryConfig::default(),
        };
        if let Some(max_retries) = self.max_retries {
            config.borrow.max_retries = max_retries;
        }
        Ok(config)
    }
}
