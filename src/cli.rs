use clap::{Parser, Subcommand};

use crate::capture::ImageFormat;
use crate::commands;
use crate::error::Result;

/// nodeshot - Capture a single page element as an image
#[derive(Parser)]
#[command(name = "nodeshot")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// CDP port or HTTP endpoint of the browser (e.g. 9222, http://127.0.0.1:9222)
    #[arg(long, env = "NODESHOT_CDP", global = true)]
    pub cdp: Option<String>,

    /// Directory screenshots are saved into
    #[arg(long, env = "NODESHOT_DOWNLOAD_DIR", global = true)]
    pub download_dir: Option<String>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Pick an element in the active tab with the pointer
    Pick {
        #[command(flatten)]
        output: OutputArgs,
    },

    /// Capture the first element matching a CSS selector
    Select {
        /// CSS selector (e.g., "#main", ".card")
        selector: String,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// List open tabs and whether they can be captured
    Pages,

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

/// Image options shared by the capture commands
#[derive(clap::Args, Debug, Clone, Default)]
pub struct OutputArgs {
    /// Image format: png or jpeg
    #[arg(short, long)]
    pub format: Option<ImageFormat>,

    /// JPEG quality in percent (0-100)
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..=100))]
    pub quality: Option<u8>,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,

    /// Show the configuration file path
    Path,
}

impl Cli {
    pub async fn run(&self) -> Result<()> {
        match &self.command {
            Commands::Pick { output } => commands::capture::pick(self, output).await,
            Commands::Select { selector, output } => {
                commands::capture::select(self, selector, output).await
            }
            Commands::Pages => commands::pages::run(self).await,
            Commands::Config { command } => commands::config::run(self, command).await,
        }
    }
}
