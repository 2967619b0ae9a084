pub mod capture;
pub mod config;
pub mod pages;

use crate::cdp::CdpEndpoint;
use crate::cli::Cli;
use crate::config::Config;
use crate::error::Result;

/// Load the configuration with command-line overrides applied.
pub(crate) fn effective_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load()?;
    if let Some(dir) = &cli.download_dir {
        config.output.download_dir = Some(dir.clone());
    }
    if let Some(cdp) = &cli.cdp {
        config.browser.cdp_url = Some(cdp.clone());
    }
    Ok(config)
}

pub(crate) fn endpoint(config: &Config) -> Result<CdpEndpoint> {
    match config.browser.cdp_url.as_deref() {
        Some(url) if !url.trim().is_empty() => CdpEndpoint::parse(url),
        _ => Ok(CdpEndpoint::from_port(config.browser.cdp_port)),
    }
}
