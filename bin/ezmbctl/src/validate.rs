//! ---
//! ezmb_section: "04-field-io"
//! ezmb_subsection: "binary"
//! ezmb_type: "source"
//! ezmb_scope: "code"
//! ezmb_description: "Port descriptor validation command."
//! ezmb_version: "v0.0.0-prealpha"
//! ezmb_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use ezmb_bus::Topics;
use ezmb_common::PortConfigFile;

#[derive(Debug, Args)]
pub struct ValidateArgs {
    #[arg(help = "Port descriptor JSON file")]
    path: PathBuf,

    #[arg(long, help = "Print the normalised descriptors as JSON")]
    json: bool,
}

pub fn run(args: ValidateArgs) -> Result<()> {
    let file = PortConfigFile::load(&args.path)
        .with_context(|| format!("{} is not a valid port descriptor file", args.path.display()))?;
    println!("{}", render(&file, args.json)?);
    Ok(())
}

fn render(file: &PortConfigFile, json: bool) -> Result<String> {
    if json {
        return Ok(serde_json::to_string_pretty(file)?);
    }
    let mut out = format!("{} port(s), {} skipped\n", file.ports.len(), file.skipped);
    for port in &file.ports {
        let topics = Topics::for_id(&port.uid);
        out.push_str(&format!(
            "{:<12} {:<20} {:<12} maxlen={} timeout={}ms mindelay={}ms\n  publishes {}\n  receives  {}\n",
            port.uid,
            port.device.display(),
            port.line,
            port.maxlen,
            port.timeout,
            port.mindelay,
            topics.publish,
            topics.subscribe,
        ));
    }
    Ok(out.trim_end().to_owned())
}
