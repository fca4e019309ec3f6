use std::env;

use anyhow::{bail, Result};
use reqwest::Url;

/// Container probe, exits nonzero when the service is unreachable or unhealthy.
fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    let url = if args.len() < 2 {
        Url::parse("http://127.0.0.1:8080/health")?
    } else {
        Url::parse(&args[1])?
    };

    let body = reqwest::blocking::get(url)?;
    if !body.status().is_success() {
        bail!("Request failed with status {}", body.status())
    }

    Ok(())
}
