use clap::Args;
use courier_http::{HttpDispatcher, HttpRequestConfig};
use tracing::info;

use super::read_json;
use crate::config::CourierConfig;

#[derive(Args, Debug)]
pub struct RequestArgs {
    /// Request JSON (`method`, `url`, `headers`, `query`, `body`, `auth`,
    /// `timeout`), inline or @file path.
    #[arg(long)]
    pub request: String,
    /// Override `http.max_retries`.
    #[arg(long)]
    pub retries: Option<u32>,
}

pub async fn run(config: &CourierConfig, args: &RequestArgs) -> anyhow::Result<()> {
    let request: HttpRequestConfig = read_json(&args.request)?;
    let dispatcher =
        HttpDispatcher::new(config.http.dispatcher_settings(&config.executor.user_agent))?;
    let retries = args.retries.unwrap_or(config.http.max_retries);

    let result = dispatcher
        .execute_with_retry(
            &request,
            retries,
            config.http.base_delay(),
            config.http.multiplier,
        )
        .await?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    info!(
        status = ?result.status(),
        retries = ?result.result.retries,
        "request finished"
    );
    if !result.success() {
        std::process::exit(1);
    }
    Ok(())
}
