use std::sync::Arc;

use clap::Args;
use courier_core::{ActionPayload, ServiceCredential};
use courier_crypto::SecretVault;
use courier_executor::ActionExecutor;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{read_arg, read_json};
use crate::config::CourierConfig;

#[derive(Args, Debug)]
pub struct DispatchArgs {
    /// Action JSON (`{"type": ..., "config": {...}}`), inline or @file path.
    #[arg(long)]
    pub action: String,
    /// Raw event body, inline or @file path.
    #[arg(long, default_value = "{}")]
    pub payload: String,
    /// Encrypted service credential JSON (`{"secret": ..., "meta": {...}}`),
    /// inline or @file path.
    #[arg(long)]
    pub credential: Option<String>,
    /// Headers recorded on the payload (key=value).
    #[arg(long = "header", value_parser = parse_key_val)]
    pub headers: Vec<(String, String)>,
}

#[derive(Debug, Deserialize)]
struct ActionFile {
    #[serde(rename = "type")]
    action_type: String,
    #[serde(default)]
    config: Value,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no `=` found in `{s}`"))?;
    Ok((key.to_owned(), value.to_owned()))
}

pub async fn run(
    config: &CourierConfig,
    vault: SecretVault,
    args: &DispatchArgs,
) -> anyhow::Result<()> {
    let action_file: ActionFile = read_json(&args.action)?;
    let payload = ActionPayload::new(read_arg(&args.payload)?)
        .with_headers(args.headers.iter().cloned().collect())
        .with_user_agent(concat!("courier-cli/", env!("CARGO_PKG_VERSION")));
    let credential = args
        .credential
        .as_deref()
        .map(read_json::<ServiceCredential>)
        .transpose()?;

    let amqp = Arc::new(config.amqp.pool());
    let mqtt = Arc::new(config.mqtt.pool());
    let executor = ActionExecutor::new(config.executor.clone(), Arc::new(vault))?
        .with_amqp_pool(Arc::clone(&amqp))
        .with_mqtt_pool(Arc::clone(&mqtt));
    let action = executor.build_action(&action_file.action_type, action_file.config)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    let signal = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling dispatch");
            on_signal.cancel();
        }
    });

    let result = executor
        .execute_action_cancellable(&action, &payload, credential.as_ref(), &cancel)
        .await;
    signal.abort();
    amqp.shutdown().await;
    mqtt.shutdown().await;

    println!("{}", serde_json::to_string_pretty(&result)?);
    info!(
        action_type = action.type_name(),
        success = result.success,
        duration_ms = result.duration_ms,
        "dispatch finished"
    );
    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_value_pairs_split_on_first_equals() {
        assert_eq!(
            parse_key_val("X-Trace=a=b").unwrap(),
            ("X-Trace".to_owned(), "a=b".to_owned())
        );
        assert!(parse_key_val("novalue").is_err());
    }

    #[test]
    fn action_file_config_is_optional() {
        let file: ActionFile = serde_json::from_str(r#"{"type": "STORE"}"#).unwrap();
        assert_eq!(file.action_type, "STORE");
        assert!(file.config.is_null());
    }
}
