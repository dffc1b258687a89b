pub mod dispatch;
pub mod notify;
pub mod request;
pub mod vault;

/// Read an argument that is either inline text or `@path` to a file.
pub fn read_arg(value: &str) -> anyhow::Result<String> {
    match value.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read {path}: {e}")),
        None => Ok(value.to_owned()),
    }
}

/// Parse an inline-or-`@path` argument as JSON.
pub fn read_json<T: serde::de::DeserializeOwned>(value: &str) -> anyhow::Result<T> {
    let text = read_arg(value)?;
    Ok(serde_json::from_str(&text)?)
}
