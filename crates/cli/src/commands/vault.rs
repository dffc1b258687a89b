use std::io::Read;

use anyhow::Context;
use courier_crypto::{ExposeSecret, SecretVault};
use zeroize::Zeroize;

fn read_stdin() -> anyhow::Result<String> {
    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("failed to read stdin")?;
    Ok(input)
}

fn ensure_configured(vault: &SecretVault) -> anyhow::Result<()> {
    match vault.configuration_error() {
        Some(reason) => anyhow::bail!("master key unavailable: {reason}"),
        None => Ok(()),
    }
}

pub fn encrypt(vault: &SecretVault) -> anyhow::Result<()> {
    ensure_configured(vault)?;
    let mut plaintext = read_stdin()?;
    let encrypted = vault.encrypt(plaintext.trim_end_matches(['\r', '\n']));
    plaintext.zeroize();
    println!("{}", encrypted?);
    Ok(())
}

pub fn decrypt(vault: &SecretVault) -> anyhow::Result<()> {
    ensure_configured(vault)?;
    let envelope = read_stdin()?;
    let secret = vault.decrypt(envelope.trim())?;
    println!("{}", secret.expose_secret());
    Ok(())
}

pub fn check_key(vault: &SecretVault, env: &str) -> anyhow::Result<()> {
    ensure_configured(vault).with_context(|| format!("check {env}"))?;
    // Round-trip a probe value.
    let probe = vault.encrypt("courier")?;
    let back = vault.decrypt(&probe)?;
    anyhow::ensure!(back.expose_secret() == "courier", "master key round-trip failed");
    println!("{env}: master key is valid");
    Ok(())
}
