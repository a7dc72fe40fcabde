//! `keyward` exchanges a password for a short-lived SSH user certificate.

mod client;
mod keys;

use std::io::{self, BufRead, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use clap::Parser;
use keyward_core::SignRequest;
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use zeroize::Zeroizing;

use client::{ClientError, SignClient};

/// Fetch an SSH certificate from a keyward server
#[derive(Parser)]
#[command(name = "keyward")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Server base URL, ending with a slash
    #[arg(short, long, env = "KEYWARD_ADDR", default_value = "http://127.0.0.1:9600/")]
    addr: String,

    /// Username to log in as (defaults to $USER)
    #[arg(short, long, env = "KEYWARD_USER")]
    user: Option<String>,

    /// Password; prompted for when absent
    #[arg(short, long, env = "KEYWARD_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Public key to certify; a key pair is generated when it does not exist
    #[arg(short, long, env = "KEYWARD_KEY", default_value = "~/.ssh/id_ed25519.pub")]
    key: String,

    /// One-time code; prompted for when the server requires one
    #[arg(short, long, env = "KEYWARD_OTP")]
    otp: Option<String>,

    /// Only fetch a certificate when the current one is missing or expired
    #[arg(long)]
    expired: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("keyward=debug,info"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("keyward=info,warn"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .init();
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

fn prompt_line(prompt: &str) -> Result<String> {
    let mut stderr = io::stderr();
    write!(stderr, "{prompt}")?;
    stderr.flush()?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read from stdin")?;
    Ok(line.trim().to_string())
}

fn resolve_user(user: Option<String>) -> Result<String> {
    match user.or_else(|| std::env::var("USER").ok()) {
        Some(user) if !user.trim().is_empty() => Ok(user),
        _ => bail!("no username given and $USER is not set"),
    }
}

fn format_expiry(valid_before: u64) -> String {
    i64::try_from(valid_before)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S %Z").to_string())
        .unwrap_or_else(|| "never".to_string())
}

async fn run(cli: Cli) -> Result<()> {
    let public_path = keys::expand_tilde(&cli.key)?;
    let cert_path = keys::certificate_path(&public_path)?;

    if cli.expired && keys::certificate_still_valid(&cert_path, unix_now()) {
        info!(path = %cert_path.display(), "certificate still valid, nothing to do");
        return Ok(());
    }

    let client = SignClient::new(&cli.addr)?;
    let user = resolve_user(cli.user)?;

    if keys::ensure_key_pair(&public_path)? {
        eprintln!("Generated new key pair {}", public_path.display());
    }
    let public_key = keys::read_public_key(&public_path)?;

    let password = match cli.password {
        Some(password) => Zeroizing::new(password),
        None => Zeroizing::new(
            rpassword::prompt_password(format!("Password for {user}: "))
                .context("failed to read password")?,
        ),
    };

    let mut request = SignRequest::new(user, password.as_str(), public_key);
    if let Some(otp) = cli.otp {
        request = request.with_otp(otp);
    }

    debug!(addr = %cli.addr, user = %request.user, "requesting certificate");
    let certificate = match client.sign(&request).await {
        Err(ClientError::OtpRequired) if request.otp().is_none() => {
            let otp = prompt_line("OTP code: ")?;
            if otp.is_empty() {
                bail!("otp required but not provided");
            }
            client.sign(&request.with_otp(otp)).await?
        }
        other => other?,
    };

    keys::write_certificate(&cert_path, &certificate)?;
    let cert = keys::cert_info(&certificate)?;

    println!("Certificate written to {}", cert_path.display());
    println!("Valid until: {}", format_expiry(cert.valid_before));
    println!("Principals:  {}", cert.principals.join(", "));
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    run(cli).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_resolve_user() {
        assert_eq!(resolve_user(Some("alice".into())).unwrap(), "alice");
        assert!(resolve_user(Some("  ".into())).is_err());
    }

    #[test]
    fn test_format_expiry() {
        assert_eq!(format_expiry(u64::MAX), "never");
        assert!(format_expiry(1_700_000_000).starts_with("2023-11-1"));
    }
}
