//! `keyward-server hash`: produce a local user record.

use anyhow::{bail, Context, Result};
use clap::Args;
use keyward_core::otp;
use zeroize::Zeroizing;

#[derive(Args, Debug)]
pub struct HashArgs {
    /// Also generate a TOTP seed for the user
    #[arg(long)]
    pub otp: bool,

    /// bcrypt cost
    #[arg(long, default_value_t = bcrypt::DEFAULT_COST)]
    pub cost: u32,
}

/// A record ready to paste under `[authenticator.users]`.
#[derive(Debug)]
pub struct Provisioned {
    pub record: String,
    pub seed: Option<String>,
    pub uri: Option<String>,
}

/// Records always carry the `$2a$` prefix.
fn hash_password(password: &str, cost: u32) -> Result<String> {
    let parts = bcrypt::hash_with_result(password, cost).context("failed to hash password")?;
    Ok(parts.format_for_version(bcrypt::Version::TwoA))
}

pub fn provision(password: &str, cost: u32, with_otp: bool) -> Result<Provisioned> {
    if password.is_empty() {
        bail!("password must not be empty");
    }
    let hash = hash_password(password, cost)?;
    if !with_otp {
        return Ok(Provisioned {
            record: hash,
            seed: None,
            uri: None,
        });
    }

    let seed = otp::generate_seed();
    let encrypted = otp::encrypt_seed(&seed, password).context("failed to encrypt otp seed")?;
    Ok(Provisioned {
        record: format!("{hash},{encrypted}"),
        uri: Some(otp::provision_uri(&seed)),
        seed: Some(seed),
    })
}

pub fn execute(args: HashArgs) -> Result<()> {
    let password = Zeroizing::new(rpassword::prompt_password("Password: ")?);
    let confirm = Zeroizing::new(rpassword::prompt_password("Confirm password: ")?);
    if *password != *confirm {
        bail!("passwords do not match");
    }

    let provisioned = provision(&password, args.cost, args.otp)?;
    if let (Some(uri), Some(seed)) = (&provisioned.uri, &provisioned.seed) {
        println!("OTP provisioning URI: {uri}");
        println!("OTP seed: {seed}");
    }
    println!("{}", provisioned.record);
    Ok(())
}
