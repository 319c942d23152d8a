//! `issue-token`: mint a bearer token for the HTTP ingress.

use anyhow::Context;
use clap::Args;

use prefsync_api::middleware::auth::encode_jwt;

#[derive(Args)]
pub struct IssueTokenArgs {
    /// Name recorded as the token subject
    #[arg(long)]
    pub operator: String,

    /// Lifetime in hours (defaults to JWT_EXPIRY_HOURS, then 24)
    #[arg(long)]
    pub hours: Option<u64>,
}

pub fn execute(args: IssueTokenArgs) -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let secret = std::env::var("JWT_SECRET").context("JWT_SECRET environment variable is required")?;
    let hours = match args.hours {
        Some(hours) => hours,
        None => std::env::var("JWT_EXPIRY_HOURS")
            .unwrap_or_else(|_| "24".to_string())
            .parse()
            .map_err(|_| anyhow::anyhow!("JWT_EXPIRY_HOURS must be a valid u64"))?,
    };

    let token = encode_jwt(&args.operator, &secret, hours)?;
    println!("{}", token);
    Ok(())
}
