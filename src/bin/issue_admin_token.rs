//! Print an admin token signed with `SECRET_KEY`.
//!
//! Usage:
//!   cargo run --bin issue-admin-token                # valid for one year
//!   cargo run --bin issue-admin-token -- --hours 24
//!
//! Present it as `Authorization: Bearer <token>`, or exchange it for the
//! admin cookie with `POST /admin/session`.

use anyhow::{bail, Context, Result};
use oilfusion_landing::auth::{issue_admin_token, DEFAULT_TOKEN_HOURS};

fn parse_hours(args: &[String]) -> Result<i64> {
    let mut hours = DEFAULT_TOKEN_HOURS;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--hours" => {
                let value = iter.next().context("--hours needs a value")?;
                hours = value
                    .parse()
                    .with_context(|| format!("Invalid --hours value '{}'", value))?;
            }
            other => bail!("Unknown argument '{}'", other),
        }
    }
    if hours <= 0 {
        bail!("--hours must be positive");
    }
    Ok(hours)
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let hours = parse_hours(&args)?;

    let secret = std::env::var("SECRET_KEY").context("SECRET_KEY not set")?;
    let token = issue_admin_token(&secret, chrono::Duration::hours(hours))?;

    eprintln!("Admin token valid for {} hours:", hours);
    println!("{}", token);
    Ok(())
}
