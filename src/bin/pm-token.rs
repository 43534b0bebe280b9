//! Offline session token issuer.
//!
//! Prints a token binding a client to one upstream, signed with the same
//! secret the edge and the gateway share.

use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{CommandFactory, Parser};

use edge_gateway::security::token::{issue_token, unix_now, SessionClaims, DEFAULT_TTL_SECS};

#[derive(Debug, Parser)]
#[command(name = "pm-token")]
#[command(about = "Issue a session token for one upstream", long_about = None)]
struct Cli {
    /// IP of the upstream the token grants access to
    #[arg(long)]
    ip: String,

    /// Gateway the token is issued for
    #[arg(long)]
    upstream: String,

    /// Signing secret
    #[arg(long, conflicts_with = "secret_file")]
    secret: Option<String>,

    /// wrangler.toml holding a `JWT_SECRET = "..."` line
    #[arg(long)]
    secret_file: Option<PathBuf>,

    /// Token lifetime in seconds
    #[arg(long, default_value_t = DEFAULT_TTL_SECS)]
    ttl_secs: i64,
}

/// Value of the last `JWT_SECRET = "..."` line.
fn secret_from_wrangler(contents: &str) -> Option<String> {
    contents
        .lines()
        .filter_map(|line| line.strip_prefix("JWT_SECRET"))
        .filter_map(|rest| rest.trim_start().strip_prefix('='))
        .map(|value| value.trim().trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
        .last()
}

fn resolve_secret(cli: &Cli) -> Result<String, String> {
    if let Some(secret) = cli.secret.as_ref().filter(|s| !s.is_empty()) {
        return Ok(secret.clone());
    }
    if let Some(path) = &cli.secret_file {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
        return secret_from_wrangler(&contents)
            .ok_or_else(|| format!("JWT_SECRET not found in {}", path.display()));
    }
    match std::env::var("JWT_KEY") {
        Ok(secret) if !secret.is_empty() => Ok(secret),
        _ => Err("no secret: pass --secret, --secret-file or set JWT_KEY".to_string()),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.ip.is_empty() || cli.upstream.is_empty() {
        let _ = Cli::command().print_help();
        return ExitCode::FAILURE;
    }
    let ip: IpAddr = match cli.ip.parse() {
        Ok(ip) => ip,
        Err(_) => {
            eprintln!("pm-token: '{}' is not an IP address", cli.ip);
            return ExitCode::FAILURE;
        }
    };

    let secret = match resolve_secret(&cli) {
        Ok(secret) => secret,
        Err(e) => {
            eprintln!("pm-token: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let claims = SessionClaims::issued_at(ip.to_string(), cli.upstream.clone(), unix_now(), cli.ttl_secs);
    match issue_token(secret.as_bytes(), &claims) {
        Ok(token) => {
            println!("{}", token);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("pm-token: {}", e);
            ExitCode::FAILURE
        }
    }
}
