use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "photopass")]
#[command(about = "Sign in to the photopass marketplace and call its API")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Backend base URL (overrides config)
    #[arg(short, long, global = true, env = "PHOTOPASS_API_URL")]
    pub server: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in with email and password
    Login(LoginArgs),
    /// Sign out and remove stored credentials
    Logout,
    /// Re-fetch and show the signed-in user
    Whoami,
    /// Show whether the stored session is still valid
    Status,
    /// Authenticated GET of an API path, printed as JSON
    Get(GetArgs),
}

#[derive(clap::Args)]
pub struct LoginArgs {
    /// Account email (defaults to the last one used)
    #[arg(short, long)]
    pub email: Option<String>,
}

#[derive(clap::Args)]
pub struct GetArgs {
    /// Path relative to the API base URL, e.g. /api/events/
    pub path: String,

    /// Query parameters as key=value
    #[arg(short, long = "query", value_parser = parse_key_value)]
    pub query: Vec<(String, String)>,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{}'", s))
}
