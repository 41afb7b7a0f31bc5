use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dialoguer::{Input, Password};
use std::io::IsTerminal;

use crate::auth::{Credentials, DEFAULT_REFRESH_MARGIN_SECS};
use crate::error::ClientError;
use crate::models::{HttpMethod, Operation};

/// Compute Client - JWT-authenticated access to the compute API
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Compute server URL
    #[arg(short = 'H', long, env = "COMPUTE_HOST", default_value = "http://localhost:8001")]
    pub host: String,

    /// Login username
    #[arg(short, long, env = "COMPUTE_USERNAME")]
    pub username: Option<String>,

    /// Login password
    #[arg(short, long, env = "COMPUTE_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// HTTP request timeout in seconds
    #[arg(long = "request-timeout", env = "HTTP_REQUEST_TIMEOUT", default_value = "30")]
    pub http_timeout: u64,

    /// HTTP connect timeout in seconds
    #[arg(long, env = "HTTP_CONNECT_TIMEOUT", default_value = "10")]
    pub connect_timeout: u64,

    /// Refresh the access token when it has this many seconds left
    #[arg(long, env = "TOKEN_REFRESH_MARGIN", default_value_t = DEFAULT_REFRESH_MARGIN_SECS)]
    pub refresh_margin: f64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Log in and report how long the access token stays valid
    Login,

    /// Show the decoded payload of the access token
    Token {
        /// Refresh the token even if it is still valid
        #[arg(long)]
        refresh: bool,

        /// Ask the server to verify the token
        #[arg(long)]
        verify: bool,
    },

    /// Send a request to the compute API
    Request {
        /// Operation (list, read, create, update, partial_update) or HTTP method
        #[arg(value_parser = parse_method)]
        method: HttpMethod,

        /// API path, e.g. /api/task/
        path: String,

        /// JSON request body
        #[arg(short, long)]
        data: Option<String>,

        /// Query parameter as key=value (repeatable)
        #[arg(short, long = "query", value_parser = parse_key_value)]
        query: Vec<(String, String)>,

        /// Extra header as name=value (repeatable)
        #[arg(long = "header", value_parser = parse_key_value)]
        headers: Vec<(String, String)>,
    },
}

#[derive(Clone, Debug)]
pub struct Config {
    // Server and credentials
    pub host: String,
    pub username: Option<String>,
    pub password: Option<String>,

    // HTTP client
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,

    // Token lifecycle
    pub token_refresh_margin: f64,

    // Logging
    pub log_level: String,

    pub command: Command,
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        Ok(Self::from_args(CliArgs::parse()))
    }

    pub fn from_args(args: CliArgs) -> Self {
        Config {
            host: args.host,
            username: args.username.filter(|u| !u.is_empty()),
            password: args.password,
            http_connect_timeout: args.connect_timeout,
            http_request_timeout: args.http_timeout,
            token_refresh_margin: args.refresh_margin,
            log_level: args.log_level,
            command: args.command,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> crate::error::Result<()> {
        if !(self.host.starts_with("http://") || self.host.starts_with("https://")) {
            return Err(ClientError::ConfigError(format!(
                "COMPUTE_HOST must start with http:// or https:// (got {:?})",
                self.host
            )));
        }

        if self.username.is_none() {
            return Err(ClientError::ConfigError(
                "COMPUTE_USERNAME is required (use -u or set COMPUTE_USERNAME env var)".to_string(),
            ));
        }

        if self.password.is_none() {
            return Err(ClientError::ConfigError(
                "COMPUTE_PASSWORD is required (use -p or set COMPUTE_PASSWORD env var)".to_string(),
            ));
        }

        if !self.token_refresh_margin.is_finite() || self.token_refresh_margin < 0.0 {
            return Err(ClientError::ConfigError(format!(
                "TOKEN_REFRESH_MARGIN must be a non-negative number of seconds (got {})",
                self.token_refresh_margin
            )));
        }

        if self.http_request_timeout == 0 {
            return Err(ClientError::ConfigError(
                "HTTP_REQUEST_TIMEOUT must be at least 1 second".to_string(),
            ));
        }

        Ok(())
    }

    /// Credentials for the session; call after [`Config::validate`]
    pub fn credentials(&self) -> Result<Credentials> {
        Ok(Credentials::new(
            self.host.clone(),
            self.username.clone().context("username is not configured")?,
            self.password.clone().context("password is not configured")?,
        ))
    }
}

/// Parse an operation name or an HTTP method
pub fn parse_method(s: &str) -> Result<HttpMethod, String> {
    s.parse::<Operation>()
        .map(Operation::method)
        .or_else(|_| s.parse::<HttpMethod>())
        .map_err(|_| {
            format!(
                "unknown operation or method: {} (expected list, read, create, update, partial_update or an HTTP method)",
                s
            )
        })
}

/// Parse a key=value pair
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got {:?}", s)),
    }
}

// === Interactive Setup ===

/// Check if credentials must be prompted for (missing values, interactive terminal)
pub fn needs_interactive_setup(config: &Config) -> bool {
    (config.username.is_none() || config.password.is_none()) && std::io::stdin().is_terminal()
}

/// Prompt for whichever credentials are missing
pub fn run_interactive_setup(config: &mut Config) -> Result<()> {
    println!("Logging in to {}", config.host);

    if config.username.is_none() {
        let username: String = Input::new()
            .with_prompt("Username")
            .interact_text()
            .context("Failed to read username")?;

        if username.is_empty() {
            anyhow::bail!("Username cannot be empty");
        }
        config.username = Some(username);
    }

    if config.password.is_none() {
        let password: String = Password::new()
            .with_prompt("Password")
            .interact()
            .context("Failed to read password")?;
        config.password = Some(password);
    }

    Ok(())
}
