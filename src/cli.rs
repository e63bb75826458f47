use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::metadata::{PKG_DESCRIPTION, PKG_NAME, PKG_VERSION};
use crate::types::{Role, parse_date};
use crate::week;

#[derive(Parser, Debug, Clone)]
#[command(name = PKG_NAME)]
#[command(version = PKG_VERSION)]
#[command(about = PKG_DESCRIPTION, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Resolve the effective configuration for this device
    Resolve,
    /// Save onboarding answers
    Onboard(OnboardArgs),
    /// Print the pregnancy week for a due date
    Week(WeekArgs),
    /// Create a partner invite code
    Invite,
    /// Redeem a partner invite code
    Accept(AcceptArgs),
    /// Remove the partner link
    Unlink,
    /// Show the linked partner
    Partner,
    /// List tasks for a week
    Tasks(TaskListArgs),
    /// Mark a system task done or not done
    ToggleTask(ToggleTaskArgs),
    /// Add a custom task
    AddTask(AddTaskArgs),
    /// Mark a custom task done or not done
    ToggleCustom(ToggleCustomArgs),
    /// Delete a custom task
    DeleteTask(DeleteTaskArgs),
    /// Print version information
    Version,
    /// Start the MCP server
    Serve(ServeArgs),
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Directory holding the local store
    #[arg(long, global = true, env = "BUMPMATE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Base URL of the remote store
    #[arg(long, global = true, env = "BUMPMATE_REMOTE_URL")]
    pub remote_url: Option<String>,

    /// Project key sent with every remote request
    #[arg(long, global = true, env = "BUMPMATE_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Current user id
    #[arg(long, global = true, env = "BUMPMATE_USER_ID")]
    pub user_id: Option<String>,

    /// Access token of the current user
    #[arg(long, global = true, env = "BUMPMATE_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    /// Maximum invite age in seconds (0 leaves expiry to the store)
    #[arg(long, global = true, env = "BUMPMATE_INVITE_TTL_SECS", default_value_t = 3600)]
    pub invite_ttl_secs: u64,

    /// JSON file with weekly guide content
    #[arg(long, global = true, env = "BUMPMATE_GUIDE_PATH")]
    pub guide_path: Option<PathBuf>,
}

impl GlobalArgs {
    /// Validate CLI/environment-derived arguments.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(url) = &self.remote_url {
            let url = url.trim();
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(format!(
                    "Invalid BUMPMATE_REMOTE_URL '{url}': expected an http(s) URL"
                ));
            }
        }
        if let Some(user) = &self.user_id {
            if user.trim().is_empty() {
                return Err("BUMPMATE_USER_ID cannot be empty".to_string());
            }
        }
        if self.access_token.is_some() && self.user_id.is_none() {
            return Err("BUMPMATE_ACCESS_TOKEN requires BUMPMATE_USER_ID".to_string());
        }
        if let Some(path) = &self.guide_path {
            if !path.is_file() {
                return Err(format!(
                    "BUMPMATE_GUIDE_PATH '{}' is not a file",
                    path.display()
                ));
            }
        }
        Ok(())
    }
}

#[derive(Args, Debug, Clone)]
pub struct OnboardArgs {
    /// dad or mom
    #[arg(long)]
    pub role: Option<Role>,
    /// Due date (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub due_date: Option<chrono::NaiveDate>,
    #[arg(long)]
    pub nickname: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct WeekArgs {
    /// Due date (YYYY-MM-DD)
    #[arg(value_parser = parse_date)]
    pub due_date: chrono::NaiveDate,
    /// Evaluate as of this date instead of today
    #[arg(long, value_parser = parse_date)]
    pub on: Option<chrono::NaiveDate>,
}

#[derive(Args, Debug, Clone)]
pub struct AcceptArgs {
    pub code: String,
}

#[derive(Args, Debug, Clone)]
pub struct TaskListArgs {
    /// Week to list (defaults to the current week)
    #[arg(long, value_parser = parse_week)]
    pub week: Option<u8>,
    /// Role to list (defaults to the configured role)
    #[arg(long)]
    pub role: Option<Role>,
    /// Show the partner's records instead
    #[arg(long, default_value_t = false)]
    pub partner: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ToggleTaskArgs {
    #[arg(long, value_parser = parse_week)]
    pub week: Option<u8>,
    #[arg(long)]
    pub role: Option<Role>,
    /// Position of the task in the week's list
    pub index: usize,
    /// Mark as not done
    #[arg(long, default_value_t = false)]
    pub undo: bool,
}

#[derive(Args, Debug, Clone)]
pub struct AddTaskArgs {
    #[arg(long, value_parser = parse_week)]
    pub week: Option<u8>,
    #[arg(long)]
    pub role: Option<Role>,
    pub content: String,
}

#[derive(Args, Debug, Clone)]
pub struct ToggleCustomArgs {
    #[arg(long, value_parser = parse_week)]
    pub week: Option<u8>,
    pub id: String,
    #[arg(long, default_value_t = false)]
    pub undo: bool,
}

#[derive(Args, Debug, Clone)]
pub struct DeleteTaskArgs {
    pub id: String,
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Server name (used in initialize)
    #[arg(skip = crate::metadata::PKG_NAME.to_string())]
    pub server_name: String,

    /// Enable stdio transport
    #[arg(long, env = "MCP_ENABLE_STDIO", default_value_t = true, action = clap::ArgAction::Set)]
    pub enable_stdio: bool,

    /// Enable streamable HTTP transport
    #[arg(long, env = "MCP_ENABLE_HTTP", default_value_t = false, action = clap::ArgAction::Set)]
    pub enable_http: bool,

    /// HTTP bind address (streamable HTTP)
    #[arg(long, env = "MCP_HTTP_ADDR", default_value = "127.0.0.1:8080")]
    pub http_addr: String,
}

impl ServeArgs {
    pub fn validate(&self) -> Result<SocketAddr, String> {
        if !self.enable_stdio && !self.enable_http {
            return Err("Enable at least one transport (stdio or http)".to_string());
        }
        self.http_addr
            .parse::<SocketAddr>()
            .map_err(|e| format!("Invalid MCP_HTTP_ADDR '{}': {e}", self.http_addr))
    }
}

fn parse_week(s: &str) -> Result<u8, String> {
    let week: u8 = s.parse().map_err(|e| format!("invalid week '{s}': {e}"))?;
    if week::is_valid_week(week) {
        Ok(week)
    } else {
        Err(format!(
            "week {week} is outside {}..={}",
            week::FIRST_WEEK,
            week::LAST_WEEK
        ))
    }
}
