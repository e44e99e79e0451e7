use clap::{Parser, Subcommand};
use url::Url;

/// Mega-Sena lottery pool tracker
#[derive(Parser, Debug, Clone)]
#[command(name = "bolao", version, about)]
pub struct Config {
    /// Log emails instead of sending them
    #[arg(long, env = "DRY_RUN", default_value = "false")]
    pub dry_run: bool,

    /// SQLite database path
    #[arg(long, env = "DATABASE_PATH", default_value = "bolao.db")]
    pub database_path: String,

    /// Mega-Sena results API base URL (serves `/latest` and `/{concurso}`)
    #[arg(
        long,
        env = "LOTTERY_API_URL",
        default_value = "https://loteriascaixa-api.herokuapp.com/api/megasena"
    )]
    pub lottery_api_url: String,

    /// Draw polling interval in seconds
    #[arg(long, env = "POLL_INTERVAL_SECS", default_value = "300")]
    pub poll_interval_secs: u64,

    /// Transactional mail API endpoint (JSON POST)
    #[arg(long, env = "MAIL_API_URL")]
    pub mail_api_url: Option<String>,

    /// Bearer token for the mail API
    #[arg(long, env = "MAIL_API_TOKEN")]
    pub mail_api_token: Option<String>,

    /// Sender address for outgoing mail
    #[arg(long, env = "MAIL_FROM")]
    pub mail_from: Option<String>,

    /// Public site URL used for links in emails
    #[arg(long, env = "PUBLIC_BASE_URL", default_value = "http://localhost:8080")]
    pub public_base_url: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Poll for draw results until interrupted
    Run,

    /// Run a single poll tick and exit
    Poll,

    /// Create a pool and print its id and edit token
    CreatePool {
        /// Concurso the pool plays
        #[arg(long)]
        target: i64,
        #[arg(long)]
        name: Option<String>,
    },

    /// Change the concurso a pool plays
    SetTarget {
        #[arg(long)]
        pool: String,
        /// Edit token printed by create-pool
        #[arg(long)]
        token: String,
        #[arg(long)]
        target: i64,
    },

    /// Register a game of 6 to 15 dezenas
    AddGame {
        #[arg(long)]
        pool: String,
        #[arg(long)]
        token: String,
        #[arg(required = true, num_args = 6..=15)]
        dezenas: Vec<String>,
    },

    /// Enter or correct an official draw by hand
    SetDraw {
        #[arg(long)]
        number: i64,
        /// Official draw date, e.g. 30/03/2024
        #[arg(long)]
        date: String,
        #[arg(required = true, num_args = 6)]
        dezenas: Vec<String>,
    },

    /// Subscribe an email to a pool's result
    Subscribe {
        #[arg(long)]
        pool: String,
        #[arg(long)]
        email: String,
    },

    /// Confirm a subscription
    Verify {
        #[arg(long)]
        token: String,
    },

    /// Show a pool's games, hits and achievement
    Show {
        #[arg(long)]
        pool: String,
    },
}

impl Command {
    /// Whether the command may deliver email
    pub fn sends_mail(&self) -> bool {
        matches!(self, Command::Run | Command::Poll | Command::Subscribe { .. })
    }
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval_secs == 0 {
            anyhow::bail!("poll_interval_secs must be positive");
        }
        Url::parse(&self.lottery_api_url)
            .map_err(|e| anyhow::anyhow!("LOTTERY_API_URL is not a valid URL: {}", e))?;
        Url::parse(&self.public_base_url)
            .map_err(|e| anyhow::anyhow!("PUBLIC_BASE_URL is not a valid URL: {}", e))?;

        if !self.dry_run && self.command.sends_mail() {
            if self.mail_api_url.is_none() {
                anyhow::bail!("MAIL_API_URL is required to send mail. Use --dry-run to only log messages.");
            }
            if self.mail_api_token.is_none() {
                anyhow::bail!("MAIL_API_TOKEN is required to send mail. Use --dry-run to only log messages.");
            }
            if self.mail_from.is_none() {
                anyhow::bail!("MAIL_FROM is required to send mail. Use --dry-run to only log messages.");
            }
        }
        Ok(())
    }
}
