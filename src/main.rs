use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use forum_liker::config::Config;
use forum_liker::constants::{DEFAULT_COOKIE_DOMAIN, TOKEN_COOKIE_NAME};
use forum_liker::cookies::{cookie_sources, load_token};
use forum_liker::liker::Liker;
use forum_liker::runner::{self, RunReport};
use forum_liker::session::Session;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    init_tracing()?;

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!(target_user = %config.target, forum = %config.forum_url, "Configuration loaded");

    let token = match resolve_token(&config).await {
        Ok(token) => token,
        Err(e) => {
            print_report(&RunReport {
                likes: 0,
                message: format!("{e:#}"),
            });
            return Err(e);
        }
    };

    let session = match Session::login(&config, &token).await {
        Ok(session) => session,
        Err(e) => {
            print_report(&RunReport {
                likes: 0,
                message: e.to_string(),
            });
            return Err(e).context("Failed to log into the forum");
        }
    };

    let mut liker = Liker::new(session, config.target.clone());
    let report = runner::run(&mut liker).await;
    print_report(&report);

    Ok(())
}

fn print_report(report: &RunReport) {
    println!("{report}");
    println!("{}", report.message);
}

/// Use the configured token, or read it from the Chromium or Firefox profile.
async fn resolve_token(config: &Config) -> Result<String> {
    if let Some(token) = &config.token {
        return Ok(token.clone());
    }

    let home = dirs::home_dir();
    let sources = cookie_sources(
        config.chromium_cookies_path.as_deref(),
        config.firefox_cookies_path.as_deref(),
        home.as_deref(),
    );
    let host = config
        .cookie_domain
        .as_deref()
        .unwrap_or(DEFAULT_COOKIE_DOMAIN);

    load_token(&sources, host, TOKEN_COOKIE_NAME)
        .await
        .context("Failed to read the credential from browser cookies")
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,forum_liker=debug"));

    // Check if JSON logging is requested
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    if use_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    }

    Ok(())
}
