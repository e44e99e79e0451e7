use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

mod bolao;
mod config;
mod db;
mod error;
mod lottery;
mod notify;
mod poller;

use bolao::dezena;
use config::{Command, Config};
use db::models::{Draw, PoolDraw, SubscriberStatus};
use db::Database;
use lottery::MegaSenaApi;
use notify::{message, HttpMailer, Links, LogMailer, Mailer};
use poller::DrawPoller;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    let db = Database::open(&config.database_path)
        .with_context(|| format!("Failed to open database {}", config.database_path))?;
    info!("Database opened: {}", config.database_path);

    match config.command.clone() {
        Command::Run => {
            let poller = build_poller(&config, db)?;
            let handle = poller.start();
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;
            info!("Shutdown requested");
            handle.stop().await?;
        }
        Command::Poll => {
            let report = build_poller(&config, db)?.poll_once().await;
            println!(
                "fetches={} stored={} notified={} failed={}",
                report.fetches, report.stored, report.notified, report.failed
            );
        }
        Command::CreatePool { target, name } => {
            let pool = db.create_pool(name.as_deref(), target)?;
            info!("Created pool {} for concurso {}", pool.id, pool.target_draw);
            println!("pool:       {}", pool.id);
            println!("edit token: {}", pool.edit_token);
        }
        Command::SetTarget {
            pool,
            token,
            target,
        } => {
            db.set_target_draw(&pool, &token, target)?;
            info!("Pool {} now plays concurso {}", pool, target);
        }
        Command::AddGame {
            pool,
            token,
            dezenas,
        } => {
            let game = db.add_game(&pool, &token, &dezenas)?;
            println!("game #{}: {}", game.id, dezena::display(&game.numbers));
        }
        Command::SetDraw {
            number,
            date,
            dezenas,
        } => {
            let draw = Draw {
                number,
                numbers: dezena::parse_draw(&dezenas)?,
                date,
                updated_at: Utc::now(),
            };
            if db.upsert_draw(&draw)? {
                info!("Stored draw {} by hand", draw.number);
            } else {
                info!("Draw {} already stored with the same result", draw.number);
            }
        }
        Command::Subscribe { pool, email } => {
            let pool = db
                .get_pool(&pool)?
                .ok_or_else(|| error::BolaoError::PoolNotFound(pool.clone()))?;
            let subscriber = db.subscribe(&pool.id, &email)?;
            let links = Links::new(&config.public_base_url)?;
            let msg = message::verification(&pool, &subscriber, &links)?;
            build_mailer(&config)?.send(&msg).await?;
            info!("Verification sent to {}", subscriber.email);
        }
        Command::Verify { token } => {
            let subscriber = db.verify_subscriber(&token)?;
            let at = subscriber
                .verified_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_default();
            info!(
                "Subscription of {} to pool {} verified at {}",
                subscriber.email, subscriber.pool_id, at
            );
        }
        Command::Show { pool } => show_pool(&db, &pool)?,
    }

    Ok(())
}

fn build_mailer(config: &Config) -> Result<Arc<dyn Mailer>> {
    if config.dry_run {
        info!("🟡 DRY RUN mode – emails are logged, not sent");
        return Ok(Arc::new(LogMailer));
    }
    let url = config.mail_api_url.as_deref().context("MAIL_API_URL missing")?;
    let token = config
        .mail_api_token
        .as_deref()
        .context("MAIL_API_TOKEN missing")?;
    let from = config.mail_from.as_deref().context("MAIL_FROM missing")?;
    Ok(Arc::new(HttpMailer::new(url, token, from)?))
}

fn build_poller(config: &Config, db: Database) -> Result<DrawPoller> {
    let source = MegaSenaApi::new(&config.lottery_api_url)?;
    Ok(DrawPoller::new(
        db,
        Arc::new(source),
        build_mailer(config)?,
        Links::new(&config.public_base_url)?,
        Duration::from_secs(config.poll_interval_secs),
    ))
}

fn show_pool(db: &Database, pool_id: &str) -> Result<()> {
    let summary = db.pool_summary(pool_id)?;
    let pool = &summary.pool;
    match &pool.name {
        Some(name) => println!("{} ({}), concurso {}", name, pool.id, pool.target_draw),
        None => println!("{}, concurso {}", pool.id, pool.target_draw),
    }
    match &summary.state {
        PoolDraw::Pending { target } => println!("waiting for draw {}", target),
        PoolDraw::Resolved(draw) => println!(
            "drawn on {}: {}",
            draw.date,
            dezena::display(&draw.numbers)
        ),
    }

    for ranked in &summary.games {
        let numbers = dezena::display(&ranked.game.numbers);
        match ranked.hits {
            Some(hits) => println!("  #{:<4} {:<44} {} hits", ranked.game.id, numbers, hits),
            None => println!("  #{:<4} {}", ranked.game.id, numbers),
        }
    }

    if let Some(max) = summary.max_hits {
        match summary.achievement {
            Some(a) => println!("best: {} hits ({})", max, a),
            None => println!("best: {} hits", max),
        }
    }

    let subscribers = db.list_subscribers(&pool.id)?;
    let verified = subscribers
        .iter()
        .filter(|s| s.status == SubscriberStatus::Verified)
        .count();
    println!("subscribers: {} ({} verified)", subscribers.len(), verified);
    Ok(())
}
