//! Run command - host the engine in real time

use std::future;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use outdial_call_engine::prelude::*;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::{leads, report};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Engine settings file (TOML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Lead list CSV with a `name,phone,priority` header
    #[arg(short, long)]
    pub leads: Option<PathBuf>,

    /// Generate this many leads when no list is given
    #[arg(long, default_value_t = 5)]
    pub synthetic: usize,

    /// Stop after this many seconds; runs until Ctrl+C otherwise
    #[arg(long)]
    pub seconds: Option<u64>,

    /// Stop once every lead is completed or failed
    #[arg(long)]
    pub until_idle: bool,

    /// Seed for the outcome generator
    #[arg(long, default_value_t = 7)]
    pub seed: u64,

    /// Print transcript and connect notices too
    #[arg(short, long)]
    pub verbose: bool,

    /// Print notices as JSON lines
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: RunArgs) -> Result<()> {
    let config = EngineConfig::load(args.config.as_deref())?;
    let leads = leads::load_or_generate(args.leads.as_deref(), args.synthetic)?;

    let engine = CallEngineBuilder::new()
        .with_config(config)
        .with_outcome_provider(RandomOutcomeProvider::new(args.seed))
        .build()?;
    let handle = engine.handle();
    let mut notices = handle.subscribe();

    for lead in leads {
        handle.enqueue_lead(lead).await?;
    }
    info!("engine running, press Ctrl+C to stop");

    let deadline = async {
        match args.seconds {
            Some(seconds) => tokio::time::sleep(Duration::from_secs(seconds)).await,
            None => future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            _ = &mut deadline => break,
            notice = notices.recv() => match notice {
                Ok(notice) => {
                    let ended = matches!(notice, EngineNotice::SessionEnded { .. });
                    if args.json {
                        println!("{}", serde_json::to_string(&notice)?);
                    } else if let Some(line) = report::notice_line(&notice, args.verbose) {
                        println!("{}", line);
                    }
                    if ended && args.until_idle {
                        let queue = handle.queue_snapshot().await?;
                        if queue.pending.is_empty() && queue.calling.is_empty() {
                            info!("all leads finished");
                            break;
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "notice stream lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    let summary = handle.daily_summary(None).await?;
    let usage = handle.usage_snapshot().await?;
    engine.stop().await?;

    if args.json {
        println!("{}", serde_json::to_string(&serde_json::json!({ "summary": summary, "usage": usage }))?);
    } else {
        report::print_usage(&usage);
        report::print_summary(&summary);
    }
    Ok(())
}
