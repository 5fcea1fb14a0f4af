use std::net::IpAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use envconfig::Envconfig;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use rollout_flags::config::Config;
use rollout_flags::context::{EvaluationContext, RequestContext, User};
use rollout_flags::flags::flag_models::Flag;
use rollout_flags::redis::RedisClient;
use rollout_flags::rollouts::rollout_operations::{RedisRolloutStore, RolloutStore};
use rollout_flags::subjects::subject_registry::SubjectCatalog;

/// Shows how a flag resolves for a given request, rollout by rollout.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Id of the flag to resolve
    flag_id: String,

    /// Remote address of the request
    #[arg(long)]
    ip: Option<IpAddr>,

    /// Authenticated user id, if any
    #[arg(long)]
    user_id: Option<i64>,

    /// Value used when no rollout decides
    #[arg(long)]
    default: bool,
}

fn init_tracing(debug: bool) {
    let log_layer = {
        let base_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_level(true)
            .with_writer(std::io::stderr);

        if debug {
            base_layer
                .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
                .with_ansi(true)
                .with_filter(EnvFilter::from_default_env())
                .boxed()
        } else {
            base_layer
                .json()
                .with_filter(EnvFilter::from_default_env())
                .boxed()
        }
    };

    tracing_subscriber::registry().with(log_layer).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::init_from_env().context("Invalid configuration")?;
    init_tracing(*config.debug);

    let subjects = config
        .subject_registry(&SubjectCatalog::builtin())
        .context("Invalid FLAG_SUBJECTS")?;

    let client = RedisClient::new(config.redis_url.clone(), config.redis_timeout())
        .await
        .context("Failed to connect to redis")?;
    let store = RedisRolloutStore::new(Arc::new(client), config.rollouts_key_prefix.clone());

    let flag = Flag::new(args.flag_id.as_str()).with_default(args.default);
    let request = RequestContext {
        remote_addr: args.ip,
        user: args.user_id.map(|id| User::new(id, String::new())),
    };

    let rollouts = store
        .list_rollouts(flag.id())
        .await
        .with_context(|| format!("Failed to fetch rollouts for `{}`", flag.id()))?;

    println!("{} ({} rollouts, newest first)", flag.display_name(), rollouts.len());
    for rollout in &rollouts {
        let outcome = match rollout.evaluate(&subjects, EvaluationContext::Request(&request))? {
            Some(true) => "enabled",
            Some(false) => "disabled",
            None => "abstain",
        };
        println!(
            "  #{:<6} {}  {:>6.2}%  {:<12} {}",
            rollout.id,
            rollout.created_at.to_rfc3339(),
            rollout.enable_percentage,
            rollout.subject_name(&subjects),
            outcome,
        );
    }

    let resolution = flag.resolve_rollouts(&rollouts, &subjects, &request)?;
    println!("=> {} ({})", resolution.value, resolution.reason);

    Ok(())
}
