use anyhow::Result;
use clap::Parser;
use metrika_agent::config::{AgentArgs, AgentConfig};
use metrika_agent::{sampler, transport, MetricCache, Reporter};
use metrika_collector::{Collector, CountingAllocator, RuntimeCollector, UtilCollector};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[global_allocator]
static ALLOC: CountingAllocator = CountingAllocator::new();

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("metrika=info".parse()?))
        .init();

    let config = AgentConfig::from_args(AgentArgs::parse())?;
    tracing::info!(
        address = %config.address,
        poll_interval = config.poll_interval,
        report_interval = config.report_interval,
        rate_limit = config.rate_limit,
        transport = ?config.transport,
        restricted = config.restricted,
        "metrika-agent starting"
    );

    let transport = transport::build(&config)?;
    let cache = Arc::new(MetricCache::new(config.restricted));
    let cancel = CancellationToken::new();

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if let Err(e) = signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                return;
            }
            tracing::info!("Shutting down gracefully");
            cancel.cancel();
        }
    });

    let collectors: Vec<Box<dyn Collector>> = vec![
        Box::new(RuntimeCollector::new(Some(&ALLOC))),
        Box::new(UtilCollector::new()),
    ];
    let samplers = sampler::spawn(collectors, cache.clone(), config.poll_period(), cancel.clone());

    Reporter::from_config(&config, cache, transport)
        .run(cancel)
        .await;

    for handle in samplers {
        if let Err(e) = handle.await {
            tracing::debug!(error = %e, "Sampler join failed");
        }
    }
    Ok(())
}
