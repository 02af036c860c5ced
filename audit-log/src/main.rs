//! Audit log service: buffers submitted events and flushes them to
//! PostgreSQL and Kafka in batches.
use std::sync::Arc;

use anyhow::Context;
use envconfig::Envconfig;
use health::HealthRegistry;
use time::Duration;
use tokio::signal::unix::SignalKind;

use audit_log::config::Config;
use audit_log::metrics::{serve, setup_ops_router};
use audit_log::pipeline::EventPipeline;
use audit_log::sinks::kafka::KafkaSink;
use audit_log::sinks::postgres::PgEventStore;
use audit_log::sinks::{BrokerSink, PrintSink};

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())
        .expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = ctrl_c => tracing::info!("received SIGINT"),
        _ = sigterm.recv() => tracing::info!("received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("failed to load configuration from env");
    let liveness = HealthRegistry::new("liveness");

    let store = PgEventStore::new(&config.database_url, config.max_pg_connections)
        .await
        .context("failed to connect to the audit store")?;

    let broker: Arc<dyn BrokerSink + Send + Sync> = if config.print_sink {
        Arc::new(PrintSink {})
    } else {
        let handle = liveness.register("rdkafka".to_string(), Duration::seconds(30));
        let sink = KafkaSink::new(&config.kafka, handle)
            .context("failed to create kafka producer")?;
        Arc::new(sink)
    };

    let pipeline = Arc::new(EventPipeline::new(
        config.batch_size,
        Arc::new(store),
        broker,
    ));

    // The scheduler is armed exactly once, here. Reporting happens every
    // tick, so give the deadline a few intervals of slack.
    let scheduler_deadline = Duration::seconds(config.flush_interval_secs.get() as i64 * 3);
    let scheduler_liveness = liveness.register("flush_scheduler".to_string(), scheduler_deadline);
    pipeline.arm_scheduler(config.flush_interval(), scheduler_liveness);

    let router = setup_ops_router(liveness);
    let bind = config.bind();
    tracing::info!("listening on {}", bind);

    tokio::select! {
        result = serve(router, &bind) => {
            if let Err(e) = result {
                tracing::error!("failed to start ops http server: {}", e);
            }
        }
        _ = shutdown_signal() => {
            pipeline.shutdown().await;
        }
    }

    Ok(())
}
