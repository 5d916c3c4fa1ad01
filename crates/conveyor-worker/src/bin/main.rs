use conveyor_broker::{BrokerClient, BrokerConfig, ConnectionRole};
use conveyor_client::HttpServerApi;
use conveyor_core::{JobStatus, UnprocessedJob};
use conveyor_worker::{CvmfsRunner, PipelineStage, Processor, WorkerConfig};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

fn broker_config_from_env() -> BrokerConfig {
    BrokerConfig {
        host: std::env::var("CONVEYOR_BROKER_HOST").unwrap_or_default(),
        port: std::env::var("CONVEYOR_BROKER_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5672),
        vhost: std::env::var("CONVEYOR_BROKER_VHOST").unwrap_or_else(|_| "/cvmfs".to_string()),
        username: std::env::var("CONVEYOR_BROKER_USER").unwrap_or_default(),
        password: std::env::var("CONVEYOR_BROKER_PASSWORD").unwrap_or_default(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = WorkerConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;
    let broker_cfg = broker_config_from_env();
    let broker = Arc::new(BrokerClient::connect(&broker_cfg, ConnectionRole::Consumer).await?);

    let api: Arc<dyn conveyor_client::ServerApi> = Arc::new(HttpServerApi::new(
        config.server_base_url.clone(),
        config.shared_key.clone(),
    ));
    let runner = Arc::new(CvmfsRunner::new(config.repo_root.clone()));

    let (completions_tx, _) = broadcast::channel::<JobStatus>(256);
    let processor = Arc::new(Processor::new(config.clone(), api, runner, completions_tx.clone()));

    let (quit_tx, quit_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = quit_tx.send(true);
        }
    });

    let completions_broker = broker.clone();
    let completions_tag = format!("{}-completions", config.worker_name);
    tokio::spawn(async move {
        let mut consumer = match completions_broker.consume_completions(&completions_tag).await {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, "could not start completions consumer");
                return;
            }
        };
        while let Some(delivery) = consumer.next().await {
            let Ok(delivery) = delivery else { continue };
            if let Ok(status) = serde_json::from_slice::<JobStatus>(&delivery.data) {
                let _ = completions_tx.send(status);
            }
            let _ = completions_broker.ack(delivery.delivery_tag).await;
        }
    });

    let mut fatal = broker.closed();
    let new_jobs_tag = format!("{}-jobs", config.worker_name);
    let mut new_jobs = broker.consume_new_jobs(&new_jobs_tag).await?;

    tracing::info!(worker = %config.worker_name, "worker ready");

    loop {
        tokio::select! {
            biased;

            changed = fatal.changed() => {
                if changed.is_ok() {
                    anyhow::bail!("broker connection closed unexpectedly, exiting for supervisor restart");
                }
            }

            delivery = new_jobs.next() => {
                let Some(delivery) = delivery else {
                    anyhow::bail!("new-jobs consumer stream ended");
                };
                let delivery = delivery?;
                match serde_json::from_slice::<UnprocessedJob>(&delivery.data) {
                    Ok(job) => {
                        let (processed, stage) = processor.run(job, quit_rx.clone()).await;
                        match processor.api().post_job_status(&processed).await {
                            Ok(_) => {
                                if stage == Some(PipelineStage::DependencyWait) {
                                    let _ = broker.nack(delivery.delivery_tag, true).await;
                                } else {
                                    let _ = broker.ack(delivery.delivery_tag).await;
                                }
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "could not report job status, requeuing");
                                let _ = broker.nack(delivery.delivery_tag, true).await;
                            }
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "could not decode job, discarding");
                        let _ = broker.nack(delivery.delivery_tag, false).await;
                    }
                }
            }
        }
    }
}
