use std::sync::Arc;

use anyhow::Context;
use sparkle_cloud::secrets::resolve_repository_credentials;
use sparkle_cloud::{SqsQueue, SsmSecretStore};
use sparkle_comfyui::{ComfyUIEngine, GenerationEngine, ModelRepository};
use sparkle_events::DiscordWebhook;
use tokio_util::sync::CancellationToken;

use sparkle_worker::config::WorkerConfig;
use sparkle_worker::orchestrator::Orchestrator;
use sparkle_worker::telemetry::{self, LogFormat};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    telemetry::init(LogFormat::from_env());

    // --- Configuration ---
    let config = WorkerConfig::from_env().context("Invalid worker configuration")?;
    tracing::info!(
        region = %config.region,
        queue_url = %config.queue_url,
        comfyui = %config.comfyui_api_url,
        model = %config.model_checkpoint,
        "Loaded worker configuration",
    );

    let sdk_config = sparkle_cloud::load_aws_config(config.region.clone()).await;

    // --- Model ---
    let repository = match &config.model_repository_url {
        Some(url) => {
            let secrets = SsmSecretStore::from_config(&sdk_config);
            let credentials = resolve_repository_credentials(
                &secrets,
                &config.user_parameter,
                &config.password_parameter,
            )
            .await
            .context("Failed to resolve model repository credentials")?;
            Some(ModelRepository {
                url: url.clone(),
                credentials,
            })
        }
        None => None,
    };

    let engine = ComfyUIEngine::new(config.engine_config(repository))
        .context("Failed to create ComfyUI client")?;
    let model = engine
        .load_model(&config.model_checkpoint)
        .await
        .with_context(|| format!("Failed to load model {}", config.model_checkpoint))?;

    // --- Queue and notifications ---
    let queue = SqsQueue::from_config(
        &sdk_config,
        config.queue_url.clone(),
        config.dead_letter_queue_url.clone(),
    );
    let notifier = DiscordWebhook::new(config.discord_api_base.clone(), config.webhook_timeout)
        .context("Failed to create webhook client")?;

    let orchestrator = Orchestrator::new(
        Arc::new(queue),
        Arc::new(engine),
        Arc::new(notifier),
        model,
        config.orchestrator_settings(),
    );

    // --- Run until signalled ---
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_cancel.cancel();
    });

    orchestrator.run(cancel).await?;
    tracing::info!("Worker stopped");
    Ok(())
}

/// Wait for SIGINT or SIGTERM. The current job is allowed to finish.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), finishing current job before exit");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, finishing current job before exit");
        }
    }
}
