use std::fs::File;
use std::sync::Arc;

use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{
    adapters::http::app_state::AppState,
    infra::{
        config::AppConfig, db::run_migrations, error::InfraError, http_client::try_build_client,
        notification_worker::spawn_notification_worker, postgres_persistence,
        subscription_notifier::HttpSubscriptionNotifier,
    },
    use_cases::{
        change_notification::ChangeNotificationUseCases,
        subscription_query::SubscriptionQueryUseCases,
        webhook_ingestion::{LedgerRepoTrait, WebhookEventRepoTrait, WebhookIngestionUseCases},
    },
};

pub async fn init_app_state(config: AppConfig) -> anyhow::Result<AppState> {
    let postgres_arc = Arc::new(
        postgres_persistence(&config.database_url, config.database_max_connections).await?,
    );
    if config.run_migrations {
        run_migrations(postgres_arc.pool()).await?;
    }

    let event_repo_arc = postgres_arc.clone() as Arc<dyn WebhookEventRepoTrait>;
    let ledger_arc = postgres_arc.clone() as Arc<dyn LedgerRepoTrait>;

    let ingestion_use_cases = WebhookIngestionUseCases::new(
        event_repo_arc.clone(),
        ledger_arc.clone(),
        config.ingestion_config(),
    );
    let subscription_query_use_cases = SubscriptionQueryUseCases::new(ledger_arc);

    let notifications = match &config.notify_url {
        Some(url) => {
            let client = try_build_client(config.notify_timeout).map_err(InfraError::HttpClient)?;
            let notifier = Arc::new(HttpSubscriptionNotifier::new(client, url.clone()));
            tracing::info!(url = %url, "Subscription change notifications enabled");
            let use_cases = Arc::new(ChangeNotificationUseCases::new(
                event_repo_arc,
                notifier,
                config.notifier_config(),
            ));
            Some(spawn_notification_worker(use_cases))
        }
        None => None,
    };

    Ok(AppState {
        config: Arc::new(config),
        ingestion_use_cases: Arc::new(ingestion_use_cases),
        subscription_query_use_cases: Arc::new(subscription_query_use_cases),
        notifications,
    })
}

pub fn init_tracing(log_file: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "subscription_ledger=debug,tower_http=debug".into());

    // Console (pretty logs)
    let console_layer = fmt::layer()
        .with_target(false) // don’t show target (module path)
        .with_level(true)
        .pretty();

    // File (structured JSON logs), only when configured
    let json_layer = log_file.and_then(|path| match File::create(path) {
        Ok(file) => Some(
            fmt::layer()
                .json()
                .with_writer(Arc::new(file))
                .with_current_span(true)
                .with_span_list(true)
                .boxed(),
        ),
        Err(e) => {
            eprintln!("cannot create log file {}: {}", path, e);
            None
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(json_layer)
        .try_init()
        .ok();
}
