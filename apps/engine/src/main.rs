//! Voicebot control-plane binary.
//!
//! Connects to ARI's stasis event WebSocket, and for every `StasisStart`
//! spawns a `CallEngine` loop for that call, tearing it down on
//! `StasisEnd`. Cancellation (hangup from the PBX side, ctrl-c) is a single
//! `CancellationToken::cancel()` per call.

mod clinic;

use std::collections::HashMap;
use std::sync::Arc;

use callcore_ari::{AriClient, HttpAriClient, StasisEvent};
use callcore_cache::{RedisCache, SharedCache};
use callcore_config::CallcoreConfig;
use callcore_domain::DomainPort;
use callcore_engine::CallEngine;
use callcore_events::{EventBusRef, TracingEventBus};
use callcore_media::MediaPlaneController;
use callcore_rutcapture::{HttpRutWebhookClient, InMemoryRutWebhookClient, RutCaptureOrchestrator, RutWebhookClient};
use callcore_snoop::SnoopContractStore;
use callcore_stt::{SttSessionClient, WsSttSession};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let config = match CallcoreConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "fatal: configuration error at startup");
            std::process::exit(1);
        }
    };

    let cache: Arc<dyn SharedCache> = match RedisCache::new(&config.redis_url) {
        Ok(cache) => Arc::new(cache),
        Err(err) => {
            error!(%err, "fatal: could not construct redis client");
            std::process::exit(1);
        }
    };

    let ari: Arc<dyn AriClient> = Arc::new(HttpAriClient::new(
        config.ari_base_url.clone(),
        config.ari_username.clone(),
        config.ari_password.clone(),
    ));
    let events: EventBusRef = Arc::new(TracingEventBus);

    let webhook: Arc<dyn RutWebhookClient> = match &config.rut_webhook_url {
        Some(url) => Arc::new(HttpRutWebhookClient::new(url.clone())),
        None => {
            warn!("RUT_WEBHOOK_URL unset; running with an in-memory webhook stub");
            Arc::new(InMemoryRutWebhookClient::rejecting("webhook_not_configured"))
        }
    };

    let http_client = HttpAriClient::new(config.ari_base_url.clone(), config.ari_username.clone(), config.ari_password.clone());
    let mut rx = match http_client.connect_events(&config.ari_app).await {
        Ok(rx) => rx,
        Err(err) => {
            error!(%err, "fatal: could not connect to ari event stream");
            std::process::exit(1);
        }
    };

    info!(app = %config.ari_app, "connected to ari event stream");
    let active_calls: Arc<Mutex<HashMap<String, CancellationToken>>> = Arc::new(Mutex::new(HashMap::new()));

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else {
                    warn!("ari event stream closed");
                    break;
                };
                handle_event(event, &config, &cache, &ari, &events, &webhook, &active_calls).await;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested, cancelling active calls");
                for token in active_calls.lock().await.values() {
                    token.cancel();
                }
                break;
            }
        }
    }
}

async fn handle_event(
    event: StasisEvent,
    config: &CallcoreConfig,
    cache: &Arc<dyn SharedCache>,
    ari: &Arc<dyn AriClient>,
    events: &EventBusRef,
    webhook: &Arc<dyn RutWebhookClient>,
    active_calls: &Arc<Mutex<HashMap<String, CancellationToken>>>,
) {
    match event {
        StasisEvent::StasisStart { channel, args } => {
            let linked_id = linked_id_from_args(&args).unwrap_or_else(|| channel.id.clone());
            info!(linked_id, channel_id = %channel.id, "stasis start");

            let token = CancellationToken::new();
            active_calls.lock().await.insert(channel.id.clone(), token.clone());

            let engine = build_engine(config, cache.clone(), ari.clone(), events.clone(), webhook.clone());
            let channel_id = channel.id.clone();
            let linked_id_owned = linked_id.clone();

            tokio::spawn(async move {
                tokio::select! {
                    _ = run_call(&engine, &linked_id_owned, &channel_id) => {}
                    _ = token.cancelled() => {
                        info!(linked_id = %linked_id_owned, "call cancelled, tearing down");
                    }
                }
                if let Err(err) = engine.teardown(&linked_id_owned).await {
                    warn!(%err, linked_id = %linked_id_owned, "teardown failed");
                }
            });
        }
        StasisEvent::StasisEnd { channel } => {
            let mut calls = active_calls.lock().await;
            if let Some(token) = calls.remove(&channel.id) {
                token.cancel();
            }
        }
        other => {
            tracing::debug!(?other, "unhandled stasis event");
        }
    }
}

fn linked_id_from_args(args: &[String]) -> Option<String> {
    args.iter().find_map(|arg| arg.strip_prefix("linkedId=").map(str::to_string))
}

fn build_engine(
    config: &CallcoreConfig,
    cache: Arc<dyn SharedCache>,
    ari: Arc<dyn AriClient>,
    events: EventBusRef,
    webhook: Arc<dyn RutWebhookClient>,
) -> CallEngine {
    let snoop_store = Arc::new(SnoopContractStore::new(cache.clone()));
    let media = Arc::new(MediaPlaneController::new(
        ari.clone(),
        snoop_store,
        config.ari_app.clone(),
        config.caps.ari_addchannel_max_retries,
    ));

    let stt: Arc<dyn SttSessionClient> = Arc::new(WsSttSession::new(
        "wss://api.openai.com/v1/realtime",
        "https://api.openai.com/v1",
        config.openai_api_key.clone(),
    ));

    let rut = Arc::new(RutCaptureOrchestrator::new(
        cache.clone(),
        webhook,
        events.clone(),
        config.tenant_id.clone().unwrap_or_else(|| "default".to_string()),
        config.caps.early_stable_state_deltas,
    ));

    let domain: Arc<dyn DomainPort> = Arc::new(clinic::ClinicDomain);

    CallEngine::new(
        ari,
        media,
        stt,
        rut,
        domain,
        cache,
        events,
        config.timeouts,
        config.caps,
        config.sounds_root.clone(),
    )
}

async fn run_call(engine: &CallEngine, linked_id: &str, channel_id: &str) {
    let mut machine = match engine.greet(linked_id, channel_id, linked_id).await {
        Ok(machine) => machine,
        Err(err) => {
            error!(%err, linked_id, "greet failed");
            return;
        }
    };

    let mut counters = callcore_turn::TurnCounters::new();
    let mut skip_input = false;
    loop {
        match engine
            .run_turn(linked_id, channel_id, linked_id, &mut machine, &mut counters, &mut skip_input)
            .await
        {
            Ok(callcore_engine::TurnOutcome::Continue) => continue,
            Ok(callcore_engine::TurnOutcome::Ended { reason }) => {
                info!(linked_id, reason, "call ended");
                break;
            }
            Err(err) => {
                error!(%err, linked_id, "turn failed, ending call");
                break;
            }
        }
    }
}
