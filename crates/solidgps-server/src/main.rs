use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
};

use futures_util::{SinkExt, StreamExt};
use solidgps::{build_client, Coordinator, Endpoints, JsonFileStore};
use tokio::sync::broadcast::error::RecvError;
use warp::{
    ws::{Message, WebSocket, Ws},
    Filter,
};

mod bridge;
mod discovery;

use bridge::{Bridge, BridgeMessage};

#[tokio::main]
async fn main() {
    pretty_env_logger::init();
    let config_dir = match dirs::config_dir() {
        Some(dir) => dir.join("solidgps-server"),
        None => {
            log::error!("config dir is required");
            std::process::exit(1);
        }
    };
    let config_file_path = config_dir.join("config.json");
    if !config_file_path.exists() {
        log::error!("expected a config file at {}", config_file_path.display());
        std::process::exit(1);
    }
    let store = Arc::new(JsonFileStore::new(&config_file_path));
    let config = match store.load() {
        Ok(config) => config,
        Err(e) => {
            log::error!("failed to load {}: {e}", config_file_path.display());
            std::process::exit(1);
        }
    };
    let http = match build_client() {
        Ok(http) => http,
        Err(e) => {
            log::error!("failed to build http client: {e}");
            std::process::exit(1);
        }
    };
    if config.devices.is_empty() {
        log::warn!("no devices configured, add one with solidgps-cli");
    }

    let mut bridge = Bridge::default();
    for entry in config.devices.iter().cloned() {
        log::info!("tracking {} ({})", entry.title(), entry.imei());
        let coordinator =
            Coordinator::new(http.clone(), Endpoints::default(), entry, store.clone());
        let poller = bridge.add_device(coordinator, store.clone(), config.update_interval());
        tokio::task::spawn(poller.run());
    }
    let bridge = Arc::new(bridge);

    let ip = config.advertise_ip.unwrap_or(Ipv4Addr::LOCALHOST);
    if let Some(advertise) = config.advertise_ip {
        tokio::task::spawn(discovery::discovery_task(advertise, config.port));
    }
    let addr = SocketAddr::from((ip, config.port));
    log::info!("listening on {addr}");
    warp::serve(routes(bridge).with(warp::log("solidgps-server")))
        .run(addr)
        .await;
}

fn routes(
    bridge: Arc<Bridge>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let entities = warp::path("entities").and(warp::get()).map({
        let bridge = bridge.clone();
        move || warp::reply::json(&bridge.states())
    });
    let event_stream = warp::path("event-stream").and(warp::ws()).map(move |ws: Ws| {
        let bridge = bridge.clone();
        ws.on_upgrade(move |sock| stream_updates(sock, bridge))
    });
    entities.or(event_stream)
}

/// Send every current state, then forward updates until the client leaves.
async fn stream_updates(sock: WebSocket, bridge: Arc<Bridge>) {
    let (mut tx, mut rx) = sock.split();
    let mut updates = bridge.subscribe();
    log::info!("websocket client connected, {} listening", bridge.client_count());
    let mut reader = tokio::task::spawn(async move {
        while let Some(msg) = rx.next().await {
            match msg {
                Ok(msg) if msg.is_close() => break,
                Ok(msg) => log::debug!("ignoring client message {msg:?}"),
                Err(e) => {
                    log::error!("received error {e}");
                    break;
                }
            }
        }
    });
    for state in bridge.states() {
        if !send(&mut tx, &BridgeMessage::State(state)).await {
            reader.abort();
            return;
        }
    }
    loop {
        let update = tokio::select! {
            _ = &mut reader => break,
            update = updates.recv() => update,
        };
        let msg = match update {
            Ok(msg) => msg,
            Err(RecvError::Lagged(n)) => {
                log::warn!("client fell behind, dropped {n} updates");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        if !send(&mut tx, &msg).await {
            break;
        }
    }
    reader.abort();
}

async fn send<S>(tx: &mut S, msg: &BridgeMessage) -> bool
where
    S: futures_util::Sink<Message, Error = warp::Error> + Unpin,
{
    let json = match serde_json::to_string(msg) {
        Ok(json) => json,
        Err(e) => {
            log::error!("Error serializing message {e}");
            return true;
        }
    };
    tx.send(Message::text(json))
        .await
        .map_err(|e| log::debug!("Error sending msg: {e}"))
        .is_ok()
}
