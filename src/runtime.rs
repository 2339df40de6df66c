// Zenoh wiring of the bridge
//
// Opens the session, attaches the link and the telemetry bus, identifies and
// synchronizes the board, then serves commands and services until Ctrl-C.
// Everything that may block on the link is moved to the blocking pool so a
// stalled board never holds up zenoh's callback threads.

use std::path::PathBuf;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::runtime::Handle;
use tracing::{info, warn};
use zenoh::Session;
use zenoh::Wait;
use zenoh::query::Query;
use zenoh::sample::Sample;

use crate::bridge::Bridge;
use crate::bus::ZenohBus;
use crate::config::{
    DEFAULT_SOURCE_TIMEOUT, SERVICE_ROOT, TOPIC_CMD_ENABLE, TOPIC_CMD_ODOM, TOPIC_CMD_POSE,
    TOPIC_CMD_VEL,
};
use crate::error::Result as BridgeResult;
use crate::messages::{EnableCommand, PoseCommand, VelocityCommand};
use crate::scheduler::spawn_heartbeat;
use crate::store::MemoryStore;
use crate::transport::ZenohLink;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Runtime settings, filled from the command line
#[derive(Debug, Clone)]
pub struct Options {
    /// Parameter file loaded at startup
    pub params: Option<PathBuf>,
    /// Write learned parameters back to `params` on shutdown
    pub save: bool,
    pub prefix: String,
    pub connect: Vec<String>,
    pub listen: Vec<String>,
}

fn zenoh_config(options: &Options) -> Result<zenoh::Config, BoxError> {
    let mut config = zenoh::Config::default();
    if !options.connect.is_empty() {
        config.insert_json5("connect/endpoints", &serde_json::to_string(&options.connect)?)?;
    }
    if !options.listen.is_empty() {
        config.insert_json5("listen/endpoints", &serde_json::to_string(&options.listen)?)?;
    }
    Ok(config)
}

fn load_store(options: &Options) -> Result<MemoryStore, BoxError> {
    match &options.params {
        Some(path) if path.exists() => {
            info!("Loading parameters from {}", path.display());
            Ok(MemoryStore::load(path)?)
        }
        Some(path) => {
            warn!("{} not found, starting with empty parameters", path.display());
            Ok(MemoryStore::new())
        }
        None => Ok(MemoryStore::new()),
    }
}

/// Forward JSON samples on `key` to `action` on the blocking pool
async fn subscribe_command<T, F>(session: &Session, key: String, action: F) -> zenoh::Result<()>
where
    T: DeserializeOwned + Send + 'static,
    F: Fn(T) -> BridgeResult<()> + Send + Sync + 'static,
{
    let handle = Handle::current();
    let action = Arc::new(action);
    let topic = key.clone();
    session
        .declare_subscriber(key)
        .callback(move |sample: Sample| {
            let command = match serde_json::from_slice::<T>(&sample.payload().to_bytes()) {
                Ok(command) => command,
                Err(e) => {
                    warn!("Failed to parse command on {}: {}", topic, e);
                    return;
                }
            };
            let action = action.clone();
            let topic = topic.clone();
            handle.spawn_blocking(move || {
                if let Err(e) = action(command) {
                    warn!("Command on {} failed: {}", topic, e);
                }
            });
        })
        .background()
        .await
}

/// Answer queries on `<prefix>/srv/<name>` with the text `action` returns
/// for the query payload
async fn serve<F>(session: &Session, prefix: &str, name: &str, action: F) -> zenoh::Result<()>
where
    F: Fn(&str) -> String + Send + Sync + 'static,
{
    let handle = Handle::current();
    let action = Arc::new(action);
    session
        .declare_queryable(format!("{prefix}/{SERVICE_ROOT}/{name}"))
        .callback(move |query: Query| {
            let argument = query
                .payload()
                .map(|payload| String::from_utf8_lossy(&payload.to_bytes()).trim().to_string())
                .unwrap_or_default();
            let action = action.clone();
            handle.spawn_blocking(move || {
                let text = action(&argument);
                if let Err(e) = query.reply(query.key_expr().clone(), text).wait() {
                    warn!("Failed to reply on {}: {}", query.key_expr(), e);
                }
            });
        })
        .background()
        .await
}

fn outcome(result: BridgeResult<()>) -> String {
    match result {
        Ok(()) => "ok".to_string(),
        Err(e) => e.to_string(),
    }
}

async fn declare_services(session: &Session, prefix: &str, bridge: &Bridge) -> zenoh::Result<()> {
    let b = bridge.clone();
    serve(session, prefix, "service_serial", move |name| b.board_service(name)).await?;
    let b = bridge.clone();
    serve(session, prefix, "process", move |name| outcome(b.update_process(name))).await?;
    let b = bridge.clone();
    serve(session, prefix, "pid", move |name| outcome(b.update_pid(name))).await?;
    let b = bridge.clone();
    serve(session, prefix, "parameter", move |name| outcome(b.update_parameter(name))).await?;
    let b = bridge.clone();
    serve(session, prefix, "constraint", move |_| outcome(b.update_constraint())).await?;
    let b = bridge.clone();
    serve(session, prefix, "emergency", move |_| outcome(b.update_emergency())).await?;
    Ok(())
}

async fn declare_commands(
    session: &Session,
    prefix: &str,
    bridge: &Bridge,
    bus: &ZenohBus,
) -> zenoh::Result<()> {
    let b = bridge.clone();
    let clock = bus.command_clock();
    subscribe_command(session, format!("{prefix}/{TOPIC_CMD_VEL}"), move |cmd: VelocityCommand| {
        clock.touch();
        b.velocity_command(&cmd)
    })
    .await?;

    let b = bridge.clone();
    subscribe_command(session, format!("{prefix}/{TOPIC_CMD_ENABLE}"), move |cmd: EnableCommand| {
        b.enable_command(&cmd)
    })
    .await?;

    for topic in [TOPIC_CMD_POSE, TOPIC_CMD_ODOM] {
        let b = bridge.clone();
        subscribe_command(session, format!("{prefix}/{topic}"), move |cmd: PoseCommand| {
            b.set_pose(&cmd)
        })
        .await?;
    }
    Ok(())
}

pub async fn run(options: Options) -> Result<(), BoxError> {
    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh_config(&options)?).await?;
    let prefix = options.prefix.as_str();

    let store = Arc::new(load_store(&options)?);
    let link = Arc::new(ZenohLink::open(&session, prefix).await?);
    let bus = Arc::new(ZenohBus::open(&session, prefix, DEFAULT_SOURCE_TIMEOUT).await?);
    let bridge = Bridge::new(link, store.clone(), bus.clone(), bus.clone());

    info!("Identifying board on {}/link...", prefix);
    let starting = bridge.clone();
    let identity = tokio::task::spawn_blocking(move || starting.start()).await??;
    info!("{}", identity.summary().trim_end());

    let heartbeat = spawn_heartbeat(bridge.clone());
    let waking = bridge.clone();
    bus.on_connect(move |topic| {
        info!("Consumer on {:?}", topic);
        waking.wake();
    })
    .await?;

    declare_commands(&session, prefix, &bridge, &bus).await?;
    declare_services(&session, prefix, &bridge).await?;
    info!("Bridge running under {}/, Ctrl-C to stop", prefix);

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    heartbeat.abort();

    if options.save {
        match &options.params {
            Some(path) => {
                store.save(path)?;
                info!("Parameters saved to {}", path.display());
            }
            None => warn!("--save given without --params, nothing written"),
        }
    }
    session.close().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> Options {
        Options {
            params: None,
            save: false,
            prefix: "orbus".to_string(),
            connect: Vec::new(),
            listen: Vec::new(),
        }
    }

    #[test]
    fn test_outcome_text() {
        assert_eq!(outcome(Ok(())), "ok");
        let err = crate::error::BridgeError::UnknownTarget("middle".to_string());
        assert_eq!(outcome(Err(err)), "unknown update target \"middle\"");
    }

    #[test]
    fn test_missing_params_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = options();
        options.params = Some(dir.path().join("absent.json"));
        let store = load_store(&options).unwrap();
        assert!(store.keys().is_empty());
    }

    #[test]
    fn test_zenoh_config_endpoints() {
        let mut options = options();
        options.connect = vec!["tcp/127.0.0.1:7447".to_string()];
        assert!(zenoh_config(&options).is_ok());
    }
}
