//! Discord gateway listener.
//!
//! Minimal websocket loop: hello/identify/heartbeat, then forwards the
//! dispatches the engine cares about into an event channel. Closed or
//! failed connections are re-established with a fixed delay; no resume,
//! every reconnect identifies from scratch.

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use rolekeeper_core::error::{Result, RolekeeperError};
use rolekeeper_core::types::{Member, RoleSet};

/// GUILDS | GUILD_MEMBERS | GUILD_VOICE_STATES | GUILD_MESSAGES
const INTENTS: u64 = 1 | (1 << 1) | (1 << 7) | (1 << 9);

const RECONNECT_DELAY_SECS: u64 = 5;

/// A platform event forwarded to the engine.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// A member's roles or name changed.
    MemberUpdate(Member),
    /// A member joined the community.
    MemberJoin(Member),
    /// A registered command was invoked.
    CommandInvoked {
        name: String,
        interaction_id: String,
        interaction_token: String,
        invoker: Member,
    },
    /// A member wrote a message or changed voice state.
    Activity {
        member_id: String,
        roles: RoleSet,
        vocal: bool,
    },
}

/// Run the gateway listener until the event receiver is dropped.
pub async fn run(gateway_url: String, bot_token: String, events: mpsc::Sender<GatewayEvent>) {
    loop {
        match run_session(&gateway_url, &bot_token, &events).await {
            Ok(()) => tracing::info!("Gateway session ended, reconnecting"),
            Err(e) => tracing::error!("Gateway session failed: {e}"),
        }
        if events.is_closed() {
            return;
        }
        tokio::time::sleep(tokio::time::Duration::from_secs(RECONNECT_DELAY_SECS)).await;
    }
}

async fn run_session(
    gateway_url: &str,
    bot_token: &str,
    events: &mpsc::Sender<GatewayEvent>,
) -> Result<()> {
    let url = format!("{gateway_url}/?v=10&encoding=json");
    let (ws, _response) = tokio_tungstenite::connect_async(&url)
        .await
        .map_err(|e| RolekeeperError::Gateway(format!("Connect failed: {e}")))?;
    tracing::info!("Gateway connected");

    let (mut write, mut read) = ws.split();

    // hello frame carries the heartbeat interval
    let hello = next_payload(&mut read).await?;
    if hello["op"].as_i64() != Some(10) {
        return Err(RolekeeperError::Gateway("Expected hello frame".into()));
    }
    let heartbeat_ms = hello["d"]["heartbeat_interval"].as_u64().unwrap_or(41_250);

    let identify = json!({
        "op": 2,
        "d": {
            "token": bot_token,
            "intents": INTENTS,
            "properties": { "os": "linux", "browser": "rolekeeper", "device": "rolekeeper" },
        },
    });
    write
        .send(WsMessage::Text(identify.to_string()))
        .await
        .map_err(|e| RolekeeperError::Gateway(format!("Identify failed: {e}")))?;

    let mut heartbeat = tokio::time::interval(tokio::time::Duration::from_millis(heartbeat_ms));
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last_seq: Option<i64> = None;

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                let beat = json!({ "op": 1, "d": last_seq });
                write
                    .send(WsMessage::Text(beat.to_string()))
                    .await
                    .map_err(|e| RolekeeperError::Gateway(format!("Heartbeat failed: {e}")))?;
            }
            frame = read.next() => {
                let Some(frame) = frame else {
                    return Ok(());
                };
                match frame {
                    Ok(WsMessage::Text(text)) => {
                        let payload: Value = serde_json::from_str(&text)
                            .map_err(|e| RolekeeperError::Gateway(format!("Invalid JSON: {e}")))?;
                        if let Some(seq) = payload["s"].as_i64() {
                            last_seq = Some(seq);
                        }
                        match payload["op"].as_i64().unwrap_or(-1) {
                            0 => handle_dispatch(&payload, events).await,
                            // reconnect / invalid session: drop and re-identify
                            7 | 9 => return Ok(()),
                            _ => {}
                        }
                    }
                    Ok(WsMessage::Close(frame)) => {
                        tracing::info!("Gateway closed: {frame:?}");
                        return Ok(());
                    }
                    Ok(_) => {}
                    Err(e) => {
                        return Err(RolekeeperError::Gateway(format!("Read failed: {e}")));
                    }
                }
            }
        }
    }
}

async fn next_payload<S>(read: &mut S) -> Result<Value>
where
    S: StreamExt<Item = std::result::Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + Unpin,
{
    while let Some(frame) = read.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => {
                return serde_json::from_str(&text)
                    .map_err(|e| RolekeeperError::Gateway(format!("Invalid JSON: {e}")));
            }
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => return Err(RolekeeperError::Gateway(format!("Read failed: {e}"))),
        }
    }
    Err(RolekeeperError::Gateway("Stream ended before payload".into()))
}

async fn handle_dispatch(payload: &Value, events: &mpsc::Sender<GatewayEvent>) {
    let data = &payload["d"];
    let event = match payload["t"].as_str().unwrap_or_default() {
        "GUILD_MEMBER_UPDATE" => parse_member(data).map(GatewayEvent::MemberUpdate),
        "GUILD_MEMBER_ADD" => parse_member(data).map(GatewayEvent::MemberJoin),
        "INTERACTION_CREATE" => parse_interaction(data),
        "MESSAGE_CREATE" => {
            if data["author"]["bot"].as_bool().unwrap_or(false) {
                None
            } else {
                Some(GatewayEvent::Activity {
                    member_id: data["author"]["id"].as_str().unwrap_or_default().to_string(),
                    roles: parse_roles(&data["member"]["roles"]),
                    vocal: false,
                })
            }
        }
        "VOICE_STATE_UPDATE" => Some(GatewayEvent::Activity {
            member_id: data["user_id"].as_str().unwrap_or_default().to_string(),
            roles: parse_roles(&data["member"]["roles"]),
            vocal: true,
        }),
        _ => None,
    };

    if let Some(event) = event
        && events.send(event).await.is_err()
    {
        tracing::debug!("Gateway event dropped: receiver gone");
    }
}

fn parse_interaction(data: &Value) -> Option<GatewayEvent> {
    // type 2: application command
    if data["type"].as_i64() != Some(2) {
        return None;
    }
    Some(GatewayEvent::CommandInvoked {
        name: data["data"]["name"].as_str()?.to_string(),
        interaction_id: data["id"].as_str()?.to_string(),
        interaction_token: data["token"].as_str()?.to_string(),
        invoker: parse_member(&data["member"])?,
    })
}

fn parse_member(data: &Value) -> Option<Member> {
    let user = &data["user"];
    Some(Member {
        id: user["id"].as_str()?.to_string(),
        username: user["username"].as_str().unwrap_or_default().to_string(),
        nick: data["nick"].as_str().map(str::to_string),
        roles: parse_roles(&data["roles"]),
    })
}

fn parse_roles(value: &Value) -> RoleSet {
    value
        .as_array()
        .map(|roles| {
            roles
                .iter()
                .filter_map(|r| r.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}
