//! WebSocket endpoint streaming lobby events to seated players.
//!
//! Each socket gets one actor. The server is send-only in the normal path:
//! incoming frames are read for heartbeat liveness and disconnect detection
//! only. Broadcast frames arrive pre-serialized through an unbounded channel
//! whose sender is held by the broadcaster.

use std::sync::Arc;
use std::time::{Duration, Instant};

use actix::{Actor, ActorContext, AsyncContext, Handler, Message, StreamHandler};
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::Deserialize;
use tokio::sync::mpsc;

use faceoff_protocol::DeviceId;

use crate::broadcast::SubscriberId;
use crate::hub::ConnectionHub;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Policy close codes for rejected connections.
const CLOSE_INVALID_DEVICE: u16 = 4001;
const CLOSE_NOT_A_MEMBER: u16 = 4004;

/// Shared state for the WebSocket route.
pub struct WsState {
    pub hub: Arc<ConnectionHub>,
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub device_id: Option<String>,
}

/// Pre-serialized frame forwarded from the broadcaster.
#[derive(Message)]
#[rtype(result = "()")]
struct Frame(String);

/// Subscription id assigned once hub registration completes.
#[derive(Message)]
#[rtype(result = "()")]
struct Registered(SubscriberId);

/// Close the socket with a policy code.
#[derive(Message)]
#[rtype(result = "()")]
struct PolicyClose(u16, &'static str);

pub struct LobbyWsActor {
    code: String,
    device_id: DeviceId,
    hub: Arc<ConnectionHub>,
    frame_tx: Option<mpsc::UnboundedSender<String>>,
    frame_rx: Option<mpsc::UnboundedReceiver<String>>,
    subscriber: Option<SubscriberId>,
    rejection: Option<(u16, &'static str)>,
    last_heartbeat: Instant,
}

impl LobbyWsActor {
    fn new(
        code: String,
        device_id: DeviceId,
        hub: Arc<ConnectionHub>,
        rejection: Option<(u16, &'static str)>,
    ) -> Self {
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        Self {
            code,
            device_id,
            hub,
            frame_tx: Some(frame_tx),
            frame_rx: Some(frame_rx),
            subscriber: None,
            rejection,
            last_heartbeat: Instant::now(),
        }
    }

    fn heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                tracing::debug!(code = %act.code, "websocket heartbeat timeout");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    /// Pumps broadcast frames from the channel into the socket.
    fn start_frame_pump(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        if let Some(mut frame_rx) = self.frame_rx.take() {
            let addr = ctx.address();
            actix::spawn(async move {
                while let Some(frame) = frame_rx.recv().await {
                    if addr.try_send(Frame(frame)).is_err() {
                        break;
                    }
                }
            });
        }
    }
}

impl Actor for LobbyWsActor {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        if let Some((close_code, reason)) = self.rejection.take() {
            ctx.close(Some(ws::CloseReason {
                code: ws::CloseCode::Other(close_code),
                description: Some(reason.to_string()),
            }));
            ctx.stop();
            return;
        }

        self.heartbeat(ctx);
        self.start_frame_pump(ctx);

        let Some(frame_tx) = self.frame_tx.take() else {
            return;
        };
        let addr = ctx.address();
        let hub = Arc::clone(&self.hub);
        let code = self.code.clone();
        let device_id = self.device_id.clone();
        actix::spawn(async move {
            match hub.connect(&code, &device_id, frame_tx).await {
                Ok(id) => {
                    if addr.try_send(Registered(id)).is_err() {
                        // Socket vanished before registration landed.
                        hub.disconnect(&code, &device_id, id).await;
                    }
                }
                Err(err) => {
                    tracing::debug!(%code, %device_id, %err, "websocket connection rejected");
                    let _ = addr.try_send(PolicyClose(
                        CLOSE_NOT_A_MEMBER,
                        "not a member of this lobby",
                    ));
                }
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        if let Some(id) = self.subscriber.take() {
            let hub = Arc::clone(&self.hub);
            let code = self.code.clone();
            let device_id = self.device_id.clone();
            actix::spawn(async move {
                hub.disconnect(&code, &device_id, id).await;
            });
        }
    }
}

impl Handler<Frame> for LobbyWsActor {
    type Result = ();

    fn handle(&mut self, msg: Frame, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

impl Handler<Registered> for LobbyWsActor {
    type Result = ();

    fn handle(&mut self, msg: Registered, _ctx: &mut Self::Context) {
        self.subscriber = Some(msg.0);
    }
}

impl Handler<PolicyClose> for LobbyWsActor {
    type Result = ();

    fn handle(&mut self, msg: PolicyClose, ctx: &mut Self::Context) {
        ctx.close(Some(ws::CloseReason {
            code: ws::CloseCode::Other(msg.0),
            description: Some(msg.1.to_string()),
        }));
        ctx.stop();
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for LobbyWsActor {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(payload)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&payload);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Text(_)) | Ok(ws::Message::Binary(_)) => {
                // Send-only endpoint; client frames still prove liveness.
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Ok(_) => {}
            Err(err) => {
                tracing::debug!(code = %self.code, %err, "websocket protocol error");
                ctx.stop();
            }
        }
    }
}

/// `GET /ws/lobby/{code}?device_id={id}` — upgrade to the lobby stream.
///
/// Rejections are delivered as policy close codes after the upgrade (4001
/// for a missing device id, 4004 for a non-member) so browser clients can
/// distinguish them from transport failures.
pub async fn lobby_ws(
    req: HttpRequest,
    stream: web::Payload,
    path: web::Path<(String,)>,
    query: web::Query<WsQuery>,
    state: web::Data<WsState>,
) -> Result<HttpResponse, actix_web::Error> {
    let code = path.into_inner().0;
    let WsQuery { device_id } = query.into_inner();
    let device_id = device_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(DeviceId::from);

    let hub = Arc::clone(&state.hub);
    let actor = match device_id {
        None => LobbyWsActor::new(
            code,
            DeviceId::from(""),
            hub,
            Some((CLOSE_INVALID_DEVICE, "valid device_id required")),
        ),
        Some(device_id) => {
            if state.hub.is_member(&code, &device_id).await {
                LobbyWsActor::new(code, device_id, hub, None)
            } else {
                LobbyWsActor::new(
                    code,
                    device_id,
                    hub,
                    Some((CLOSE_NOT_A_MEMBER, "not a member of this lobby")),
                )
            }
        }
    };

    ws::start(actor, &req, stream)
}
