//! Transport layer: one TCP connection = one editing session, speaking
//! newline-delimited JSON. Requests are handled strictly in order per
//! connection; watch events are interleaved between replies.

use std::io;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::debug;

use crate::engine::Engine;
use crate::limits::MAX_LINE_LEN;
use crate::model::{ResourceKey, ResourceKind, SessionId};
use crate::protocol::{Request, RequestEnvelope, Response, ResponseEnvelope, EVENT_ID};
use crate::session::Session;

/// Outbound event buffer per session; a stalled reader loses watch events
/// rather than wedging the connection task.
const EVENT_BUFFER: usize = 64;

pub async fn process_connection(socket: TcpStream, engine: Arc<Engine>) -> io::Result<()> {
    let session_id = SessionId::new();
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    let (event_tx, mut event_rx) = mpsc::channel::<ResponseEnvelope>(EVENT_BUFFER);
    let mut session = Session::new(session_id, event_tx);
    debug!("session {session_id} started");

    let result = loop {
        tokio::select! {
            line = framed.next() => {
                match line {
                    None => break Ok(()),
                    Some(Err(e)) => {
                        break Err(io::Error::new(io::ErrorKind::InvalidData, e));
                    }
                    Some(Ok(line)) => {
                        let reply = handle_line(&engine, &mut session, &line).await;
                        if let Err(e) = send(&mut framed, &reply).await {
                            break Err(e);
                        }
                    }
                }
            }
            Some(envelope) = event_rx.recv() => {
                if let Err(e) = send(&mut framed, &envelope).await {
                    break Err(e);
                }
            }
        }
    };

    session.close();
    engine.session_disconnected(session_id).await;
    debug!("session {session_id} ended");
    result
}

async fn send(
    framed: &mut Framed<TcpStream, LinesCodec>,
    envelope: &ResponseEnvelope,
) -> io::Result<()> {
    let text = serde_json::to_string(envelope)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    framed
        .send(text)
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::BrokenPipe, e))
}

async fn handle_line(
    engine: &Arc<Engine>,
    session: &mut Session,
    line: &str,
) -> ResponseEnvelope {
    let envelope: RequestEnvelope = match serde_json::from_str(line) {
        Ok(env) => env,
        // Malformed lines carry no usable correlation id; reply on the
        // event id so well-behaved clients can still spot the failure.
        Err(e) => {
            return ResponseEnvelope::reply(
                EVENT_ID,
                Response::Error { message: format!("bad request: {e}") },
            );
        }
    };

    let label = crate::observability::request_label(&envelope.request);
    let start = std::time::Instant::now();
    let response = dispatch(engine, session, envelope.request).await;
    let status = match &response {
        Response::Error { .. } => "error",
        Response::Rejected { .. } => "rejected",
        _ => "ok",
    };
    metrics::counter!(
        crate::observability::REQUESTS_TOTAL,
        "request" => label,
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        crate::observability::REQUEST_DURATION_SECONDS,
        "request" => label
    )
    .record(start.elapsed().as_secs_f64());

    ResponseEnvelope::reply(envelope.id, response)
}

async fn dispatch(engine: &Arc<Engine>, session: &mut Session, request: Request) -> Response {
    match request {
        Request::ReserveRoom { room_id, slot } => {
            match engine
                .reserve(ResourceKind::Room, room_id, slot, session.id)
                .await
            {
                Ok(()) => Response::Ok,
                Err(e) => Response::from_engine_error(e),
            }
        }
        Request::ReserveProfessor { professor_id, slot } => {
            match engine
                .reserve(ResourceKind::Professor, professor_id, slot, session.id)
                .await
            {
                Ok(()) => Response::Ok,
                Err(e) => Response::from_engine_error(e),
            }
        }
        Request::ReleaseRoom { room_id, slot } => {
            engine
                .release(ResourceKind::Room, room_id, slot, session.id)
                .await;
            Response::Ack
        }
        Request::ReleaseProfessor { professor_id, slot } => {
            engine
                .release(ResourceKind::Professor, professor_id, slot, session.id)
                .await;
            Response::Ack
        }
        Request::CheckRoomConflicts { room_id, slot, window, exclude_block_id } => {
            match engine
                .check_conflicts(ResourceKind::Room, room_id, slot, window, exclude_block_id)
                .await
            {
                Ok(results) => Response::Conflicts { results },
                Err(e) => Response::from_engine_error(e),
            }
        }
        Request::CheckProfessorConflicts { professor_id, slot, window, exclude_block_id } => {
            match engine
                .check_conflicts(
                    ResourceKind::Professor,
                    professor_id,
                    slot,
                    window,
                    exclude_block_id,
                )
                .await
            {
                Ok(results) => Response::Conflicts { results },
                Err(e) => Response::from_engine_error(e),
            }
        }
        Request::ClearSessionBuffer => {
            engine.clear_session_buffer(session.id).await;
            Response::Ack
        }
        Request::Watch { kind, resource_id } => {
            let resource = ResourceKey { kind, id: resource_id };
            match session.watch(&engine.notify, resource) {
                Ok(()) => Response::Ack,
                Err(e) => Response::from_engine_error(e),
            }
        }
        Request::Unwatch { kind, resource_id } => {
            session.unwatch(&ResourceKey { kind, id: resource_id });
            Response::Ack
        }
    }
}
