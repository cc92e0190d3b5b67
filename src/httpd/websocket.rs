use crate::app::AppState;
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use bytes::Bytes;
use futures::stream::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::Instrument;

pub async fn handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let span = tracing::debug_span!("websocket");
    let receiver = state.signals_sender().subscribe();
    ws.on_upgrade(move |socket| handle(socket, receiver).instrument(span))
}

async fn handle(socket: WebSocket, receiver: broadcast::Receiver<Bytes>) {
    if let Err(error) = handle_socket(socket, receiver).await {
        tracing::error!(%error, "client error");
    }
}

async fn handle_socket(socket: WebSocket, receiver: broadcast::Receiver<Bytes>) -> Result<()> {
    tracing::info!("websocket handshake");
    let (ws_send, ws_recv) = socket.split();
    // Forwards signal frames to the websocket.
    let send = BroadcastStream::new(receiver)
        .filter_map(|x| async move {
            match x {
                Ok(bytes) => Some(Ok(Message::Binary(bytes.to_vec()))),
                Err(BroadcastStreamRecvError::Lagged(lagged)) => {
                    tracing::info!("client lagged {} frames", lagged);
                    None
                }
            }
        })
        .forward(ws_send);
    // Incoming messages are discarded, but the stream must be polled so that
    // pings get answered.
    let mut receive = ws_recv.skip_while(|r| futures::future::ready(r.is_ok()));
    tokio::select! {
        ret = send => ret?,
        ret = receive.next() => match ret {
            None => anyhow::bail!("websocket closed by client"),
            Some(Ok(_)) => unreachable!(),
            Some(Err(e)) => Err(e)?,
        },
    };
    Ok(())
}
