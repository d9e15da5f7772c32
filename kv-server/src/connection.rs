//! # Connection Handler
//!
//! One task per TCP connection (see `server.rs` for the donor's version of
//! this loop): read into a growing `BytesMut`, parse as many pipelined
//! commands as are available, dispatch each one, and write the reply back.
//! A second source feeds the same socket: the connection's push channel,
//! fed by `PUBLISH` deliveries and by `SUBSCRIBE`-family confirmations past
//! the first channel. `tokio::select!` merges both without a second task.

use bytes::BytesMut;
use kv_common::resp::{RespError, RespParser};
use kv_common::RespValue;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::context::ServerContext;
use crate::dispatch::{self, ConnectionState};

/// Bound on a connection's outstanding pub/sub push messages; a slow
/// subscriber drops messages (see `PubSub::publish`) rather than stalling
/// the publisher.
const PUSH_CHANNEL_CAPACITY: usize = 256;

pub async fn handle_connection(mut stream: TcpStream, ctx: std::sync::Arc<ServerContext>) -> std::io::Result<()> {
    let (push_tx, mut push_rx) = mpsc::channel::<RespValue>(PUSH_CHANNEL_CAPACITY);
    let mut conn = ConnectionState::new(push_tx);

    if let Some(default_user) = ctx.acl.default_user() {
        if default_user.enabled && default_user.nopass {
            conn.user = Some(default_user);
        }
    }

    let mut buffer = BytesMut::with_capacity(8 * 1024);
    let mut parser = RespParser::new();
    let mut out = Vec::new();

    loop {
        tokio::select! {
            biased;

            pushed = push_rx.recv() => {
                match pushed {
                    Some(message) => {
                        out.clear();
                        message.encode(&mut out);
                        stream.write_all(&out).await?;
                    }
                    None => unreachable!("ConnectionState owns the sender half and never drops it early"),
                }
            }

            read = stream.read_buf(&mut buffer) => {
                let n = read?;
                if n == 0 {
                    break;
                }
                loop {
                    match parser.parse(&mut buffer) {
                        Ok(Some(argv)) => {
                            let reply = dispatch::dispatch(&ctx, &mut conn, argv);
                            out.clear();
                            reply.encode(&mut out);
                            stream.write_all(&out).await?;
                        }
                        Ok(None) => break,
                        Err(RespError::Protocol) => {
                            let reply = RespValue::error("ERR Protocol error");
                            out.clear();
                            reply.encode(&mut out);
                            let _ = stream.write_all(&out).await;
                            conn.cancel.cancel();
                            cleanup_subscriptions(&ctx, &conn);
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    conn.cancel.cancel();
    cleanup_subscriptions(&ctx, &conn);
    Ok(())
}

fn cleanup_subscriptions(ctx: &ServerContext, conn: &ConnectionState) {
    for (channel, id) in &conn.subscriptions {
        ctx.pubsub.unsubscribe_channel(channel, *id);
    }
    for (pattern, id) in &conn.psubscriptions {
        ctx.pubsub.unsubscribe_pattern(pattern, *id);
    }
}
