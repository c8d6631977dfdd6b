//! Given an already-established duplex byte stream, decodes RADIUS
//! packets sequentially and dispatches each concurrently, writing
//! replies back as they arrive rather than in request order.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::dispatch::Dispatcher;
use crate::packet::Packet;

/// Runs the packet pump for one connection until a framing error or
/// idle timeout ends it. `stream` must already be past the TLS
/// handshake; this has no opinion on transport security.
pub async fn handle_connection<S>(
    stream: S,
    dispatcher: Arc<Dispatcher>,
    idle_timeout: Duration,
    remote: SocketAddr,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin + 'static,
{
    let (read_half, write_half): (ReadHalf<S>, WriteHalf<S>) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);
    // Concurrent dispatch tasks all write replies to the same stream;
    // a write is only atomic per-call, so replies must be serialized
    // at the write boundary.
    let writer = Arc::new(Mutex::new(write_half));
    // Shared between the read loop and every spawned reply writer, so
    // a reply that completes writing resets the same idle window the
    // read loop is waiting against, not a disjoint one of its own.
    let deadline = Arc::new(Mutex::new(Instant::now() + idle_timeout));

    loop {
        let decode_fut = Packet::decode_async(&mut reader);
        tokio::pin!(decode_fut);

        let packet = loop {
            let sleep_until = *deadline.lock().await;
            tokio::select! {
                result = &mut decode_fut => {
                    match result {
                        Ok(packet) => {
                            *deadline.lock().await = Instant::now() + idle_timeout;
                            break packet;
                        }
                        Err(e) => {
                            debug!(%remote, error = %e, "framing error, closing connection");
                            return;
                        }
                    }
                }
                _ = tokio::time::sleep_until(sleep_until) => {
                    if Instant::now() >= *deadline.lock().await {
                        debug!(%remote, "connection idle timeout");
                        return;
                    }
                    // The deadline moved past this sleep target while we
                    // were waiting (a reply write completed); loop and
                    // sleep to the new one.
                }
            }
        };

        let dispatcher = dispatcher.clone();
        let writer = writer.clone();
        let deadline = deadline.clone();
        tokio::spawn(async move {
            let reply = match dispatcher.dispatch(&packet).await {
                Ok(reply) => reply,
                Err(e) => {
                    warn!(%remote, error = %e, "dispatch failed");
                    return;
                }
            };

            let bytes = reply.encode();
            let mut write_half = writer.lock().await;
            let write =
                tokio::time::timeout(idle_timeout, write_half.write_all(&bytes)).await;
            match write {
                Err(_elapsed) => warn!(%remote, "reply write timed out"),
                Ok(Err(e)) => warn!(%remote, error = %e, "failed to write reply"),
                Ok(Ok(())) => {
                    *deadline.lock().await = Instant::now() + idle_timeout;
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    fn sample_packet() -> Packet {
        Packet::new(1, 2, Bytes::from_static(&[0x01u8; 26]))
    }

    async fn spawn_echo_upstream() -> std::net::SocketAddr {
        let socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; crate::packet::MAX_PACKET];
            loop {
                match socket.recv_from(&mut buf).await {
                    Ok((n, from)) => {
                        let _ = socket.send_to(&buf[..n], from).await;
                    }
                    Err(_) => break,
                }
            }
        });
        addr
    }

    #[tokio::test]
    async fn handler_echoes_through_fake_upstream() {
        let upstream = spawn_echo_upstream().await;
        let dispatcher = Arc::new(Dispatcher {
            auth_host: upstream.ip().to_string(),
            auth_port: upstream.port(),
            acct_host: upstream.ip().to_string(),
            acct_port: upstream.port(),
            timeout: Duration::from_secs(2),
        });

        let (mut client, server) = tokio::io::duplex(1024);
        let remote: SocketAddr = "127.0.0.1:0".parse().unwrap();
        tokio::spawn(handle_connection(
            server,
            dispatcher,
            Duration::from_secs(5),
            remote,
        ));

        let request = sample_packet().encode();
        client.write_all(&request).await.unwrap();

        let mut response = vec![0u8; request.len()];
        client.read_exact(&mut response).await.unwrap();
        assert_eq!(response, request.to_vec());
    }

    #[tokio::test]
    async fn dispatch_failure_does_not_close_connection() {
        // Auth upstream is a dead port; accounting upstream echoes.
        // Send a failing auth packet first, then an accounting packet
        // on the same connection, and confirm the second still gets a
        // reply: a single failed dispatch must not tear down the
        // connection.
        let dead_addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let acct_upstream = spawn_echo_upstream().await;

        let dispatcher = Arc::new(Dispatcher {
            auth_host: dead_addr.ip().to_string(),
            auth_port: dead_addr.port(),
            acct_host: acct_upstream.ip().to_string(),
            acct_port: acct_upstream.port(),
            timeout: Duration::from_millis(50),
        });

        let (mut client, server) = tokio::io::duplex(1024);
        let remote: SocketAddr = "127.0.0.1:0".parse().unwrap();
        tokio::spawn(handle_connection(
            server,
            dispatcher,
            Duration::from_secs(5),
            remote,
        ));

        let failing_request = sample_packet().encode();
        client.write_all(&failing_request).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        let mut acct_packet = sample_packet();
        acct_packet.code = crate::packet::ACCT_CODE;
        let acct_request = acct_packet.encode();
        client.write_all(&acct_request).await.unwrap();

        let mut response = vec![0u8; acct_request.len()];
        client.read_exact(&mut response).await.unwrap();
        assert_eq!(response, acct_request.to_vec());
    }

    async fn spawn_delayed_echo_upstream(delay: Duration) -> std::net::SocketAddr {
        let socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; crate::packet::MAX_PACKET];
            loop {
                match socket.recv_from(&mut buf).await {
                    Ok((n, from)) => {
                        let payload = buf[..n].to_vec();
                        tokio::time::sleep(delay).await;
                        let _ = socket.send_to(&payload, from).await;
                    }
                    Err(_) => break,
                }
            }
        });
        addr
    }

    #[tokio::test]
    async fn slow_reply_write_extends_idle_deadline() {
        // The upstream reply lands close to the idle window's edge.
        // If a successful reply write didn't push the shared deadline
        // out, the connection would already be considered idle by the
        // time the next packet arrives, even though it arrives well
        // inside the extended window.
        let idle_timeout = Duration::from_millis(300);
        let reply_delay = Duration::from_millis(200);
        let upstream = spawn_delayed_echo_upstream(reply_delay).await;
        let dispatcher = Arc::new(Dispatcher {
            auth_host: upstream.ip().to_string(),
            auth_port: upstream.port(),
            acct_host: upstream.ip().to_string(),
            acct_port: upstream.port(),
            timeout: Duration::from_secs(2),
        });

        let (mut client, server) = tokio::io::duplex(4096);
        let remote: SocketAddr = "127.0.0.1:0".parse().unwrap();
        tokio::spawn(handle_connection(server, dispatcher, idle_timeout, remote));

        let first_request = sample_packet().encode();
        client.write_all(&first_request).await.unwrap();

        let mut first_response = vec![0u8; first_request.len()];
        client.read_exact(&mut first_response).await.unwrap();
        assert_eq!(first_response, first_request.to_vec());

        // Sent ~350ms after the connection opened: past the original
        // 300ms idle window measured from the first decode, but well
        // inside the window as extended by the reply write completing
        // around the 200ms mark.
        tokio::time::sleep(Duration::from_millis(150)).await;

        let second_request = sample_packet().encode();
        client.write_all(&second_request).await.unwrap();
        let mut second_response = vec![0u8; second_request.len()];
        client.read_exact(&mut second_response).await.unwrap();
        assert_eq!(second_response, second_request.to_vec());
    }
}
