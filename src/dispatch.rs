//! Sends one RADIUS packet to the correct upstream and awaits its one
//! reply, under a strict timeout. No pooling, no retries, no
//! identifier demultiplexing: a fresh ephemeral socket per dispatch
//! means the first (and only) datagram it ever receives is the reply.

use std::time::Duration;

use snafu::{OptionExt as _, ResultExt as _};
use tokio::net::{lookup_host, UdpSocket};

use crate::error::{
    BindSnafu, DispatchError, NoAddressSnafu, RecvSnafu, ResolveSnafu, SendSnafu, TimeoutSnafu,
};
use crate::packet::{Packet, MAX_PACKET};

#[derive(Debug, Clone)]
pub struct Dispatcher {
    pub auth_host: String,
    pub auth_port: u16,
    pub acct_host: String,
    pub acct_port: u16,
    pub timeout: Duration,
}

impl Dispatcher {
    pub async fn dispatch(&self, packet: &Packet) -> Result<Packet, DispatchError> {
        let (host, port) = if packet.is_accounting() {
            (&self.acct_host, self.acct_port)
        } else {
            (&self.auth_host, self.auth_port)
        };

        let addr = lookup_host((host.as_str(), port))
            .await
            .context(ResolveSnafu {
                host: host.clone(),
                port,
            })?
            .next()
            .context(NoAddressSnafu {
                host: host.clone(),
                port,
            })?;

        // Fresh, unconnected socket per dispatch: the first datagram
        // this socket ever receives is definitionally the reply to
        // this request, so no RADIUS identifier matching is needed.
        let socket = UdpSocket::bind("0.0.0.0:0").await.context(BindSnafu)?;

        let request = packet.encode();
        socket
            .send_to(&request, addr)
            .await
            .context(SendSnafu)?;

        let mut buf = [0u8; MAX_PACKET];
        let n = match tokio::time::timeout(self.timeout, socket.recv_from(&mut buf)).await {
            Err(_elapsed) => return TimeoutSnafu.fail(),
            Ok(Err(e)) => return Err(e).context(RecvSnafu),
            Ok(Ok((n, _from))) => n,
        };

        Packet::decode_bytes(&buf[..n]).context(crate::error::DecodeSnafu)
        // `socket` drops here on every exit path above, closing it.
    }
}
