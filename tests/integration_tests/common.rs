use std::{sync::Arc, time::Duration};

use bytes::BytesMut;
use tacacs_core::{
    cfg::config::ListenerConfig,
    packet::Packet,
    policy::PolicyTable,
    server::{listener::Listener, registry::ConnectionIdAllocator},
    state_store::StateStore,
    wire::{DecodeOutcome, FramedCodec, WireCodec},
};
use tokio::{io::AsyncReadExt, net::TcpStream, task::JoinHandle};
use tokio_util::sync::CancellationToken;

/// Binds a throwaway listener on `127.0.0.1:0` driving `policy` against a
/// fresh `StateStore` capped at `max_sessions`, and spawns its accept loop.
/// Returns the bound address and a handle the caller cancels to shut it
/// down.
pub async fn spawn_listener(policy: Arc<PolicyTable>, max_sessions: u32) -> (std::net::SocketAddr, CancellationToken, JoinHandle<()>) {
    let cfg = ListenerConfig {
        name: "test".to_string(),
        bind_address: "127.0.0.1:0".parse().expect("valid addr"),
        secret: None,
    };
    let store = Arc::new(StateStore::new(max_sessions, Duration::from_secs(30), None));
    let ids = Arc::new(ConnectionIdAllocator::new());

    let listener = Listener::bind(&cfg, store, policy, ids, Duration::from_secs(5))
        .await
        .expect("listener binds");
    let addr = listener.local_addr().expect("listener has a local address");

    let cancel = CancellationToken::new();
    let child = cancel.child_token();
    let handle = tokio::spawn(async move {
        listener.run(child).await;
    });

    (addr, cancel, handle)
}

/// Encodes `packet` with an unobfuscated `FramedCodec`, sends it over
/// `stream`, and decodes the single reply packet that comes back.
pub async fn send_and_recv(stream: &mut TcpStream, packet: &Packet) -> Packet {
    let codec = FramedCodec::new(None);
    codec
        .encode_and_send(packet, packet, stream)
        .await
        .expect("encode/send succeeds");

    let mut buf = BytesMut::with_capacity(256);
    loop {
        match codec.decode(&mut buf, packet.peer) {
            DecodeOutcome::Complete(reply) => return reply,
            DecodeOutcome::Partial | DecodeOutcome::ClientAbort => {},
            DecodeOutcome::Error(e) => panic!("reply failed to decode: {e}"),
        }
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk).await.expect("read reply");
        assert!(n > 0, "connection closed before a full reply arrived");
        buf.extend_from_slice(&chunk[..n]);
    }
}
