use std::sync::Arc;

use tacacs_core::{
    dictionary::{AUTHENTICATION_STATUS, AUTH_TYPE, AUTH_TYPE_ACCEPT, authen_status},
    packet::{Attribute, Packet, PacketKind},
    policy::{PolicyOutcome, StaticPolicyTable},
    policy_fn,
};
use tokio::net::TcpStream;

use crate::integration_tests::common::{send_and_recv, spawn_listener};

// §8 scenario 1: a single-turn AUTHEN conversation with AuthType=Accept
// gets `AuthenticationStatus=Pass` and leaves no State entry behind.
#[tokio::test]
async fn single_turn_authen_accept_over_a_real_connection() {
    let policy = Arc::new(
        StaticPolicyTable::new()
            .recv(
                PacketKind::Authentication,
                "recv Authentication",
                policy_fn!(|req| {
                    req.control.push(Attribute::new(AUTH_TYPE, AUTH_TYPE_ACCEPT));
                    PolicyOutcome::Ok
                }),
            )
            .build(),
    );

    let (addr, cancel, handle) = spawn_listener(policy, 2).await;
    let mut stream = TcpStream::connect(addr).await.expect("connects to listener");

    let packet = Packet::new(PacketKind::Authentication, 0xAA, 1, addr);
    let reply = send_and_recv(&mut stream, &packet).await;

    assert_eq!(reply.attr(AUTHENTICATION_STATUS), Some(authen_status::PASS));
    assert!(reply.state_token().is_none());

    cancel.cancel();
    handle.await.expect("listener task joins");
}
