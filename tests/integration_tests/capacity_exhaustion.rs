use std::sync::Arc;

use tacacs_core::{
    dictionary::{AUTHENTICATION_STATUS, AUTH_TYPE, authen_status},
    packet::{Attribute, Packet, PacketKind},
    policy::{PolicyOutcome, StaticPolicyTable},
    policy_fn,
    request::SessionState,
};
use tokio::net::TcpStream;

use crate::integration_tests::common::{send_and_recv, spawn_listener};

fn non_terminal_policy() -> Arc<tacacs_core::policy::PolicyTable> {
    Arc::new(
        StaticPolicyTable::new()
            .recv(
                PacketKind::Authentication,
                "recv Authentication",
                policy_fn!(|req| {
                    req.control.push(Attribute::new(AUTH_TYPE, "PAP"));
                    PolicyOutcome::Ok
                }),
            )
            .process(
                "PAP",
                policy_fn!(|req| {
                    req.session_state = Some(SessionState {
                        vps: vec![Attribute::new("turn", "1")],
                        data: None,
                    });
                    req.reply.set_attr(AUTHENTICATION_STATUS, authen_status::GET_PASS);
                    PolicyOutcome::Handled
                }),
            )
            .build(),
    )
}

// §8 scenario 4: three separate connections opening non-terminal AUTHEN
// conversations against a `max_sessions=2` listener; the first two keep
// their State token, the third's reply carries none.
#[tokio::test]
async fn third_connection_is_refused_state_once_the_store_is_full() {
    let (addr, cancel, handle) = spawn_listener(non_terminal_policy(), 2).await;

    let mut first_stream = TcpStream::connect(addr).await.expect("connects");
    let first_reply = send_and_recv(
        &mut first_stream,
        &mk_packet(addr, 0x1),
    )
    .await;

    let mut second_stream = TcpStream::connect(addr).await.expect("connects");
    let second_reply = send_and_recv(
        &mut second_stream,
        &mk_packet(addr, 0x2),
    )
    .await;

    let mut third_stream = TcpStream::connect(addr).await.expect("connects");
    let third_reply = send_and_recv(
        &mut third_stream,
        &mk_packet(addr, 0x3),
    )
    .await;

    assert!(first_reply.state_token().is_some());
    assert!(second_reply.state_token().is_some());
    assert!(third_reply.state_token().is_none());
    assert_eq!(third_reply.attr(AUTHENTICATION_STATUS), Some(authen_status::GET_PASS));

    cancel.cancel();
    handle.await.expect("listener task joins");
}

fn mk_packet(addr: std::net::SocketAddr, session_id: u32) -> Packet {
    let mut p = Packet::new(PacketKind::Authentication, session_id, 1, addr);
    p.attributes.push(Attribute::new(AUTH_TYPE, "PAP"));
    p
}
