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

// §8 scenario 2: turn one returns a non-terminal status and a State token;
// turn two on the *same* TCP connection, carrying that token, gets the
// session-state attributes turn one stashed restored by `to_request`.
#[tokio::test]
async fn two_turn_authen_conversation_restores_session_state_over_one_connection() {
    let policy = Arc::new(
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
                    if let Some(state) = &req.session_state {
                        let got = state.vps.iter().find(|a| a.name == "turn").map(|a| a.value.clone());
                        req.reply.set_attr("RestoredTurn", got.unwrap_or_else(|| "missing".to_string()));
                        PolicyOutcome::Ok
                    } else {
                        req.session_state = Some(SessionState {
                            vps: vec![Attribute::new("turn", "1")],
                            data: None,
                        });
                        req.reply.set_attr(AUTHENTICATION_STATUS, authen_status::GET_PASS);
                        PolicyOutcome::Handled
                    }
                }),
            )
            .build(),
    );

    let (addr, cancel, handle) = spawn_listener(policy, 2).await;
    let mut stream = TcpStream::connect(addr).await.expect("connects to listener");

    let mut first_packet = Packet::new(PacketKind::Authentication, 0x1, 1, addr);
    first_packet.attributes.push(Attribute::new(AUTH_TYPE, "PAP"));
    let first = send_and_recv(&mut stream, &first_packet).await;
    assert_eq!(first.attr(AUTHENTICATION_STATUS), Some(authen_status::GET_PASS));
    let token = first.state_token().expect("first reply carries a State token");

    let mut second_packet = Packet::new(PacketKind::Authentication, 0x1, 3, addr);
    second_packet.attributes.push(Attribute::new(AUTH_TYPE, "PAP"));
    second_packet.set_state_token(token);
    let second = send_and_recv(&mut stream, &second_packet).await;

    assert_eq!(second.attr("RestoredTurn"), Some("1"));
    assert_eq!(second.attr(AUTHENTICATION_STATUS), Some(authen_status::PASS));

    cancel.cancel();
    handle.await.expect("listener task joins");
}
