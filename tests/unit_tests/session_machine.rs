use std::{sync::Arc, time::Duration};

use tacacs_core::{
    dictionary::{AUTHENTICATION_STATUS, AUTH_TYPE, authen_status},
    packet::{Packet, PacketKind},
    policy::{PolicyOutcome, StaticPolicyTable},
    policy_fn,
    request::ConnectionId,
    state_machine::SessionMachine,
    state_store::StateStore,
};

fn peer() -> std::net::SocketAddr {
    "127.0.0.1:49".parse().expect("valid addr")
}

fn authen_packet(session_id: u32, seq_no: u8) -> Packet {
    Packet::new(PacketKind::Authentication, session_id, seq_no, peer())
}

fn get_pass_policy() -> Arc<tacacs_core::policy::PolicyTable> {
    Arc::new(
        StaticPolicyTable::new()
            .recv(
                PacketKind::Authentication,
                "recv Authentication",
                policy_fn!(|req| {
                    req.control.push(tacacs_core::packet::Attribute::new(AUTH_TYPE, "PAP"));
                    PolicyOutcome::Ok
                }),
            )
            .process(
                "PAP",
                policy_fn!(|req| {
                    req.session_state = Some(tacacs_core::request::SessionState {
                        vps: vec![tacacs_core::packet::Attribute::new("turn", "1")],
                        data: None,
                    });
                    req.reply.set_attr(AUTHENTICATION_STATUS, authen_status::GET_PASS);
                    PolicyOutcome::Handled
                }),
            )
            .build(),
    )
}

// §8 scenario 4: with `max_sessions=2`, two concurrent non-terminal AUTHEN
// conversations fill the store; a third gets no State attribute on its
// reply, and the first two are unaffected.
#[tokio::test]
async fn capacity_exhaustion_drops_state_on_the_overflowing_conversation() {
    let store = Arc::new(StateStore::new(2, Duration::from_secs(30), None));
    let policy = get_pass_policy();
    let machine = SessionMachine::new(store.clone(), policy);

    let first = machine.run(ConnectionId(1), authen_packet(0x1, 1)).await;
    let second = machine.run(ConnectionId(2), authen_packet(0x2, 1)).await;
    let third = machine.run(ConnectionId(3), authen_packet(0x3, 1)).await;

    assert!(first.state_token().is_some());
    assert!(second.state_token().is_some());
    assert!(third.state_token().is_none());
    assert_eq!(third.attr(AUTHENTICATION_STATUS), Some(authen_status::GET_PASS));
    assert_eq!(store.len(), 2);
}

// A reply with no `AuthenticationStatus` at all (no `recv`/`process`
// section produced one) still discards any previously-persisted state
// rather than leaving a dangling entry.
#[tokio::test]
async fn missing_authentication_status_discards_state() {
    let store = Arc::new(StateStore::new(2, Duration::from_secs(30), None));
    let policy = Arc::new(tacacs_core::policy::PolicyTable::new());
    let machine = SessionMachine::new(store.clone(), policy);

    let reply = machine.run(ConnectionId(1), authen_packet(0xAA, 1)).await;
    assert!(reply.attr(AUTHENTICATION_STATUS).is_none());
    assert_eq!(store.len(), 0);
}
