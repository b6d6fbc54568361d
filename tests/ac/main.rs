//! Access concentrator scenarios
//!
//! Run with: cargo test --test ac

mod harness;

use harness::*;
use kpppoed::l2tp::{L2tpEvent, L2tpProcess};
use kpppoed::protocol::pppoe::tags;
use kpppoed::protocol::{DiscoveryCode, DiscoveryPacket, MacAddr};
use kpppoed::route::RouteKey;
use std::sync::atomic::Ordering;

fn services() -> [&'static str; 2] {
    ["svcA", "svcB"]
}

#[tokio::test]
async fn test_padi_unknown_service_is_ignored() {
    let ac = Harness::start(&services());

    ac.send(&padi(b"svcX"));
    ac.expect_silence().await;
    assert_eq!(ac.metrics.padi_received.get(), 1);
    assert_eq!(ac.metrics.pado_sent.get(), 0);

    ac.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_padi_gets_offer() {
    let ac = Harness::start(&services());

    ac.send(&padi(b"svcA"));
    let pado = ac.recv().await.expect("PADO");
    assert_eq!(pado.code, DiscoveryCode::Offer);
    assert_eq!(pado.src, AC_MAC);
    assert_eq!(pado.dst, CLIENT_MAC);
    assert_eq!(pado.session_id, 0);
    assert_eq!(pado.ac_name(), Some(AC_NAME.as_bytes()));
    assert_eq!(service_names(&pado), vec![b"svcA".to_vec()]);

    ac.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_padi_wildcard_offers_every_service() {
    let ac = Harness::start(&services());

    ac.send(&padi(b""));
    let pado = ac.recv().await.expect("PADO");
    assert_eq!(
        service_names(&pado),
        vec![b"".to_vec(), b"svcA".to_vec(), b"svcB".to_vec()]
    );

    ac.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_offer_echoes_host_uniq_and_relay_id() {
    let ac = Harness::start(&services());

    let cases: [(Option<&[u8]>, Option<&[u8]>); 3] = [
        (Some(&[0xde, 0xad, 0xbe, 0xef]), Some(b"relay")),
        (Some(b""), None),
        (None, Some(b"")),
    ];
    for (host_uniq, relay) in cases {
        let mut request = padi(b"svcB");
        if let Some(h) = host_uniq {
            request.add_tag(tags::HOST_UNIQ, h).unwrap();
        }
        if let Some(r) = relay {
            request.add_tag(tags::RELAY_SESSION_ID, r).unwrap();
        }
        ac.send(&request);

        let pado = ac.recv().await.expect("PADO");
        assert_eq!(pado.host_uniq(), host_uniq);
        assert_eq!(pado.relay_session_id(), relay);
    }

    ac.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_own_frames_are_ignored() {
    let ac = Harness::start(&services());

    let mut looped = padi(b"svcA");
    looped.src = AC_MAC;
    ac.send(&looped);
    ac.expect_silence().await;
    assert_eq!(ac.metrics.padi_received.get(), 0);

    ac.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_padr_opens_session() {
    let ac = Harness::start(&services());

    let mut request = padr(b"svcA");
    request.add_tag(tags::HOST_UNIQ, b"hu").unwrap();
    request.add_tag(tags::AC_COOKIE, b"cookie").unwrap();
    ac.send(&request);

    let pads = ac.recv().await.expect("PADS");
    assert_eq!(pads.code, DiscoveryCode::Confirmation);
    assert_ne!(pads.session_id, 0);
    assert_eq!(pads.service_name(), Some(&b"svcA"[..]));
    assert_eq!(pads.service_name_error(), None);
    assert_eq!(pads.host_uniq(), Some(&b"hu"[..]));
    assert_eq!(pads.ac_cookie(), Some(&b"cookie"[..]));

    let process = ac.process(pads.session_id);
    assert_eq!(process.peer(), CLIENT_MAC);
    assert_eq!(process.lns(), LNS);
    assert_eq!(ac.metrics.active_sessions.load(Ordering::Relaxed), 1);
    assert_eq!(ac.metrics.sessions_opened.get(), 1);

    ac.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_padr_unknown_service_is_refused() {
    let ac = Harness::start(&services());

    ac.send(&padr(b"svcC"));
    let pads = ac.recv().await.expect("PADS");
    assert_eq!(pads.session_id, 0);
    assert_eq!(pads.service_name(), Some(&b"svcC"[..]));
    let reason = String::from_utf8(pads.service_name_error().expect("error tag").to_vec()).unwrap();
    assert!(reason.contains("svcC"), "{}", reason);

    assert!(ac.supervisor.processes().is_empty());
    assert_eq!(ac.metrics.pads_errors.get(), 1);

    ac.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_padr_spawn_failure_is_refused() {
    let ac = Harness::start(&services());
    ac.supervisor.set_fail_spawn(true);

    ac.send(&padr(b"svcA"));
    let pads = ac.recv().await.expect("PADS");
    assert_eq!(pads.session_id, 0);
    let reason = String::from_utf8(pads.service_name_error().expect("error tag").to_vec()).unwrap();
    assert!(reason.starts_with("l2tp daemon"), "{}", reason);
    assert_eq!(ac.metrics.l2tp_spawn_failures.get(), 1);
    assert_eq!(ac.metrics.active_sessions.load(Ordering::Relaxed), 0);

    ac.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_pads_send_failure_closes_session_quietly() {
    let ac = Harness::start(&services());
    ac.peer.fail_sends(true);

    ac.send(&padr(b"svcA"));
    assert!(eventually(|| ac.metrics.discovery_errors.get() == 1).await);
    let processes = ac.supervisor.processes();
    assert_eq!(processes.len(), 1);
    let process = &processes[0];

    // Registered, then closed and reaped through the exit watcher
    assert_eq!(ac.metrics.sessions_opened.get(), 1);
    assert!(eventually(|| ac.metrics.sessions_closed.get() == 1).await);
    assert_eq!(process.signal_count(), 1);
    assert!(process.has_exited());
    assert_eq!(ac.metrics.active_sessions.load(Ordering::Relaxed), 0);
    assert_eq!(ac.metrics.pads_sent.get(), 0);

    ac.peer.fail_sends(false);
    ac.expect_silence().await;
    assert_eq!(ac.metrics.padt_sent.get(), 0);

    ac.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_padt_closes_session() {
    let ac = Harness::start(&services());
    let id = ac.open_session().await;
    let process = ac.process(id);

    ac.send(&padt(CLIENT_MAC, id));
    assert!(eventually(|| process.signal_count() == 1).await);
    assert!(eventually(|| ac.metrics.sessions_closed.get() == 1).await);
    assert_eq!(ac.metrics.active_sessions.load(Ordering::Relaxed), 0);
    // Peer already knows; no PADT back
    ac.expect_silence().await;

    ac.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_padt_from_other_peer_is_rejected() {
    let ac = Harness::start(&services());
    let id = ac.open_session().await;

    let stranger = MacAddr([0x02, 0, 0, 0, 0, 0x99]);
    ac.send(&padt(stranger, id));
    ac.send(&padt(CLIENT_MAC, id.wrapping_add(1).max(1)));
    assert!(eventually(|| ac.metrics.discovery_errors.get() == 2).await);
    assert_eq!(ac.process(id).signal_count(), 0);

    ac.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_inbound_offer_is_rejected() {
    let ac = Harness::start(&services());

    let pado = DiscoveryPacket::offer(CLIENT_MAC, AC_MAC, "rogue", &["svcA"]).unwrap();
    ac.send(&pado);
    assert!(eventually(|| ac.metrics.discovery_errors.get() == 1).await);
    ac.expect_silence().await;

    ac.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_l2tp_up_installs_route() {
    let ac = Harness::start(&services());
    let id = ac.open_session().await;

    assert!(
        ac.supervisor
            .emit(L2tpEvent::SessionUp {
                pppoe_session_id: id,
                tunnel_id: 7,
                session_id: 3,
            })
            .await
    );
    let key = RouteKey::new(7, 3, id, INTERFACE);
    assert!(eventually(|| ac.routes.installed() == vec![key.clone()]).await);
    assert_eq!(ac.metrics.routes_installed.get(), 1);

    // Duplicate up changes nothing
    ac.supervisor
        .emit(L2tpEvent::SessionUp {
            pppoe_session_id: id,
            tunnel_id: 7,
            session_id: 3,
        })
        .await;
    ac.supervisor
        .emit(L2tpEvent::SessionDown {
            pppoe_session_id: id,
            tunnel_id: 7,
            session_id: 3,
        })
        .await;

    // kl2tpd dies: peer gets a PADT and the route goes away
    ac.process(id).exit(1);
    let padt = ac.recv().await.expect("PADT");
    assert_eq!(padt.code, DiscoveryCode::Terminate);
    assert_eq!(padt.session_id, id);
    assert_eq!(padt.dst, CLIENT_MAC);
    assert!(eventually(|| ac.routes.installed().is_empty()).await);
    assert_eq!(ac.routes.null.ops().len(), 2);
    assert!(eventually(|| ac.metrics.sessions_closed.get() == 1).await);

    ac.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_kl2tpd_exit_before_established() {
    let ac = Harness::start(&services());
    let id = ac.open_session().await;

    ac.process(id).exit(1);
    let terminate = ac.recv().await.expect("PADT");
    assert_eq!(terminate.code, DiscoveryCode::Terminate);
    assert_eq!(terminate.session_id, id);
    assert_eq!(terminate.dst, CLIENT_MAC);

    assert!(eventually(|| ac.metrics.sessions_closed.get() == 1).await);
    assert_eq!(ac.metrics.active_sessions.load(Ordering::Relaxed), 0);
    assert!(ac.routes.null.ops().is_empty());

    // Session is gone: a PADT for it is now an unknown session
    ac.send(&padt(CLIENT_MAC, id));
    assert!(eventually(|| ac.metrics.discovery_errors.get() == 1).await);
    ac.expect_silence().await;

    ac.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_route_failure_tears_session_down() {
    let ac = Harness::start(&services());
    ac.routes.set_fail_add(true);
    let id = ac.open_session().await;

    ac.supervisor
        .emit(L2tpEvent::SessionUp {
            pppoe_session_id: id,
            tunnel_id: 7,
            session_id: 3,
        })
        .await;

    let padt = ac.recv().await.expect("PADT");
    assert_eq!(padt.code, DiscoveryCode::Terminate);
    assert_eq!(padt.session_id, id);
    assert!(eventually(|| ac.process(id).signal_count() == 1).await);
    assert!(ac.routes.installed().is_empty());
    assert_eq!(ac.metrics.route_failures.get(), 1);

    ac.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_events_for_unknown_sessions_are_ignored() {
    let ac = Harness::start(&services());
    let id = ac.open_session().await;
    let other = if id == u16::MAX { 1 } else { id + 1 };

    ac.supervisor
        .emit(L2tpEvent::SessionDown {
            pppoe_session_id: other,
            tunnel_id: 1,
            session_id: 1,
        })
        .await;
    ac.supervisor
        .emit(L2tpEvent::SessionUp {
            pppoe_session_id: other,
            tunnel_id: 1,
            session_id: 1,
        })
        .await;

    // Loop is still serving
    ac.send(&padi(b"svcA"));
    assert!(ac.recv().await.is_some());
    assert!(ac.routes.installed().is_empty());

    ac.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_closes_every_session() {
    let ac = Harness::start(&services());

    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(ac.open_session().await);
    }
    let processes: Vec<_> = ids.iter().map(|&id| ac.process(id)).collect();

    ac.request_shutdown().await;
    let mut terminated = Vec::new();
    for _ in 0..ids.len() {
        let padt = ac.recv().await.expect("PADT");
        assert_eq!(padt.code, DiscoveryCode::Terminate);
        terminated.push(padt.session_id);
    }
    terminated.sort_unstable();
    ids.sort_unstable();
    assert_eq!(terminated, ids);

    let metrics = ac.metrics.clone();
    ac.join().await.unwrap();

    for process in &processes {
        assert_eq!(process.signal_count(), 1);
        assert!(process.wait().await.unwrap().success());
    }
    assert_eq!(metrics.padt_sent.get(), 3);
    assert_eq!(metrics.sessions_closed.get(), 3);
}

#[tokio::test]
async fn test_repeated_shutdown_request() {
    let ac = Harness::start(&services());
    ac.open_session().await;

    ac.request_shutdown().await;
    ac.request_shutdown().await;
    ac.join().await.unwrap();
}

#[tokio::test]
async fn test_requests_ignored_during_shutdown() {
    let ac = Harness::start(&services());

    ac.request_shutdown().await;
    ac.send(&padi(b"svcA"));
    let peer_metrics = ac.metrics.clone();
    ac.join().await.unwrap();
    assert_eq!(peer_metrics.pado_sent.get(), 0);
}
