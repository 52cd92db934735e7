//! End-to-end service behaviour over the scripted transport.

use std::sync::Arc;
use std::time::Duration;

use atlink_core::config::AtlinkConfig;
use atlink_core::error::{ExecutionError, ServiceError};
use atlink_core::models::{CellRole, SignalQuality, Technology};
use atlink_core::service::{ConnectRequest, ModemService};
use atlink_core::test_util::{ScriptedTransport, Step};

fn request(host: &str) -> ConnectRequest {
    ConnectRequest {
        host: host.into(),
        port: Some(22),
        username: "admin".into(),
        password: "s3cret-pass".into(),
        interface: "lte1".into(),
    }
}

/// AT command that reached the modem, recovered from the wrapped string.
fn at_of(wrapped: &str) -> &str {
    wrapped
        .split_once("input=\"")
        .map(|(_, rest)| rest.trim_end_matches('"'))
        .unwrap_or(wrapped)
}

// ─── Connect → send → disconnect ─────────────────────────────────────────────

#[tokio::test]
async fn connect_send_disconnect() {
    let transport = ScriptedTransport::new(|cmd| match at_of(cmd) {
        "ati" => Step::reply("  output: Manufacturer: MikroTik\nOK"),
        "AT+CSQ" => Step::reply("  output: +CSQ: 22,99\nOK"),
        _ => Step::reply("ERROR"),
    })
    .with_password("s3cret-pass");
    let probe = transport.probe();
    let svc = ModemService::new(Arc::new(transport), AtlinkConfig::default());

    let opened = svc.create_session(request("10.0.0.1")).await.unwrap();
    assert!(opened.preview.contains("MikroTik"));

    let out = svc.run_command(&opened.token, "AT+CSQ").await.unwrap();
    assert!(out.contains("+CSQ: 22,99"));

    assert!(svc.end_session(&opened.token).await);
    let err = svc.run_command(&opened.token, "AT+CSQ").await.unwrap_err();
    assert!(matches!(err, ServiceError::SessionNotFound));

    assert_eq!(probe.connect_count(), 1);
    assert_eq!(probe.close_count(), 1);
    assert!(probe.wire(0).is_closed());
}

#[tokio::test]
async fn wrong_password_is_reported_verbatim() {
    let transport = ScriptedTransport::echo().with_password("right");
    let svc = ModemService::new(Arc::new(transport), AtlinkConfig::default());

    let err = svc.create_session(request("10.0.0.1")).await.unwrap_err();
    assert_eq!(
        err.client_message(),
        "ssh connection failed: connection to admin@10.0.0.1:22 rejected: authentication failed"
    );
    assert_eq!(svc.session_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn connect_timeout_creates_nothing() {
    let transport = ScriptedTransport::echo().with_connect_delay(Duration::from_secs(60));
    let svc = ModemService::new(Arc::new(transport), AtlinkConfig::default());

    let err = svc.create_session(request("10.0.0.1")).await.unwrap_err();
    assert_eq!(err.kind(), "connection_failed");
    assert!(err.client_message().contains("timed out"));
    assert_eq!(svc.session_count(), 0);
}

// ─── Concurrency ─────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_session_commands_are_contiguous() {
    let transport = ScriptedTransport::new(|cmd| Step::delayed(cmd, Duration::from_millis(5)));
    let probe = transport.probe();
    let svc = Arc::new(ModemService::new(
        Arc::new(transport),
        AtlinkConfig::default(),
    ));
    let opened = svc.create_session(request("10.0.0.1")).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..10 {
        let svc = Arc::clone(&svc);
        let token = opened.token.clone();
        handles.push(tokio::spawn(async move {
            let at = format!("AT+MARK{i}");
            let out = svc.run_command(&token, &at).await.unwrap();
            (at, out)
        }));
    }
    for handle in handles {
        let (at, out) = handle.await.unwrap();
        assert_eq!(at_of(&out), at);
    }

    let wire = probe.wire(0);
    assert_eq!(wire.max_in_flight(), 1);
    let events = wire.events();
    // preview + 10 commands, each a start immediately followed by its end
    assert_eq!(events.len(), 22);
    for pair in events.chunks(2) {
        let started = pair[0].strip_prefix("start ").unwrap();
        let ended = pair[1].strip_prefix("end ").unwrap();
        assert_eq!(started, ended);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn distinct_sessions_run_in_parallel() {
    let transport = ScriptedTransport::new(|cmd| {
        if at_of(cmd) == "ati" {
            Step::reply("OK")
        } else {
            Step::delayed("OK", Duration::from_millis(100))
        }
    });
    let probe = transport.probe();
    let svc = Arc::new(ModemService::new(
        Arc::new(transport),
        AtlinkConfig::default(),
    ));

    let mut tokens = Vec::new();
    for i in 0..4 {
        let opened = svc.create_session(request(&format!("10.0.0.{i}"))).await.unwrap();
        tokens.push(opened.token);
    }

    let started = std::time::Instant::now();
    let handles: Vec<_> = tokens
        .into_iter()
        .map(|token| {
            let svc = Arc::clone(&svc);
            tokio::spawn(async move { svc.run_command(&token, "AT+SLOW").await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert!(probe.max_in_flight() >= 2);
    assert!(started.elapsed() < Duration::from_millis(390));
}

#[tokio::test(start_paused = true)]
async fn timeout_on_one_session_leaves_others_alone() {
    let transport = ScriptedTransport::new(|cmd| match at_of(cmd) {
        "AT+HANG" => Step::Hang,
        _ => Step::reply("OK"),
    });
    let mut config = AtlinkConfig::default();
    config.timeouts.command = Duration::from_secs(2);
    let svc = ModemService::new(Arc::new(transport), config);

    let stuck = svc.create_session(request("10.0.0.1")).await.unwrap();
    let healthy = svc.create_session(request("10.0.0.2")).await.unwrap();

    let err = svc.run_command(&stuck.token, "AT+HANG").await.unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Execution(ExecutionError::TimedOut(d)) if d == Duration::from_secs(2)
    ));
    assert_eq!(svc.session_count(), 1);
    assert_eq!(svc.run_command(&healthy.token, "ati").await.unwrap(), "OK");
}

#[tokio::test]
async fn disconnect_wakes_queued_command() {
    let transport = ScriptedTransport::new(|cmd| match at_of(cmd) {
        "AT+HANG" => Step::Hang,
        _ => Step::reply("OK"),
    });
    let svc = Arc::new(ModemService::new(
        Arc::new(transport),
        AtlinkConfig::default(),
    ));
    let opened = svc.create_session(request("10.0.0.1")).await.unwrap();

    let running = {
        let svc = Arc::clone(&svc);
        let token = opened.token.clone();
        tokio::spawn(async move { svc.run_command(&token, "AT+HANG").await })
    };
    let queued = {
        let svc = Arc::clone(&svc);
        let token = opened.token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            svc.run_command(&token, "ati").await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(svc.end_session(&opened.token).await);

    for handle in [running, queued] {
        let err = handle.await.unwrap().unwrap_err();
        assert!(err.ends_session());
    }
}

// ─── Expiry ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn sweep_removes_only_old_sessions() {
    let svc = ModemService::new(
        Arc::new(ScriptedTransport::echo()),
        AtlinkConfig::default(),
    );
    let old = svc.create_session(request("10.0.0.1")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    let cutoff = chrono::Utc::now();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let young = svc.create_session(request("10.0.0.2")).await.unwrap();

    assert_eq!(svc.registry().sweep_before(cutoff).await, 1);
    assert!(svc.registry().get(&old.token).is_none());
    assert!(svc.registry().get(&young.token).is_some());
}

#[tokio::test]
async fn sweep_fails_in_flight_command_while_sessions_open() {
    let transport = ScriptedTransport::new(|cmd| match at_of(cmd) {
        "AT+HANG" => Step::Hang,
        other => Step::reply(other.to_string()),
    });
    let svc = Arc::new(ModemService::new(
        Arc::new(transport),
        AtlinkConfig::default(),
    ));
    let old = svc.create_session(request("10.0.0.1")).await.unwrap();
    let running = {
        let svc = Arc::clone(&svc);
        let token = old.token.clone();
        tokio::spawn(async move { svc.run_command(&token, "AT+HANG").await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    let cutoff = chrono::Utc::now();
    tokio::time::sleep(Duration::from_millis(5)).await;

    let opening = {
        let svc = Arc::clone(&svc);
        let old_token = old.token.clone();
        tokio::spawn(async move {
            let mut tokens = Vec::new();
            for i in 0..5 {
                let opened = svc
                    .create_session(request(&format!("10.0.1.{i}")))
                    .await
                    .unwrap();
                let _ = svc.registry().get(&old_token);
                tokens.push(opened.token);
            }
            tokens
        })
    };
    let swept = svc.registry().sweep_before(cutoff).await;
    let young = opening.await.unwrap();

    assert_eq!(swept, 1);
    let err = running.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), "command_failed");
    assert!(err.ends_session());
    assert!(svc.registry().get(&old.token).is_none());
    for token in &young {
        assert!(svc.registry().get(token).is_some());
    }
    assert_eq!(svc.session_count(), young.len());
}

#[tokio::test]
async fn connect_sweeps_expired_sessions() {
    let mut config = AtlinkConfig::default();
    config.session.max_age = Duration::from_millis(20);
    let svc = ModemService::new(Arc::new(ScriptedTransport::echo()), config);

    let first = svc.create_session(request("10.0.0.1")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = svc.create_session(request("10.0.0.2")).await.unwrap();

    assert!(svc.registry().get(&first.token).is_none());
    assert!(svc.registry().get(&second.token).is_some());
}

// ─── Signal snapshot ─────────────────────────────────────────────────────────

#[tokio::test]
async fn snapshot_with_nr_and_carrier_aggregation() {
    let transport = ScriptedTransport::new(|cmd| match at_of(cmd) {
        "ATI" => Step::reply("Manufacturer: MikroTik\nModel: R11e-5G\nIMEI: 350000000000001"),
        "AT+GTCCINFO?" => Step::reply(
            "  output: rat:NR5G-NSA mcc_mnc:22210 tac:1F2E\n\
             pcell: lte_band:1 lte_band_width:20MHz\n\
             channel:300 pci:10\n\
             lte_rsrp:-97 lte_rsrq:-11 lte_sinr:8\n\
             nr_ant0:-80 nr_ant1:-82\n\
             nr_band:n78 nr_band_width:100MHz\n\
             nr_arfcn:636666 nr_pci:400\n\
             nr_rsrp:-92 nr_rsrq:-12 nr_sinr:15",
        ),
        "AT+GTCAINFO?" => Step::reply("scell1: lte_band:3\nchannel:1300 pci:20\nlte_rsrp:-105"),
        _ => Step::reply("OK"),
    });
    let svc = ModemService::new(Arc::new(transport), AtlinkConfig::default());
    let opened = svc.create_session(request("10.0.0.1")).await.unwrap();

    let snap = svc.fetch_signal_snapshot(&opened.token).await.unwrap();
    assert_eq!(snap.identity.imei.as_deref(), Some("350000000000001"));
    assert_eq!(snap.technology.as_deref(), Some("NR5G-NSA"));
    assert_eq!(snap.plmn().as_deref(), Some("222-10"));
    assert_eq!(snap.tac.as_deref(), Some("1F2E"));

    let kinds: Vec<(Technology, CellRole)> =
        snap.cells.iter().map(|c| (c.technology, c.role)).collect();
    assert_eq!(
        kinds,
        [
            (Technology::Lte, CellRole::Primary),
            (Technology::Nr, CellRole::Primary),
            (Technology::Lte, CellRole::Secondary),
        ]
    );
    assert_eq!(snap.cells[1].antennas.len(), 2);
    assert_eq!(snap.band_display, "1+n78+3");
    assert_eq!(snap.channel_display, "300 (1) / 636666 (n78) / 1300 (3)");
    assert_eq!(snap.rsrp_display, "-97dBm");
    assert_eq!(snap.quality, SignalQuality::Good);

    let json = serde_json::to_value(&snap).unwrap();
    assert_eq!(json["quality"], "good");
    assert_eq!(json["cells"][1]["technology"], "NR");
}
