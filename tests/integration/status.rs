#[path = "common/mod.rs"]
mod common;

use std::{
    collections::BTreeMap,
    net::TcpListener,
    sync::{Arc, Barrier},
    thread,
    time::{Duration, Instant},
};

use botstatus::{
    config::NodeConfig,
    model::{ServiceStatus, ServiceType},
    report::{ServerState, render_detailed},
    status::StatusEngine,
};
use common::{FakeNodes, FakeProcessTable, NodeScript, test_config, write_descriptor};
use tempfile::tempdir;

const HOUR: Duration = Duration::from_secs(3600);

#[test]
fn local_and_remote_sources_merge_into_one_snapshot() {
    let temp = tempdir().expect("create tempdir");
    let status_dir = temp.path().join(".bot_status");
    write_descriptor(&status_dir, "bot1", 1234, &["run.py", "bot1"]);
    write_descriptor(&status_dir, "bot2", 2345, &["other.py"]);
    write_descriptor(&status_dir, "bot3", 3456, &["gone.py"]);

    let table = FakeProcessTable::default()
        .with(1234, "python3", &["python3", "run.py", "bot1", "--debug"])
        .with(2345, "python3", &["python3", "recycled.py"]);
    let nodes = Arc::new(FakeNodes::default());
    nodes.set(
        "node1",
        NodeScript::Up(vec![
            ServiceStatus::online("c", "node1", ServiceType::Node),
            ServiceStatus::offline("d", "node1"),
        ]),
    );

    let engine = StatusEngine::new(
        test_config(&status_dir, &["node1"], HOUR),
        Arc::new(table),
        nodes,
    );

    let brief = engine.get_status().expect("status");
    let online: BTreeMap<&str, bool> = brief
        .iter()
        .map(|(name, status)| (name.as_str(), status.online))
        .collect();
    assert_eq!(
        online,
        BTreeMap::from([
            ("bot1", true),
            ("bot2", false),
            ("bot3", false),
            ("c", true),
            ("d", false),
        ])
    );

    let detailed = engine.get_detailed_status().expect("detailed status");
    assert_eq!(detailed["bot1"].server, "local");
    assert_eq!(detailed["bot1"].service_type, Some(ServiceType::Python));
    assert_eq!(detailed["bot2"].service_type, None);
    assert_eq!(detailed["c"].server, "node1");
    assert_eq!(detailed["c"].service_type, Some(ServiceType::Node));
}

#[test]
fn reads_within_interval_are_stable() {
    let temp = tempdir().expect("create tempdir");
    let nodes = Arc::new(FakeNodes::default());
    nodes.set(
        "node1",
        NodeScript::Up(vec![ServiceStatus::online("c", "node1", ServiceType::Node)]),
    );
    let engine = StatusEngine::new(
        test_config(temp.path(), &["node1"], HOUR),
        Arc::new(FakeProcessTable::default()),
        nodes.clone(),
    );

    let first = serde_json::to_vec(&engine.get_status().expect("status")).unwrap();
    // The node changes, but the cache is still fresh.
    nodes.set("node1", NodeScript::Up(Vec::new()));
    let second = serde_json::to_vec(&engine.get_status().expect("status")).unwrap();

    assert_eq!(first, second);
    assert_eq!(nodes.calls(), 1);

    engine.update_status(true).expect("forced refresh");
    assert!(engine.get_status().expect("status").is_empty());
    assert_eq!(nodes.calls(), 2);
}

#[test]
fn failing_node_is_isolated_and_reported() {
    let temp = tempdir().expect("create tempdir");
    let status_dir = temp.path().join(".bot_status");
    write_descriptor(&status_dir, "bot1", 1234, &["run.py"]);
    let table = FakeProcessTable::default().with(1234, "python3.11", &["python3.11", "run.py"]);

    let nodes = Arc::new(FakeNodes::default());
    nodes.set(
        "node1",
        NodeScript::Up(vec![ServiceStatus::online("c", "node1", ServiceType::Node)]),
    );
    nodes.set("node2", NodeScript::Down(502));

    let engine = StatusEngine::new(
        test_config(&status_dir, &["node1", "node2"], HOUR),
        Arc::new(table),
        nodes.clone(),
    );

    let status = engine.get_status().expect("status survives a down node");
    assert!(status["bot1"].online);
    assert!(status["c"].online);

    let down = engine.get_down_server().expect("down servers");
    assert_eq!(down.len(), 1);
    assert!(down["node2"].contains("http://node2.test:8080"));
    assert!(down["node2"].contains("502"));

    let report = engine.detailed_report().expect("report");
    let node2 = report
        .servers
        .iter()
        .find(|server| server.server == "node2")
        .expect("node2 listed");
    assert!(matches!(&node2.state, ServerState::Offline { reason } if reason.contains("502")));
    assert!(render_detailed(&report).contains("Server node2 is offline:\nLast Error: "));

    nodes.set("node2", NodeScript::Up(Vec::new()));
    engine.update_status(true).expect("forced refresh");
    assert!(engine.get_down_server().expect("down servers").is_empty());

    let report = engine.detailed_report().expect("report");
    assert!(
        render_detailed(&report)
            .contains("Server node2 is online:\n  ❔ No service running on this server\n")
    );
}

#[test]
fn node_probes_run_concurrently() {
    let temp = tempdir().expect("create tempdir");
    let nodes = Arc::new(FakeNodes::with_delay(Duration::from_millis(300)));
    let engine = StatusEngine::new(
        test_config(temp.path(), &["node1", "node2", "node3", "node4"], HOUR),
        Arc::new(FakeProcessTable::default()),
        nodes.clone(),
    );

    let started = Instant::now();
    engine.update_status(true).expect("refresh");
    let elapsed = started.elapsed();

    assert_eq!(nodes.calls(), 4);
    assert!(
        elapsed < Duration::from_millis(1000),
        "four 300ms probes took {elapsed:?}, expected them to overlap"
    );
}

#[test]
fn concurrent_forced_refreshes_coalesce() {
    let temp = tempdir().expect("create tempdir");
    let nodes = Arc::new(FakeNodes::with_delay(Duration::from_millis(400)));
    nodes.set(
        "node1",
        NodeScript::Up(vec![ServiceStatus::online("c", "node1", ServiceType::Node)]),
    );
    let engine = Arc::new(StatusEngine::new(
        test_config(temp.path(), &["node1"], HOUR),
        Arc::new(FakeProcessTable::default()),
        nodes.clone(),
    ));

    let callers = 8;
    let barrier = Arc::new(Barrier::new(callers));
    let handles: Vec<_> = (0..callers)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                engine.update_status(true).expect("forced refresh");
                engine.snapshot().expect("snapshot").generation
            })
        })
        .collect();

    let generations: Vec<u64> = handles
        .into_iter()
        .map(|handle| handle.join().expect("caller thread"))
        .collect();

    assert_eq!(nodes.calls(), 1, "only one refresh should have run");
    assert!(generations.iter().all(|generation| *generation == 1));

    let snapshot = engine.snapshot().expect("snapshot");
    assert_eq!(snapshot.services.len(), 1);
    assert!(snapshot.services["c"].online);
}

#[test]
fn forced_refresh_time_is_monotonic() {
    let temp = tempdir().expect("create tempdir");
    let engine = StatusEngine::new(
        test_config(temp.path(), &[], HOUR),
        Arc::new(FakeProcessTable::default()),
        Arc::new(FakeNodes::default()),
    );

    let mut previous = engine.snapshot().expect("snapshot").captured_at;
    for _ in 0..5 {
        engine.update_status(true).expect("forced refresh");
        let current = engine.snapshot().expect("snapshot").captured_at;
        assert!(current >= previous);
        previous = current;
    }
    assert_eq!(engine.snapshot().expect("snapshot").generation, 5);
}

#[test]
fn silent_node_is_bounded_by_request_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind listener");
    let address = format!("http://{}", listener.local_addr().expect("local addr"));
    thread::spawn(move || {
        // Hold every connection open without answering.
        let mut held = Vec::new();
        for stream in listener.incoming().flatten() {
            held.push(stream);
        }
    });

    let temp = tempdir().expect("create tempdir");
    let mut config = test_config(temp.path(), &[], HOUR);
    config.request_timeout = Duration::from_millis(200);
    config.nodes.insert(
        "hung".to_string(),
        NodeConfig {
            address: address.clone(),
            path: "/status".to_string(),
        },
    );
    let engine = StatusEngine::from_config(config).expect("engine");

    let started = Instant::now();
    engine.update_status(true).expect("refresh survives a hung node");
    let elapsed = started.elapsed();

    assert!(
        elapsed < Duration::from_secs(2),
        "refresh took {elapsed:?} despite a 200ms request timeout"
    );
    let down = engine.get_down_server().expect("down servers");
    assert!(down["hung"].contains(&address));
    assert_eq!(engine.snapshot().expect("snapshot").generation, 1);
}
