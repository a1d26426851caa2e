#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Walking-skeleton end-to-end test over the Unix socket.
//!
//!   1. Start the service on a temp socket and temp database
//!   2. Hello handshake
//!   3. Create a milestone and deliver its work
//!   4. Commit the baseline with both signatures
//!   5. Generate and sign the acceptance certificate
//!   6. Shut down through the watch channel

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::Duration;

use milestone_core::PermissionGate;
use milestone_service::PROTOCOL_VERSION;
use milestone_service::db::open_database;
use milestone_service::ipc;
use milestone_service::service::MilestoneService;

struct TestClient {
    writer: UnixStream,
    reader: BufReader<UnixStream>,
    next_id: i64,
}

impl TestClient {
    fn connect(socket_path: &std::path::Path) -> Self {
        let stream = UnixStream::connect(socket_path).expect("connect to sign-off service");
        stream
            .set_read_timeout(Some(Duration::from_secs(10)))
            .expect("read timeout");
        let writer = stream.try_clone().expect("clone stream");
        Self {
            writer,
            reader: BufReader::new(stream),
            next_id: 0,
        }
    }

    fn rpc(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        let msg = serde_json::json!({ "id": self.next_id, "method": method, "params": params });
        let mut bytes = serde_json::to_vec(&msg).expect("serialize");
        bytes.push(b'\n');
        self.writer.write_all(&bytes).expect("write");
        self.writer.flush().expect("flush");

        let mut line = String::new();
        self.reader.read_line(&mut line).expect("read response");
        let resp: serde_json::Value =
            serde_json::from_str(&line).unwrap_or_else(|e| panic!("parse response: {e}\nraw: {line}"));
        assert_eq!(resp["id"], self.next_id);
        resp
    }

    fn ok(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let resp = self.rpc(method, params);
        assert!(resp.get("result").is_some(), "{method} should succeed: {resp}");
        resp["result"].clone()
    }
}

fn caller(id: &str, role: &str) -> serde_json::Value {
    serde_json::json!({ "user_id": id, "user_name": id, "role": role })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn signoff_over_socket() {
    let dir = tempfile::TempDir::new().unwrap();
    let socket_path = dir.path().join("run").join("signoff.sock");
    let pool = open_database(&dir.path().join("signoff.db"), 4, Duration::from_secs(5)).unwrap();
    let service = Arc::new(MilestoneService::new(pool, PermissionGate::default()));

    let listener = ipc::bind_listener(&socket_path).unwrap();
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let server = tokio::spawn(ipc::serve(service, listener, shutdown_rx));

    let sock = socket_path.clone();
    tokio::task::spawn_blocking(move || {
        let mut client = TestClient::connect(&sock);

        let hello = client.ok(
            "hello",
            serde_json::json!({ "protocol_version": PROTOCOL_VERSION, "client_version": "test" }),
        );
        assert_eq!(hello["protocol_version"], PROTOCOL_VERSION);

        let created = client.ok(
            "milestone.create",
            serde_json::json!({
                "id": "m1",
                "name": "Go-live",
                "baseline": { "date": "2026-09-30", "amount": 1_250_000 }
            }),
        );
        assert_eq!(created["baseline"]["status"], "not_committed");
        assert_eq!(created["status"], "not_started");

        for d in ["d1", "d2"] {
            client.ok(
                "deliverable.put",
                serde_json::json!({
                    "id": d,
                    "milestone_id": "m1",
                    "status": "delivered",
                    "progress": 100
                }),
            );
        }

        client.ok(
            "baseline.sign",
            serde_json::json!({
                "milestone_id": "m1",
                "signatory": "supplier",
                "caller": caller("u-sup", "supplier")
            }),
        );
        let locked = client.ok(
            "baseline.sign",
            serde_json::json!({
                "milestone_id": "m1",
                "signatory": "customer",
                "caller": caller("u-cus", "customer")
            }),
        );
        assert_eq!(locked["baseline"]["locked"], true);
        assert_eq!(locked["status"], "completed");

        let perms = client.ok(
            "milestone.permissions",
            serde_json::json!({ "milestone_id": "m1", "role": "admin" }),
        );
        assert_eq!(perms["reset_baseline"], true);
        assert_eq!(perms["generate_certificate"], true);

        let cert = client.ok(
            "certificate.generate",
            serde_json::json!({
                "milestone_id": "m1",
                "caller": caller("u-cus", "customer"),
                "confirmed": true
            }),
        );
        assert_eq!(cert["status"], "draft");
        assert_eq!(cert["value"], 1_250_000);
        let cert_id = cert["id"].as_str().expect("certificate id").to_string();

        let refused = client.rpc(
            "certificate.sign",
            serde_json::json!({
                "certificate_id": cert_id,
                "signatory": "customer",
                "caller": caller("u-sup", "supplier")
            }),
        );
        assert_eq!(refused["error"]["data"]["category"], "forbidden");

        for (signatory, who) in [("customer", "u-cus"), ("supplier", "u-sup")] {
            client.ok(
                "certificate.sign",
                serde_json::json!({
                    "certificate_id": cert_id,
                    "signatory": signatory,
                    "caller": caller(who, signatory)
                }),
            );
        }

        let view = client.ok("milestone.view", serde_json::json!({ "milestone_id": "m1" }));
        assert_eq!(view["certificate"]["status"], "signed");

        let audit = client.ok("audit.list", serde_json::json!({ "milestone_id": "m1" }));
        assert_eq!(audit["entries"].as_array().map(Vec::len), Some(5));
    })
    .await
    .unwrap();

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server stops on shutdown")
        .unwrap()
        .unwrap();
}
