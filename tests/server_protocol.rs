//! End-to-end tests: a real server on an ephemeral port, driven through the
//! client library and, where the wire format itself matters, raw TCP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

use conveyor_hub::client::ClientCore;
use conveyor_hub::common::messages::{Notification, UserType};
use conveyor_hub::common::model::{TaskFields, TaskStatus};
use conveyor_hub::server::{ServerConfig, ServerMiddleware};
use conveyor_hub::HubError;

const TIMEOUT: Duration = Duration::from_secs(5);

struct TestServer {
    addr: SocketAddr,
    server: Arc<ServerMiddleware>,
    _dir: TempDir,
}

async fn start_server() -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let mut config = ServerConfig::default();
    config.storage.data_dir = dir.path().to_path_buf();
    config.discovery.enabled = false;

    let server = ServerMiddleware::new(config).await.unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server.clone().serve(listener));

    TestServer {
        addr,
        server,
        _dir: dir,
    }
}

async fn client(addr: SocketAddr) -> ClientCore {
    ClientCore::connect(addr, TIMEOUT).await.unwrap()
}

struct RawConnection {
    lines: Lines<BufReader<OwnedReadHalf>>,
    write: OwnedWriteHalf,
}

impl RawConnection {
    async fn open(addr: SocketAddr) -> Self {
        let (read, write) = TcpStream::connect(addr).await.unwrap().into_split();
        Self {
            lines: BufReader::new(read).lines(),
            write,
        }
    }

    async fn send_raw(&mut self, text: &str) {
        self.write.write_all(text.as_bytes()).await.unwrap();
    }

    async fn next(&mut self) -> Option<Value> {
        let line = tokio::time::timeout(TIMEOUT, self.lines.next_line())
            .await
            .unwrap()
            .ok()??;
        Some(serde_json::from_str(&line).unwrap())
    }

    async fn call(&mut self, request: Value) -> Value {
        self.send_raw(&format!("{}\n", request)).await;
        self.next().await.unwrap()
    }
}

fn fields(planned: u64) -> TaskFields {
    TaskFields {
        material: "PET".into(),
        color: "blue".into(),
        speed: "5".into(),
        temperature: "240".into(),
        planned_quantity: planned,
        ..Default::default()
    }
}

/// Poll until `check` holds; presence updates happen after the socket closes.
async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..50 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn login_marks_operator_active_until_disconnect() {
    let test = start_server().await;
    let operator = client(test.addr).await;
    assert_eq!(
        operator.login("operator1", "pass1").await.unwrap(),
        UserType::Operator
    );

    let manager = client(test.addr).await;
    assert_eq!(
        manager.login("manager", "manager").await.unwrap(),
        UserType::Manager
    );
    let operators = manager.get_operators().await.unwrap();
    assert!(operators["operator1"].active);
    assert!(!operators["operator2"].active);

    drop(operator);
    let server = test.server.clone();
    eventually(|| {
        let server = server.clone();
        async move {
            !server
                .store()
                .find_by_username("operator1")
                .await
                .unwrap()
                .unwrap()
                .active
        }
    })
    .await;
}

#[tokio::test]
async fn failed_login_changes_nothing() {
    let test = start_server().await;
    let conn = client(test.addr).await;

    match conn.login("operator1", "wrong").await {
        Err(HubError::Rejected(message)) => assert_eq!(message, "invalid credentials"),
        other => panic!("unexpected {:?}", other),
    }
    assert!(!test.server.sessions().is_online("operator1").await);
    assert!(
        !test
            .server
            .store()
            .find_by_username("operator1")
            .await
            .unwrap()
            .unwrap()
            .active
    );

    // The connection stays usable.
    conn.heartbeat().await.unwrap();
}

#[tokio::test]
async fn second_login_keeps_pushes_on_first_connection() {
    let test = start_server().await;
    let first = client(test.addr).await;
    let mut first_pushes = first.take_notifications().await.unwrap();
    first.login("operator1", "pass1").await.unwrap();

    let second = client(test.addr).await;
    let mut second_pushes = second.take_notifications().await.unwrap();
    second.login("operator1", "pass1").await.unwrap();

    let manager = client(test.addr).await;
    manager.login("manager", "manager").await.unwrap();
    let task_id = manager.add_task("operator1", 0, fields(10)).await.unwrap();

    let Notification::NewTask { task, .. } = tokio::time::timeout(TIMEOUT, first_pushes.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(task.id, task_id);

    // Nothing for the second connection; a heartbeat round trip proves the
    // line is idle rather than slow.
    second.heartbeat().await.unwrap();
    assert!(second_pushes.try_recv().is_err());
}

#[tokio::test]
async fn remaining_connection_takes_over_after_first_disconnects() {
    let test = start_server().await;
    let first = client(test.addr).await;
    first.login("operator1", "pass1").await.unwrap();

    let second = client(test.addr).await;
    let mut second_pushes = second.take_notifications().await.unwrap();
    second.login("operator1", "pass1").await.unwrap();

    drop(first);
    let server = test.server.clone();
    eventually(|| {
        let server = server.clone();
        async move { server.sessions().connection_count("operator1").await == 1 }
    })
    .await;

    assert!(test.server.sessions().is_online("operator1").await);
    assert!(
        test.server
            .store()
            .find_by_username("operator1")
            .await
            .unwrap()
            .unwrap()
            .active
    );

    let manager = client(test.addr).await;
    manager.login("manager", "manager").await.unwrap();
    let task_id = manager.add_task("operator1", 1, fields(15)).await.unwrap();

    let Notification::NewTask { task, conveyor } =
        tokio::time::timeout(TIMEOUT, second_pushes.recv())
            .await
            .unwrap()
            .unwrap();
    assert_eq!(task.id, task_id);
    assert_eq!(conveyor, 1);

    drop(second);
    let server = test.server.clone();
    eventually(|| {
        let server = server.clone();
        async move {
            !server
                .store()
                .find_by_username("operator1")
                .await
                .unwrap()
                .unwrap()
                .active
        }
    })
    .await;
}

#[tokio::test]
async fn add_task_pushes_to_online_operator_only() {
    let test = start_server().await;
    let operator = client(test.addr).await;
    let mut pushes = operator.take_notifications().await.unwrap();
    operator.login("operator1", "pass1").await.unwrap();

    let manager = client(test.addr).await;
    manager.login("manager", "manager").await.unwrap();

    let online_id = manager.add_task("operator1", 1, fields(20)).await.unwrap();
    let offline_id = manager.add_task("operator2", 0, fields(5)).await.unwrap();

    let Notification::NewTask { task, conveyor } = tokio::time::timeout(TIMEOUT, pushes.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(task.id, online_id);
    assert_eq!(conveyor, 1);
    assert_eq!(task.unit, "pcs");
    assert_eq!(task.status, TaskStatus::Active);

    // operator2 finds the task on its next fetch.
    let later = client(test.addr).await;
    later.login("operator2", "pass2").await.unwrap();
    let tasks = later.get_operator_tasks("operator2").await.unwrap();
    assert_eq!(tasks[0].len(), 1);
    assert_eq!(tasks[0][0].id, offline_id);
    assert!(tasks[1].is_empty());
}

#[tokio::test]
async fn quantity_reports_complete_the_task() {
    let test = start_server().await;
    let manager = client(test.addr).await;
    manager.login("manager", "manager").await.unwrap();
    let task_id = manager.add_task("operator3", 0, fields(100)).await.unwrap();

    let operator = client(test.addr).await;
    operator.login("operator3", "pass3").await.unwrap();

    operator
        .update_task_quantity("operator3", 0, &task_id, 60)
        .await
        .unwrap();
    let tasks = operator.get_operator_tasks("operator3").await.unwrap();
    assert_eq!(tasks[0][0].completed_quantity, 60);
    assert_eq!(tasks[0][0].status, TaskStatus::Active);

    operator
        .update_task_quantity("operator3", 0, &task_id, 40)
        .await
        .unwrap();
    let tasks = operator.get_operator_tasks("operator3").await.unwrap();
    assert_eq!(tasks[0][0].completed_quantity, 100);
    assert_eq!(tasks[0][0].status, TaskStatus::Completed);
    assert!(tasks[0][0].completed.is_some());

    match operator
        .update_task_quantity("operator3", 1, &task_id, 1)
        .await
    {
        Err(HubError::Rejected(message)) => assert_eq!(message, "task not found"),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn malformed_json_closes_only_that_connection() {
    let test = start_server().await;
    let mut bad = RawConnection::open(test.addr).await;
    let mut good = RawConnection::open(test.addr).await;

    bad.send_raw("this is not json\n").await;
    assert!(bad.next().await.is_none());

    let reply = good.call(json!({"type": "heartbeat"})).await;
    assert_eq!(reply, json!({"status": "alive"}));
}

#[tokio::test]
async fn wire_level_replies() {
    let test = start_server().await;
    let mut conn = RawConnection::open(test.addr).await;

    for request in [json!({"type": "launch_rocket"}), json!({}), json!({"type": 5})] {
        assert_eq!(
            conn.call(request).await,
            json!({"status": "error", "message": "unknown message type"})
        );
    }

    let reply = conn
        .call(json!({"type": "login", "username": "operator1"}))
        .await;
    assert_eq!(reply["status"], "error");
    assert!(reply["message"]
        .as_str()
        .unwrap()
        .starts_with("invalid request"));

    assert_eq!(
        conn.call(json!({"type": "login", "username": "operator1", "password": "pass1"}))
            .await,
        json!({"status": "success", "user_type": "operator"})
    );

    let tasks = conn
        .call(json!({"type": "get_operator_tasks", "operator": "operator1"}))
        .await;
    assert_eq!(
        tasks,
        json!({"status": "success", "type": "operator_tasks_response", "tasks": [[], []]})
    );

    // Two requests in one segment get two answers in order.
    conn.send_raw("{\"type\":\"heartbeat\"}\n{\"type\":\"get_operators\"}\n")
        .await;
    assert_eq!(conn.next().await.unwrap(), json!({"status": "alive"}));
    let operators = conn.next().await.unwrap();
    assert_eq!(operators["status"], "success");
    assert_eq!(operators["operators"]["operator1"]["active"], true);
    assert!(operators["operators"]["operator1"].get("password").is_none());
}

#[tokio::test]
async fn concurrent_add_operator_keeps_every_account() {
    let test = start_server().await;

    let mut handles = Vec::new();
    for i in 0..10 {
        let addr = test.addr;
        handles.push(tokio::spawn(async move {
            let conn = ClientCore::connect(addr, TIMEOUT).await.unwrap();
            conn.add_operator(&format!("worker{}", i), "secret").await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let manager = client(test.addr).await;
    let operators = manager.get_operators().await.unwrap();
    for i in 0..10 {
        assert!(operators.contains_key(&format!("worker{}", i)));
    }
    assert_eq!(operators.len(), 13);

    match manager.add_operator("worker3", "again").await {
        Err(HubError::Rejected(message)) => assert_eq!(message, "operator already exists"),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn operator_maintenance_and_dictionaries() {
    let test = start_server().await;
    let manager = client(test.addr).await;
    manager.login("manager", "manager").await.unwrap();

    manager
        .update_operator_password("operator2", "fresh")
        .await
        .unwrap();
    let operator = client(test.addr).await;
    assert!(operator.login("operator2", "pass2").await.is_err());
    assert_eq!(
        operator.login("operator2", "fresh").await.unwrap(),
        UserType::Operator
    );

    assert!(manager.remove_operator("operator3").await.unwrap());
    assert!(!manager.remove_operator("operator3").await.unwrap());

    assert_eq!(
        manager.get_dictionary("priorities").await.unwrap(),
        vec!["High", "Medium", "Low"]
    );
    assert!(manager.get_dictionary("flavours").await.is_err());
}
