//! Whole-process tests: supervisor on ephemeral ports, in-memory backend,
//! driven over real sockets by an HTTP client and the generated gRPC client.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tonic::Code;

use usersvc_core::{MemoryBackend, PoolConfig, UserRepo, UserStore};
use usersvc_server::rpc::proto::{
    self, user_service_client::UserServiceClient, CreateUserRequest, GetUserRequest,
};
use usersvc_server::{AppContext, Phase, Running, ServerConfig, Supervisor};

fn cris() -> Value {
    json!({
        "firstname": "cris",
        "age": 26,
        "address": {"city": "jakbar", "zipCode": "12345"}
    })
}

fn wire_user(name: &str) -> proto::User {
    proto::User {
        id: 0,
        firstname: name.to_owned(),
        age: 31,
        address: Some(proto::Address {
            city: "bandung".into(),
            zip_code: "40111".into(),
        }),
    }
}

async fn start(repo: Arc<UserRepo<MemoryBackend>>) -> Running {
    let store: Arc<dyn UserStore> = repo;
    Supervisor::new(AppContext::from_shared(store), ServerConfig::ephemeral())
        .start()
        .await
        .expect("supervisor failed to start")
}

async fn repo(backend: MemoryBackend, pool: PoolConfig) -> Arc<UserRepo<MemoryBackend>> {
    Arc::new(UserRepo::connect(backend, pool).await.unwrap())
}

async fn rpc_client(running: &Running) -> UserServiceClient<tonic::transport::Channel> {
    UserServiceClient::connect(format!("http://{}", running.rpc_addr()))
        .await
        .expect("gRPC connect failed")
}

#[tokio::test]
async fn serves_both_front_ends_then_drains() {
    let backend = MemoryBackend::new();
    let running = start(repo(backend.clone(), PoolConfig::default()).await).await;
    let phase = running.phase();
    let base = format!("http://{}", running.http_addr());
    let http = reqwest::Client::new();

    // HTTP round trip
    let created: Value = http
        .post(format!("{base}/users/"))
        .json(&cris())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = created["id"].as_i64().unwrap();
    assert!(id > 0);

    let response = http.get(format!("{base}/users/{id}")).send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "application/json");
    let body = response.text().await.unwrap();
    assert!(body.contains(r#""firstname":"cris""#));
    assert!(body.contains(r#""age":26"#));
    assert!(body.contains(r#""city":"jakbar""#));
    assert!(body.contains(r#""zipCode":"12345""#));

    // A user written over HTTP is readable over gRPC, and the other way round
    let mut rpc = rpc_client(&running).await;
    let fetched = rpc
        .get_user(GetUserRequest { id })
        .await
        .unwrap()
        .into_inner()
        .user
        .unwrap();
    assert_eq!(fetched.firstname, "cris");

    let rpc_id = rpc
        .create_user(CreateUserRequest {
            user: Some(wire_user("ana")),
        })
        .await
        .unwrap()
        .into_inner()
        .id;
    let user: Value = http
        .get(format!("{base}/users/{rpc_id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(user["firstname"], "ana");
    assert_eq!(user["address"]["zipCode"], "40111");

    let http_addr = running.http_addr();
    let rpc_addr = running.rpc_addr();
    drop(rpc);
    running.shutdown().await.unwrap();

    assert_eq!(*phase.borrow(), Phase::Stopped);
    assert_eq!(backend.live_connections(), 0);
    assert!(tokio::net::TcpStream::connect(http_addr).await.is_err());
    assert!(tokio::net::TcpStream::connect(rpc_addr).await.is_err());
}

#[tokio::test]
async fn not_found_over_both_front_ends() {
    let running = start(repo(MemoryBackend::new(), PoolConfig::default()).await).await;

    let response = reqwest::get(format!("http://{}/users/777", running.http_addr()))
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

    let mut rpc = rpc_client(&running).await;
    let status = rpc
        .get_user(GetUserRequest { id: 777 })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::NotFound);

    let status = rpc
        .create_user(CreateUserRequest { user: None })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);

    drop(rpc);
    running.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pool_limit_holds_under_load_from_both_front_ends() {
    let backend = MemoryBackend::with_latency(Duration::from_millis(20));
    let pool = PoolConfig::new(4, 2).unwrap();
    let repo = repo(backend.clone(), pool).await;
    let running = start(Arc::clone(&repo)).await;

    // Sample pool counters while the load runs
    let done = Arc::new(AtomicBool::new(false));
    let peak = Arc::new(AtomicUsize::new(0));
    let sampler = {
        let (repo, done, peak) = (Arc::clone(&repo), Arc::clone(&done), Arc::clone(&peak));
        tokio::spawn(async move {
            while !done.load(Ordering::SeqCst) {
                let status = repo.pool_status();
                peak.fetch_max(status.borrowed, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
    };

    let base = format!("http://{}", running.http_addr());
    let http = reqwest::Client::new();
    let mut tasks = Vec::new();
    for _ in 0..25 {
        let (http, url) = (http.clone(), format!("{base}/users/"));
        tasks.push(tokio::spawn(async move {
            let created: Value = http
                .post(url)
                .json(&cris())
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            created["id"].as_i64().unwrap()
        }));
    }
    for i in 0..25 {
        let mut rpc = rpc_client(&running).await;
        tasks.push(tokio::spawn(async move {
            rpc.create_user(CreateUserRequest {
                user: Some(wire_user(&format!("rpc-{i}"))),
            })
            .await
            .unwrap()
            .into_inner()
            .id
        }));
    }

    let ids: HashSet<i64> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();
    done.store(true, Ordering::SeqCst);
    sampler.await.unwrap();

    assert_eq!(ids.len(), 50);
    assert!(ids.iter().all(|id| *id > 0));
    assert_eq!(backend.user_count(), 50);
    assert!(peak.load(Ordering::SeqCst) <= 4, "pool lent more than max_open");
    assert!(backend.opened_connections() >= 1);

    running.shutdown().await.unwrap();
    assert_eq!(repo.pool_status().open, 0);
    assert_eq!(backend.live_connections(), 0);
}

#[tokio::test]
async fn in_flight_request_finishes_during_drain() {
    let backend = MemoryBackend::with_latency(Duration::from_millis(300));
    let running = start(repo(backend.clone(), PoolConfig::default()).await).await;
    let url = format!("http://{}/users/", running.http_addr());

    let request = tokio::spawn(async move {
        reqwest::Client::new()
            .post(url)
            .json(&cris())
            .send()
            .await
            .map(|response| response.status())
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    running.shutdown().await.unwrap();

    let status = request.await.unwrap().expect("in-flight request was cut off");
    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(backend.user_count(), 1);
    assert_eq!(backend.live_connections(), 0);
}

#[tokio::test]
async fn signal_future_triggers_drain() {
    let backend = MemoryBackend::new();
    let running = start(repo(backend.clone(), PoolConfig::default()).await).await;
    let phase = running.phase();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    let supervisor = tokio::spawn(running.run_until(async {
        let _ = rx.await;
    }));
    assert_eq!(*phase.borrow(), Phase::Running);

    tx.send(()).unwrap();
    supervisor.await.unwrap().unwrap();
    assert_eq!(*phase.borrow(), Phase::Stopped);
    assert_eq!(backend.live_connections(), 0);
}

#[tokio::test]
async fn slow_rpc_call_is_bounded_by_request_timeout() {
    let backend = MemoryBackend::with_latency(Duration::from_millis(500));
    let store: Arc<dyn UserStore> = repo(backend.clone(), PoolConfig::default()).await;
    let config = ServerConfig {
        request_timeout: Duration::from_millis(50),
        ..ServerConfig::ephemeral()
    };
    let running = Supervisor::new(AppContext::from_shared(store), config)
        .start()
        .await
        .unwrap();

    let mut rpc = rpc_client(&running).await;
    let status = rpc
        .create_user(CreateUserRequest {
            user: Some(wire_user("slow")),
        })
        .await
        .unwrap_err();
    assert!(
        matches!(status.code(), Code::Cancelled | Code::DeadlineExceeded),
        "unexpected status {status:?}"
    );

    drop(rpc);
    running.shutdown().await.unwrap();
    assert_eq!(backend.live_connections(), 0);
}
