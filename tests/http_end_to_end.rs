//! End-to-end checks through the Axum host with real sockets.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use migration_gateway::config::{GatewayConfig, LiveConfig, ServiceConfig};
use migration_gateway::lifecycle::{startup, Shutdown};
use migration_gateway::HttpServer;

mod common;
use common::{service, Harness, ScriptedTransport};

async fn start_gateway(
    server: HttpServer,
    shutdown: &Shutdown,
) -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (_, config_updates) = mpsc::unbounded_channel();
    let server_shutdown = shutdown.subscribe();
    let handle = tokio::spawn(async move {
        let _ = server.run(listener, config_updates, server_shutdown).await;
    });
    (addr, handle)
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_retry_on_failure_against_real_backend() {
    let call_count = Arc::new(AtomicU32::new(0));
    let cc = call_count.clone();
    let backend = common::start_programmable_backend(move |_| {
        let cc = cc.clone();
        async move {
            if cc.fetch_add(1, Ordering::SeqCst) < 2 {
                (503, "Service Unavailable".into())
            } else {
                (200, "Success".into())
            }
        }
    })
    .await;

    let mut config = GatewayConfig::default();
    config.retries.base_delay_ms = 10;
    config.retries.jitter_ceiling_ms = 0;
    let mut chat = ServiceConfig::new("chat", format!("http://{backend}").parse().unwrap());
    chat.rollout_percentage = 100;
    config.services.push(chat);

    let live = Arc::new(LiveConfig::new(config.clone()));
    let store = startup::build_counter_store(&config.rate_limit).await;
    let gateway = startup::build_gateway(live.clone(), store);

    let shutdown = Shutdown::new();
    let (addr, server) = start_gateway(HttpServer::new(gateway, live), &shutdown).await;

    let res = client()
        .get(format!("http://{addr}/chat/history"))
        .header("x-correlation-id", "e2e-1")
        .send()
        .await
        .expect("gateway unreachable");

    assert_eq!(res.status(), 200, "Should eventually succeed after retries");
    assert_eq!(call_count.load(Ordering::SeqCst), 3);
    assert_eq!(res.headers()["x-correlation-id"], "e2e-1");
    assert_eq!(res.headers()["x-routed-to"], "new");
    assert_eq!(res.headers()["x-traffic-percentage"], "100");
    assert_eq!(res.headers()["x-ratelimit-remaining"], "99");
    assert_eq!(res.text().await.unwrap(), "Success");

    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_correlation_id_reaches_the_backend() {
    let seen = Arc::new(std::sync::Mutex::new(String::new()));
    let sink = seen.clone();
    let backend = common::start_programmable_backend(move |head| {
        *sink.lock().unwrap() = head;
        async { (200, "ok".into()) }
    })
    .await;

    let mut config = GatewayConfig::default();
    let mut chat = ServiceConfig::new("chat", format!("http://{backend}").parse().unwrap());
    chat.rollout_percentage = 100;
    config.services.push(chat);
    let live = Arc::new(LiveConfig::new(config.clone()));
    let gateway = startup::build_gateway(live.clone(), startup::build_counter_store(&config.rate_limit).await);

    let shutdown = Shutdown::new();
    let (addr, _server) = start_gateway(HttpServer::new(gateway, live), &shutdown).await;

    let res = client()
        .get(format!("http://{addr}/chat?x=1"))
        .header("x-correlation-id", "trace-abc")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    let head = seen.lock().unwrap().to_ascii_lowercase();
    assert!(head.starts_with("get /chat?x=1 "), "{head}");
    assert!(head.contains("x-correlation-id: trace-abc"), "{head}");
    shutdown.trigger();
}

#[tokio::test]
async fn test_unreachable_backend_is_bad_gateway() {
    // Bind then drop to get a port nothing listens on.
    let dead = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();

    let mut config = GatewayConfig::default();
    config.retries.max_attempts = 1;
    let mut chat = ServiceConfig::new("chat", format!("http://{dead}").parse().unwrap());
    chat.rollout_percentage = 100;
    config.services.push(chat);
    let live = Arc::new(LiveConfig::new(config.clone()));
    let gateway = startup::build_gateway(live.clone(), startup::build_counter_store(&config.rate_limit).await);

    let shutdown = Shutdown::new();
    let (addr, _server) = start_gateway(HttpServer::new(gateway, live), &shutdown).await;

    let res = client().get(format!("http://{addr}/chat")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY.as_u16());
    shutdown.trigger();
}

#[tokio::test]
async fn test_concurrent_clients_share_one_ip_quota() {
    let mut config = common::config(vec![service("chat", 100)]);
    config.rate_limit.ip_limit = 150;
    let h = Harness::new(config, ScriptedTransport::always(StatusCode::OK));

    let shutdown = Shutdown::new();
    let server = HttpServer::new(h.gateway.clone(), h.live.clone());
    let (addr, _server) = start_gateway(server, &shutdown).await;

    let concurrency = 20;
    let requests_per_task = 10;
    let client = client();
    let tasks: Vec<_> = (0..concurrency)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move {
                let mut statuses = Vec::new();
                for _ in 0..requests_per_task {
                    let res = client
                        .get(format!("http://{addr}/chat"))
                        .send()
                        .await
                        .unwrap();
                    statuses.push(res.status().as_u16());
                }
                statuses
            })
        })
        .collect();

    let statuses: Vec<u16> = futures_util::future::join_all(tasks)
        .await
        .into_iter()
        .flat_map(|r| r.unwrap())
        .collect();

    let ok = statuses.iter().filter(|s| **s == 200).count();
    let limited = statuses.iter().filter(|s| **s == 429).count();
    assert_eq!(ok, 150);
    assert_eq!(limited, 50);
    assert_eq!(h.transport.count(), 150);
    shutdown.trigger();
}
