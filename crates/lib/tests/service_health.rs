//! Integration test: start the bot service on a free port, GET /, assert health JSON.
//! Does not require a Telegram token (the channel is simply disabled). The server
//! task is left running when the test ends.

use lib::config::Config;
use lib::server;
use std::time::Duration;

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    listener.local_addr().expect("local_addr").port()
}

#[tokio::test]
async fn service_health_http_responds_with_running() {
    let port = free_port();

    let mut config = Config::default();
    config.server.port = port;
    config.server.bind = "127.0.0.1".to_string();

    let server_handle = tokio::spawn(async move {
        let _ = server::run_server(config).await;
    });

    let url = format!("http://127.0.0.1:{}/", port);
    let client = reqwest::Client::new();
    let mut last_err = None;
    for _ in 0..100 {
        match client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                let json: serde_json::Value = resp.json().await.expect("parse JSON");
                assert_eq!(json.get("runtime").and_then(|v| v.as_str()), Some("running"));
                assert_eq!(json.get("port").and_then(|v| v.as_u64()), Some(port as u64));
                assert!(json.get("startedAt").and_then(|v| v.as_str()).is_some());
                return;
            }
            Ok(_) => {}
            Err(e) => last_err = Some(e),
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let _ = server_handle.abort();
    panic!(
        "GET {} did not return 200 with health JSON within 5s; last error: {:?}",
        url, last_err
    );
}
