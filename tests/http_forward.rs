//! End-to-end tests for the HTTP forwarding path.

use serde_json::Value;

mod common;

fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

#[tokio::test]
async fn missing_target_header_is_rejected_without_upstream_contact() {
    let upstream = common::start_upstream().await;
    let (gateway, _shutdown) = common::start_gateway().await;

    let res = client()
        .get(format!("http://{}/api/items", gateway))
        .header("cookie", format!("{}={}", common::COOKIE, common::token_for("127.0.0.1")))
        .send()
        .await
        .expect("gateway unreachable");

    assert_eq!(res.status(), 400);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "X-Pm-Host header missing");
    assert_eq!(upstream.hits(), 0);
}

#[tokio::test]
async fn forwards_with_rewritten_headers() {
    let upstream = common::start_upstream().await;
    let (gateway, _shutdown) = common::start_gateway().await;

    let res = client()
        .post(format!("http://{}/api/items?page=2", gateway))
        .header("x-pm-host", "127.0.0.1")
        .header("x-pm-port", upstream.addr.port().to_string())
        .header("x-pm-token", "upstream-auth")
        .header("x-forwarded-host", "console.example.com")
        .header("x-forwarded-port", "443")
        .header("cf-connecting-ip", "203.0.113.7")
        .header("cf-ray", "8a1b2c3d")
        .header("cdn-loop", "cloudflare")
        .header("cookie", format!("{}={}", common::COOKIE, common::token_for("127.0.0.1")))
        .body("payload")
        .send()
        .await
        .expect("gateway unreachable");

    assert_eq!(res.status(), 200);
    assert!(res.headers().get("x-request-id").is_some());

    let echoed: Value = res.json().await.unwrap();
    assert_eq!(echoed["method"], "POST");
    assert_eq!(echoed["path"], "/api/items");
    assert_eq!(echoed["query"], "page=2");
    assert_eq!(echoed["body"], "payload");

    let headers = echoed["headers"].as_object().unwrap();
    assert_eq!(headers["host"], "console.example.com");
    assert_eq!(headers["origin"], "console.example.com");
    assert_eq!(headers["x-forwarded-host"], "console.example.com");
    assert_eq!(headers["x-forwarded-for"], "203.0.113.7");
    assert_eq!(headers["x-forwarded-proto"], "https");
    assert_eq!(headers["x-auth-token"], "upstream-auth");
    assert!(headers.get("x-pm-token").is_none());
    assert!(headers.get("x-forwarded-port").is_none());
    assert!(
        headers.keys().all(|k| !k.starts_with("cf-") && !k.starts_with("cdn-loop")),
        "CDN headers leaked: {:?}",
        headers.keys().collect::<Vec<_>>()
    );
    assert_eq!(upstream.hits(), 1);
}

#[tokio::test]
async fn token_bound_to_other_host_is_unauthorized() {
    let upstream = common::start_upstream().await;
    let (gateway, _shutdown) = common::start_gateway().await;

    let res = client()
        .get(format!("http://{}/", gateway))
        .header("x-pm-host", "127.0.0.1")
        .header("x-pm-port", upstream.addr.port().to_string())
        .header("cookie", format!("{}={}", common::COOKIE, common::token_for("10.9.9.9")))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 401);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "Invalid token");
    assert_eq!(upstream.hits(), 0);
}

#[tokio::test]
async fn missing_cookie_is_unauthorized() {
    let (gateway, _shutdown) = common::start_gateway().await;

    let res = client()
        .get(format!("http://{}/", gateway))
        .header("x-pm-host", "127.0.0.1")
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 401);
}

#[tokio::test]
async fn unreachable_upstream_is_bad_gateway() {
    let (gateway, _shutdown) = common::start_gateway().await;

    let res = client()
        .get(format!("http://{}/", gateway))
        .header("x-pm-host", "127.0.0.1")
        .header("x-pm-port", common::closed_port().to_string())
        .header("cookie", format!("{}={}", common::COOKIE, common::token_for("127.0.0.1")))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 502);
    let body: Value = res.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().starts_with("Upstream connection failed"));
}

#[tokio::test]
async fn unusable_target_is_bad_gateway_after_the_token_check() {
    let upstream = common::start_upstream().await;
    let (gateway, _shutdown) = common::start_gateway().await;
    let cookie = format!("{}={}", common::COOKIE, common::token_for("127.0.0.1"));

    let res = client()
        .get(format!("http://{}/", gateway))
        .header("x-pm-host", "127.0.0.1")
        .header("x-forwarded-proto", "gopher")
        .header("cookie", &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 502);
    let body: Value = res.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().starts_with("Upstream connection failed"));

    let res = client()
        .get(format!("http://{}/", gateway))
        .header("x-pm-host", "127.0.0.1")
        .header("x-pm-port", "notaport")
        .header("cookie", &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 502);

    let res = client()
        .get(format!("http://{}/", gateway))
        .header("x-pm-host", "127.0.0.1")
        .header("x-forwarded-proto", "gopher")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 401);

    assert_eq!(upstream.hits(), 0);
}
