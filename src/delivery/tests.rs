use super::*;
use serde_json::json;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use tempfile::TempDir;

/// transport replaying canned results and recording what it was sent
struct ScriptedTransport {
    script: RefCell<VecDeque<Result<HttpResponse, NetworkError>>>,
    sent: RefCell<Vec<(JsonValue, Vec<(String, String)>)>>,
    /// file rewritten with new content on every call
    rewrite: Option<(PathBuf, String)>,
}

impl ScriptedTransport {
    fn new(script: Vec<Result<HttpResponse, NetworkError>>) -> Self {
        Self {
            script: RefCell::new(script.into()),
            sent: RefCell::new(Vec::new()),
            rewrite: None,
        }
    }

    fn calls(&self) -> usize {
        self.sent.borrow().len()
    }
}

impl Transport for ScriptedTransport {
    fn post_json(
        &self,
        _url: &str,
        payload: &JsonValue,
        headers: &[(String, String)],
    ) -> Result<HttpResponse, NetworkError> {
        self.sent
            .borrow_mut()
            .push((payload.clone(), headers.to_vec()));
        if let Some((path, content)) = &self.rewrite {
            fs::write(path, content).unwrap();
        }
        self.script
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(NetworkError("script exhausted".into())))
    }
}

fn respond(status: u16, body: &str) -> Result<HttpResponse, NetworkError> {
    Ok(HttpResponse {
        status,
        body: body.to_string(),
    })
}

fn no_wait(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        backoff_factor: 0.0,
    }
}

fn payload_file(dir: &TempDir, content: &str) -> PathBuf {
    let path = dir.path().join("payload__0123456789.json");
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_always_500_exhausts_attempts() {
    let dir = TempDir::new().unwrap();
    let path = payload_file(&dir, r#"{"a": 1}"#);
    let transport = ScriptedTransport::new(vec![
        respond(500, "first"),
        respond(500, "second"),
        respond(500, "third"),
        respond(200, "never reached"),
    ]);

    let client = DeliveryClient::new(&transport, no_wait(3), &[]);
    let outcome = client.post("http://example.invalid/data", &path).unwrap();

    assert_eq!(transport.calls(), 3);
    assert_eq!(
        outcome,
        DeliveryOutcome {
            status: Some(500),
            body: "third".into(),
            attempts: 3
        }
    );
    assert!(!outcome.is_success());
}

#[test]
fn test_503_then_200_succeeds_on_second_attempt() {
    let dir = TempDir::new().unwrap();
    let path = payload_file(&dir, r#"{"a": 1}"#);
    let transport = ScriptedTransport::new(vec![respond(503, "busy"), respond(200, "ok")]);

    let client = DeliveryClient::new(&transport, no_wait(5), &[]);
    let outcome = client.post("http://example.invalid/data", &path).unwrap();

    assert_eq!(transport.calls(), 2);
    assert_eq!(outcome.status, Some(200));
    assert_eq!(outcome.body, "ok");
    assert_eq!(outcome.attempts, 2);
    assert!(outcome.is_success());
}

#[test]
fn test_network_failure_has_no_status() {
    let dir = TempDir::new().unwrap();
    let path = payload_file(&dir, "[]");
    let transport = ScriptedTransport::new(vec![
        Err(NetworkError("connection refused".into())),
        Err(NetworkError("connection reset".into())),
    ]);

    let client = DeliveryClient::new(&transport, no_wait(2), &[]);
    let outcome = client.post("http://example.invalid/data", &path).unwrap();

    assert_eq!(outcome.status, None);
    assert_eq!(outcome.body, "connection reset");
    assert_eq!(outcome.attempts, 2);
    assert!(!outcome.is_success());
}

#[test]
fn test_last_attempt_outcome_wins() {
    // a network error after an HTTP failure reports the network error
    let dir = TempDir::new().unwrap();
    let path = payload_file(&dir, "{}");
    let transport = ScriptedTransport::new(vec![
        respond(502, "bad gateway"),
        Err(NetworkError("timed out".into())),
    ]);

    let outcome = DeliveryClient::new(&transport, no_wait(2), &[])
        .post("http://example.invalid/data", &path)
        .unwrap();
    assert_eq!(outcome.status, None);
    assert_eq!(outcome.body, "timed out");
}

#[test]
fn test_non_2xx_success_boundaries() {
    let dir = TempDir::new().unwrap();
    let path = payload_file(&dir, "{}");

    let transport = ScriptedTransport::new(vec![respond(299, "")]);
    let outcome = DeliveryClient::new(&transport, no_wait(3), &[])
        .post("http://example.invalid/data", &path)
        .unwrap();
    assert_eq!((outcome.status, outcome.attempts), (Some(299), 1));

    let transport = ScriptedTransport::new(vec![respond(300, ""), respond(199, "")]);
    let outcome = DeliveryClient::new(&transport, no_wait(2), &[])
        .post("http://example.invalid/data", &path)
        .unwrap();
    assert_eq!((outcome.status, outcome.attempts), (Some(199), 2));
}

#[test]
fn test_payload_is_reread_each_attempt() {
    let dir = TempDir::new().unwrap();
    let path = payload_file(&dir, r#"{"version": 1}"#);
    let mut transport = ScriptedTransport::new(vec![respond(500, ""), respond(200, "")]);
    transport.rewrite = Some((path.clone(), r#"{"version": 2}"#.to_string()));

    DeliveryClient::new(&transport, no_wait(2), &[])
        .post("http://example.invalid/data", &path)
        .unwrap();

    let sent = transport.sent.borrow();
    assert_eq!(sent[0].0, json!({"version": 1}));
    assert_eq!(sent[1].0, json!({"version": 2}));
}

#[test]
fn test_headers_include_user_agent_and_extras() {
    let dir = TempDir::new().unwrap();
    let path = payload_file(&dir, "{}");
    let transport = ScriptedTransport::new(vec![respond(201, "")]);
    let extra = vec![("Authorization".to_string(), "Bearer abc".to_string())];

    DeliveryClient::new(&transport, no_wait(1), &extra)
        .post("http://example.invalid/data", &path)
        .unwrap();

    let sent = transport.sent.borrow();
    let headers = &sent[0].1;
    assert!(headers.contains(&("User-Agent".to_string(), USER_AGENT.to_string())));
    assert!(headers.contains(&("Authorization".to_string(), "Bearer abc".to_string())));
}

#[test]
fn test_user_agent_header_overrides_default() {
    let dir = TempDir::new().unwrap();
    let path = payload_file(&dir, "{}");
    let transport = ScriptedTransport::new(vec![respond(200, "")]);
    let extra = vec![("user-agent".to_string(), "deploy-bot/2".to_string())];

    DeliveryClient::new(&transport, no_wait(1), &extra)
        .post("http://example.invalid/data", &path)
        .unwrap();

    let sent = transport.sent.borrow();
    let agents: Vec<&(String, String)> = sent[0]
        .1
        .iter()
        .filter(|(name, _)| name.eq_ignore_ascii_case("user-agent"))
        .collect();
    assert_eq!(
        agents,
        vec![&("user-agent".to_string(), "deploy-bot/2".to_string())]
    );
}

#[test]
fn test_missing_payload_is_an_error() {
    let dir = TempDir::new().unwrap();
    let transport = ScriptedTransport::new(vec![respond(200, "")]);

    let result = DeliveryClient::new(&transport, no_wait(3), &[])
        .post("http://example.invalid/data", &dir.path().join("missing.json"));

    assert!(matches!(result, Err(DeliveryError::Payload { .. })));
    assert_eq!(transport.calls(), 0);
}

#[test]
fn test_invalid_payload_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = payload_file(&dir, "{not json");
    let transport = ScriptedTransport::new(vec![respond(200, "")]);

    let result = DeliveryClient::new(&transport, no_wait(3), &[])
        .post("http://example.invalid/data", &path);

    assert!(matches!(result, Err(DeliveryError::InvalidPayload { .. })));
    assert_eq!(transport.calls(), 0);
}

#[test]
fn test_backoff_grows_exponentially() {
    let policy = RetryPolicy {
        max_attempts: 5,
        backoff_factor: 2.0,
    };
    assert_eq!(policy.delay(1), Duration::from_secs(2));
    assert_eq!(policy.delay(2), Duration::from_secs(4));
    assert_eq!(policy.delay(3), Duration::from_secs(8));

    let delays: Vec<_> = (1..=20).map(|a| policy.delay(a)).collect();
    assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(
        policy.delay(20),
        Duration::from_secs_f64(MAX_BACKOFF_SECS),
        "capped"
    );
}

#[test]
fn test_tls_verify_parse() {
    assert_eq!(TlsVerify::parse("true"), TlsVerify::Enabled);
    assert_eq!(TlsVerify::parse("YES"), TlsVerify::Enabled);
    assert_eq!(TlsVerify::parse("1"), TlsVerify::Enabled);
    assert_eq!(TlsVerify::parse("False"), TlsVerify::Disabled);
    assert_eq!(TlsVerify::parse("no"), TlsVerify::Disabled);
    assert_eq!(
        TlsVerify::parse("/etc/ssl/ca.pem"),
        TlsVerify::CaBundle(PathBuf::from("/etc/ssl/ca.pem"))
    );
}

#[test]
fn test_ca_bundle_without_certificates_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("empty.pem");
    fs::write(&path, "not a certificate\n").unwrap();

    let result = UreqTransport::new(&TlsVerify::CaBundle(path), Duration::from_secs(1));
    assert!(matches!(
        result,
        Err(DeliveryError::InvalidCaBundle { .. })
    ));
}

/// serve one canned response per connection, returning the request bodies
fn serve(responses: Vec<(u16, &'static str)>) -> (String, std::thread::JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}/data", listener.local_addr().unwrap());

    let handle = std::thread::spawn(move || {
        let mut bodies = Vec::new();
        for (status, body) in responses {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream);

            let mut content_length = 0;
            let mut chunked = false;
            let mut user_agents = Vec::new();
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                let line = line.trim_end();
                if line.is_empty() {
                    break;
                }
                if let Some((name, value)) = line.split_once(':') {
                    let value = value.trim();
                    match name.trim().to_lowercase().as_str() {
                        "content-length" => content_length = value.parse().unwrap(),
                        "transfer-encoding" => chunked = value.eq_ignore_ascii_case("chunked"),
                        "user-agent" => user_agents.push(value.to_string()),
                        _ => {}
                    }
                }
            }
            assert!(user_agents.iter().any(|ua| ua == USER_AGENT), "{user_agents:?}");

            let request_body = if chunked {
                read_chunked(&mut reader)
            } else {
                let mut buf = vec![0; content_length];
                reader.read_exact(&mut buf).unwrap();
                buf
            };
            bodies.push(String::from_utf8(request_body).unwrap());

            let mut stream = reader.into_inner();
            write!(
                stream,
                "HTTP/1.1 {status} Status\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            )
            .unwrap();
            stream.flush().unwrap();
        }
        bodies
    });

    (url, handle)
}

fn read_chunked(reader: &mut impl BufRead) -> Vec<u8> {
    let mut body = Vec::new();
    loop {
        let mut size_line = String::new();
        reader.read_line(&mut size_line).unwrap();
        let size = usize::from_str_radix(size_line.trim(), 16).unwrap();
        let mut chunk = vec![0; size + 2];
        reader.read_exact(&mut chunk).unwrap();
        if size == 0 {
            return body;
        }
        body.extend_from_slice(&chunk[..size]);
    }
}

#[test]
fn test_ureq_transport_retries_against_live_server() {
    let dir = TempDir::new().unwrap();
    let path = payload_file(&dir, r#"{"service": "api", "replicas": 2}"#);
    let (url, server) = serve(vec![(503, "try later"), (200, "accepted")]);

    let transport = UreqTransport::new(&TlsVerify::Enabled, Duration::from_secs(5)).unwrap();
    let outcome = DeliveryClient::new(transport, no_wait(3), &[])
        .post(&url, &path)
        .unwrap();

    assert_eq!(outcome.status, Some(200));
    assert_eq!(outcome.body, "accepted");
    assert_eq!(outcome.attempts, 2);

    let bodies = server.join().unwrap();
    assert_eq!(bodies.len(), 2);
    for body in bodies {
        let sent: JsonValue = serde_json::from_str(&body).unwrap();
        assert_eq!(sent, json!({"service": "api", "replicas": 2}));
    }
}

#[test]
fn test_ureq_transport_connection_refused() {
    // bind then drop to get a port nobody listens on
    let port = TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let dir = TempDir::new().unwrap();
    let path = payload_file(&dir, "{}");

    let transport = UreqTransport::new(&TlsVerify::Enabled, Duration::from_secs(5)).unwrap();
    let outcome = DeliveryClient::new(transport, no_wait(2), &[])
        .post(&format!("http://127.0.0.1:{port}/data"), &path)
        .unwrap();

    assert_eq!(outcome.status, None);
    assert_eq!(outcome.attempts, 2);
    assert!(!outcome.body.is_empty());
}
