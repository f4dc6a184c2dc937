//! Integration tests for the `fleetline serve` HTTP API.
//!
//! Each test starts the server as a child process on a unique port with a
//! generated fleet document, makes HTTP requests, and verifies the responses.

use std::io::Read;
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::{Duration, Instant};

use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcOffset};

/// Atomic port counter to avoid port conflicts between parallel tests.
/// Base port is derived from process ID so parallel `cargo test --workspace` runs
/// (which spawn separate test binaries) don't collide on the same port range.
static NEXT_PORT: AtomicU16 = AtomicU16::new(0);
static PORT_INIT: std::sync::Once = std::sync::Once::new();

fn next_port() -> u16 {
    PORT_INIT.call_once(|| {
        let base = 20000 + (std::process::id() as u16 % 20000);
        NEXT_PORT.store(base, Ordering::SeqCst);
    });
    NEXT_PORT.fetch_add(1, Ordering::SeqCst)
}

/// Schedule offset, in minutes, that puts local time near noon.
///
/// The test trip runs from 00:00 to 23:59 local time, so this leaves about
/// twelve hours of margin on both sides whatever the wall clock says.
fn noon_offset_minutes(now: OffsetDateTime) -> i32 {
    12 * 60 - (i32::from(now.hour()) * 60 + i32::from(now.minute()))
}

/// Write a fleet document whose only trip runs all of the local service
/// day under `offset_minutes`.
///
/// - `bus-1`: active, trip `t1` on route `r1`
/// - `bus-2`: active, no trip
/// - `bus-3`: in maintenance
fn write_fleet(dir: &Path, offset_minutes: i32) -> PathBuf {
    let offset = UtcOffset::from_whole_seconds(offset_minutes * 60).unwrap();
    let today = OffsetDateTime::now_utc().to_offset(offset).date();
    let date = format!(
        "{:04}-{:02}-{:02}",
        today.year(),
        u8::from(today.month()),
        today.day()
    );
    let fleet = serde_json::json!({
        "vehicles": [
            {"id": "bus-1", "capacity": 40, "status": "active"},
            {"id": "bus-2", "capacity": 40, "status": "active"},
            {"id": "bus-3", "capacity": 30, "status": "maintenance"}
        ],
        "stops": [
            {"id": "s1", "name": "Depot", "latitude": 40.70, "longitude": -74.00},
            {"id": "s2", "name": "Terminal", "latitude": 40.71, "longitude": -73.99}
        ],
        "routes": [
            {"id": "r1", "name": "Line 1", "stops": [
                {"stopId": "s1", "order": 1, "scheduledTime": "00:00"},
                {"stopId": "s2", "order": 2, "scheduledTime": "23:59"}
            ]}
        ],
        "trips": [
            {"id": "t1", "routeId": "r1", "vehicleId": "bus-1", "date": date, "status": "in_progress"}
        ]
    });
    let path = dir.join("fleet.json");
    std::fs::write(&path, fleet.to_string()).unwrap();
    path
}

/// Running server plus the temp dir holding its fleet document.
struct Server {
    child: Child,
    port: u16,
    _dir: tempfile::TempDir,
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Helper: start `fleetline serve` on a fresh port with the test fleet.
fn start_server(extra_args: &[&str]) -> Server {
    let port = next_port();
    let dir = tempfile::tempdir().unwrap();
    let offset_minutes = noon_offset_minutes(OffsetDateTime::now_utc());
    let fleet = write_fleet(dir.path(), offset_minutes);
    let config = dir.path().join("fleetline.toml");
    std::fs::write(
        &config,
        format!("[resolver]\nutc_offset_minutes = {offset_minutes}\n"),
    )
    .unwrap();

    let mut cmd = Command::new(env!("CARGO_BIN_EXE_fleetline"));
    cmd.arg("--quiet")
        .arg("--config")
        .arg(&config)
        .arg("serve")
        .arg("--port")
        .arg(port.to_string())
        .arg("--fleet")
        .arg(&fleet);
    for arg in extra_args {
        cmd.arg(arg);
    }
    cmd.stdout(Stdio::null());
    cmd.stderr(Stdio::null());

    let child = cmd.spawn().expect("failed to start fleetline serve");
    // Wait for server to be ready by polling the port
    for _ in 0..50 {
        if TcpStream::connect(format!("127.0.0.1:{}", port)).is_ok() {
            break;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    Server {
        child,
        port,
        _dir: dir,
    }
}

/// Helper: make a simple HTTP GET request and return (status, body).
fn http_get(port: u16, path: &str) -> (u16, String) {
    let mut stream = TcpStream::connect(format!("127.0.0.1:{}", port)).expect("failed to connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();

    let request = format!(
        "GET {} HTTP/1.1\r\nHost: localhost:{}\r\nConnection: close\r\n\r\n",
        path, port
    );
    std::io::Write::write_all(&mut stream, request.as_bytes()).expect("failed to write");

    let mut response = String::new();
    let _ = stream.read_to_string(&mut response);

    parse_http_response(&response)
}

/// Helper: make a simple HTTP POST request and return (status, body).
fn http_post(port: u16, path: &str, body: &str) -> (u16, String) {
    let mut stream = TcpStream::connect(format!("127.0.0.1:{}", port)).expect("failed to connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();

    let request = format!(
        "POST {} HTTP/1.1\r\nHost: localhost:{}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        path, port, body.len(), body
    );
    std::io::Write::write_all(&mut stream, request.as_bytes()).expect("failed to write");

    let mut response = String::new();
    let _ = stream.read_to_string(&mut response);

    parse_http_response(&response)
}

/// Helper: open `/stream` and read until `frames` snapshot events arrived
/// or the deadline passed. Returns (status line, raw text read).
fn read_stream(port: u16, query: &str, frames: usize) -> (String, String) {
    let mut stream = TcpStream::connect(format!("127.0.0.1:{}", port)).expect("failed to connect");
    stream
        .set_read_timeout(Some(Duration::from_millis(500)))
        .unwrap();
    let request = format!(
        "GET /stream{} HTTP/1.1\r\nHost: localhost:{}\r\nAccept: text/event-stream\r\n\r\n",
        query, port
    );
    std::io::Write::write_all(&mut stream, request.as_bytes()).expect("failed to write");

    let deadline = Instant::now() + Duration::from_secs(10);
    let mut raw = Vec::new();
    let mut buf = [0u8; 4096];
    while Instant::now() < deadline {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => raw.extend_from_slice(&buf[..n]),
            Err(_) => {}
        }
        let text = String::from_utf8_lossy(&raw);
        if text.matches("event: snapshot").count() >= frames {
            break;
        }
    }
    let text = String::from_utf8_lossy(&raw).to_string();
    let status_line = text.lines().next().unwrap_or("").to_string();
    (status_line, text)
}

/// Parse an HTTP response into (status_code, body).
fn parse_http_response(response: &str) -> (u16, String) {
    let parts: Vec<&str> = response.splitn(2, "\r\n\r\n").collect();
    let headers = parts.first().unwrap_or(&"").to_string();
    let body = parts.get(1).unwrap_or(&"").to_string();

    let status_line = headers.lines().next().unwrap_or("");
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(0);

    // Handle chunked transfer encoding
    let body = if headers.to_lowercase().contains("transfer-encoding: chunked") {
        decode_chunked(&body)
    } else {
        body
    };

    (status, body)
}

/// Decode chunked transfer encoding.
fn decode_chunked(data: &str) -> String {
    let mut result = String::new();
    let mut remaining = data;

    while let Some(line_end) = remaining.find("\r\n") {
        let size_str = &remaining[..line_end];
        let size = match usize::from_str_radix(size_str.trim(), 16) {
            Ok(s) => s,
            Err(_) => break,
        };
        if size == 0 {
            break;
        }
        let chunk_start = line_end + 2;
        let chunk_end = chunk_start + size;
        if chunk_end > remaining.len() {
            // Partial chunk, take what we have
            result.push_str(&remaining[chunk_start..]);
            break;
        }
        result.push_str(&remaining[chunk_start..chunk_end]);
        // Skip past chunk data + \r\n
        remaining = if chunk_end + 2 <= remaining.len() {
            &remaining[chunk_end + 2..]
        } else {
            ""
        };
    }

    result
}

fn json(body: &str) -> serde_json::Value {
    serde_json::from_str(body).unwrap_or_else(|e| panic!("invalid JSON ({e}): {body}"))
}

fn rfc3339(instant: OffsetDateTime) -> String {
    instant.format(&Rfc3339).unwrap()
}

#[test]
fn health_reports_status_and_cache() {
    let server = start_server(&[]);
    let (status, body) = http_get(server.port, "/health");
    assert_eq!(status, 200);
    let v = json(&body);
    assert_eq!(v["status"], "ok");
    assert!(v["version"].is_string());
    assert_eq!(v["sessions"], 0);
    assert_eq!(v["simulation"], false);
    assert_eq!(v["cache"], "memory");
}

#[test]
fn unknown_route_is_json_404() {
    let server = start_server(&[]);
    let (status, body) = http_get(server.port, "/nope");
    assert_eq!(status, 404);
    assert!(json(&body)["error"].is_string());
}

#[test]
fn ingest_accepts_valid_sample() {
    let server = start_server(&[]);
    let (status, body) = http_post(
        server.port,
        "/positions",
        r#"{"vehicleId":"bus-2","latitude":40.705,"longitude":-73.995,"speed":22.5,"heading":90}"#,
    );
    assert_eq!(status, 201, "body: {body}");
    let v = json(&body);
    assert_eq!(v["vehicleId"], "bus-2");
    assert!(v["id"].is_u64());
    assert!(v["timestamp"].is_string());
}

#[test]
fn ingest_rejects_out_of_range_coordinates() {
    let server = start_server(&[]);
    let (status, body) = http_post(
        server.port,
        "/positions",
        r#"{"vehicleId":"bus-2","latitude":95.0,"longitude":-73.995}"#,
    );
    assert_eq!(status, 400);
    assert!(json(&body)["error"]
        .as_str()
        .unwrap()
        .contains("invalid coordinates"));

    // Nothing was stored.
    let (status, _) = http_get(server.port, "/vehicles/bus-2/position");
    assert_eq!(status, 404);
}

#[test]
fn ingest_rejects_future_timestamp() {
    let server = start_server(&[]);
    let (status, body) = http_post(
        server.port,
        "/positions",
        r#"{"vehicleId":"bus-1","latitude":1.0,"longitude":1.0,"timestamp":"2099-01-01T00:00:00Z"}"#,
    );
    assert_eq!(status, 400, "body: {body}");

    // The schedule still drives bus-1.
    let (status, body) = http_get(server.port, "/vehicles/bus-1/position");
    assert_eq!(status, 200);
    assert_eq!(json(&body)["source"], "simulated");
}

#[test]
fn noon_offset_keeps_local_time_inside_the_day() {
    for (hour, minute) in [(0, 0), (6, 15), (12, 0), (23, 59)] {
        let now = OffsetDateTime::now_utc()
            .replace_time(time::Time::from_hms(hour, minute, 0).unwrap());
        let offset = UtcOffset::from_whole_seconds(noon_offset_minutes(now) * 60).unwrap();
        assert_eq!(now.to_offset(offset).hour(), 12);
    }
}

#[test]
fn ingest_rejects_malformed_body() {
    let server = start_server(&[]);
    let (status, _) = http_post(server.port, "/positions", r#"{"vehicleId":"bus-2"}"#);
    assert_eq!(status, 400);
    let (status, _) = http_post(server.port, "/positions", "not json");
    assert_eq!(status, 400);
}

#[test]
fn fresh_sample_resolves_as_real() {
    let server = start_server(&[]);
    let (status, _) = http_post(
        server.port,
        "/positions",
        r#"{"vehicleId":"bus-2","latitude":40.705,"longitude":-73.995,"speed":10}"#,
    );
    assert_eq!(status, 201);

    let (status, body) = http_get(server.port, "/vehicles/bus-2/position");
    assert_eq!(status, 200);
    let v = json(&body);
    assert_eq!(v["source"], "real");
    assert_eq!(v["coordinates"]["latitude"], 40.705);
    assert!(v.get("tripId").is_none());
}

#[test]
fn vehicle_on_trip_resolves_as_simulated() {
    let server = start_server(&[]);
    let (status, body) = http_get(server.port, "/vehicles/bus-1/position");
    assert_eq!(status, 200, "body: {body}");
    let v = json(&body);
    assert_eq!(v["source"], "simulated");
    assert_eq!(v["tripId"], "t1");
    let progress = v["progress"].as_f64().unwrap();
    assert!((0.0..=100.0).contains(&progress));
    let latitude = v["coordinates"]["latitude"].as_f64().unwrap();
    assert!((40.70..=40.71).contains(&latitude));
}

#[test]
fn unresolvable_vehicles_are_404() {
    let server = start_server(&[]);
    let (status, _) = http_get(server.port, "/vehicles/ghost/position");
    assert_eq!(status, 404);
    // Known but without samples or a trip.
    let (status, _) = http_get(server.port, "/vehicles/bus-3/position");
    assert_eq!(status, 404);
}

#[test]
fn all_positions_lists_resolvable_active_vehicles() {
    let server = start_server(&[]);
    let (status, body) = http_get(server.port, "/positions");
    assert_eq!(status, 200);
    let v = json(&body);
    let positions = v["positions"].as_array().unwrap();
    // bus-2 has no sample and no trip; bus-3 is in maintenance.
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0]["vehicleId"], "bus-1");
}

#[test]
fn history_is_newest_first_and_limited() {
    let server = start_server(&[]);
    let now = OffsetDateTime::now_utc();
    for minutes in [3i64, 2, 1] {
        let body = serde_json::json!({
            "vehicleId": "bus-9",
            "latitude": 40.70,
            "longitude": -74.00,
            "timestamp": rfc3339(now - time::Duration::minutes(minutes)),
        });
        let (status, _) = http_post(server.port, "/positions", &body.to_string());
        assert_eq!(status, 201);
    }

    let (status, body) = http_get(server.port, "/vehicles/bus-9/history?limit=2");
    assert_eq!(status, 200);
    let v = json(&body);
    assert_eq!(v["vehicleId"], "bus-9");
    let samples = v["samples"].as_array().unwrap();
    assert_eq!(samples.len(), 2);
    assert_eq!(
        samples[0]["timestamp"],
        rfc3339(now - time::Duration::minutes(1))
    );
    assert_eq!(
        samples[1]["timestamp"],
        rfc3339(now - time::Duration::minutes(2))
    );

    let (status, body) = http_get(server.port, "/vehicles/nobody/history");
    assert_eq!(status, 200);
    assert_eq!(json(&body)["samples"].as_array().unwrap().len(), 0);
}

#[test]
fn history_rejects_bad_parameters() {
    let server = start_server(&[]);
    let (status, _) = http_get(server.port, "/vehicles/bus-1/history?limit=0");
    assert_eq!(status, 400);
    let (status, _) = http_get(server.port, "/vehicles/bus-1/history?limit=5000");
    assert_eq!(status, 400);
    let (status, _) = http_get(server.port, "/vehicles/bus-1/history?from=yesterday");
    assert_eq!(status, 400);
    let (status, _) = http_get(
        server.port,
        "/vehicles/bus-1/history?from=2026-10-17T10:00:00Z&to=2026-10-17T09:00:00Z",
    );
    assert_eq!(status, 400);
}

#[test]
fn simulate_step_persists_a_sample() {
    let server = start_server(&[]);
    let (status, body) = http_post(server.port, "/vehicles/bus-1/simulate-step", "");
    assert_eq!(status, 201, "body: {body}");
    let v = json(&body);
    assert_eq!(v["vehicleId"], "bus-1");

    let (status, body) = http_get(server.port, "/vehicles/bus-1/history");
    assert_eq!(status, 200);
    assert_eq!(json(&body)["samples"].as_array().unwrap().len(), 1);

    // The fresh sample now wins, still tagged with the trip.
    let (_, body) = http_get(server.port, "/vehicles/bus-1/position");
    let v = json(&body);
    assert_eq!(v["source"], "real");
    assert_eq!(v["tripId"], "t1");
}

#[test]
fn simulate_step_without_trip_is_404() {
    let server = start_server(&[]);
    let (status, _) = http_post(server.port, "/vehicles/bus-2/simulate-step", "");
    assert_eq!(status, 404);
    let (status, _) = http_post(server.port, "/vehicles/ghost/simulate-step", "");
    assert_eq!(status, 404);
}

#[test]
fn stream_sends_only_the_filtered_vehicle() {
    let server = start_server(&[]);
    let (status, _) = http_post(
        server.port,
        "/positions",
        r#"{"vehicleId":"bus-2","latitude":40.705,"longitude":-73.995}"#,
    );
    assert_eq!(status, 201);

    let (status_line, text) = read_stream(server.port, "?vehicleId=bus-1&intervalMs=500", 2);
    assert!(status_line.contains("200"), "status: {status_line}");
    assert!(text.to_lowercase().contains("content-type: text/event-stream"));
    assert!(text.matches("event: snapshot").count() >= 2, "stream: {text}");
    assert!(text.contains(r#""vehicleId":"bus-1""#));
    assert!(!text.contains("bus-2"));
}

#[test]
fn stream_by_trip_follows_its_vehicle() {
    let server = start_server(&[]);
    let (status_line, text) = read_stream(server.port, "?tripId=t1", 1);
    assert!(status_line.contains("200"), "status: {status_line}");
    assert!(text.contains(r#""tripId":"t1""#), "stream: {text}");
}

#[test]
fn stream_rejects_bad_requests() {
    let server = start_server(&[]);
    let (status, _) = http_get(server.port, "/stream?intervalMs=10");
    assert_eq!(status, 400);
    let (status, _) = http_get(server.port, "/stream?intervalMs=600000");
    assert_eq!(status, 400);
    let (status, _) = http_get(server.port, "/stream?vehicleId=bus-1&tripId=t1");
    assert_eq!(status, 400);
}

#[test]
fn simulation_can_be_started_and_stopped() {
    let server = start_server(&[]);
    let (status, body) = http_get(server.port, "/simulation");
    assert_eq!(status, 200);
    assert_eq!(json(&body)["running"], false);

    let (status, body) = http_post(server.port, "/simulation/start", "");
    assert_eq!(status, 200);
    let v = json(&body);
    assert_eq!(v["running"], true);
    assert_eq!(v["changed"], true);

    let (_, body) = http_post(server.port, "/simulation/start", "");
    assert_eq!(json(&body)["changed"], false);

    let (status, body) = http_post(server.port, "/simulation/stop", "");
    assert_eq!(status, 200);
    let v = json(&body);
    assert_eq!(v["running"], false);
    assert_eq!(v["changed"], true);
}

#[test]
fn simulate_flag_autostarts_background_simulation() {
    let server = start_server(&["--simulate"]);
    let (status, body) = http_get(server.port, "/health");
    assert_eq!(status, 200);
    assert_eq!(json(&body)["simulation"], true);
}
