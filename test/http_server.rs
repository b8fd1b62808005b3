//! HTTP server integration tests
//!
//! Starts http.createServer on a loopback ephemeral port and talks to it
//! from std TcpStream client threads.

use evhost::{HostConfig, HostRegistry, NativeEngine, Runtime, Value};
use std::cell::{Cell, RefCell};
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::rc::Rc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

type Requests = Rc<RefCell<Vec<(String, String)>>>;

fn host() -> (Rc<NativeEngine>, Runtime, Rc<HostRegistry>) {
    let mut config = HostConfig::default();
    config.net.bind_host = "127.0.0.1".to_string();
    let engine = Rc::new(NativeEngine::new());
    let rt = Runtime::with_config(engine.clone(), config).unwrap();
    (engine, rt, Rc::new(HostRegistry::new()))
}

/// Send raw bytes and collect everything until EOF
fn client(port: u16, request: &'static [u8]) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        stream.write_all(request).unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).unwrap();
        String::from_utf8_lossy(&response).into_owned()
    })
}

/// Handler that records `req` and answers with `body` through
/// ServerResponse.end. The server closes after `limit` requests.
fn recording_server(
    engine: &NativeEngine,
    rt: &Runtime,
    registry: &Rc<HostRegistry>,
    body: Option<&'static str>,
    limit: usize,
) -> (u16, Requests) {
    let requests: Requests = Rc::default();
    let server_slot: Rc<RefCell<Option<Value>>> = Rc::default();

    let (log, slot, weak, reg) = (requests.clone(), server_slot.clone(), rt.downgrade(), registry.clone());
    let handler = engine.function(move |args| {
        let rt = weak.upgrade().unwrap();
        let req = args[0].as_object().unwrap();
        let field = |name: &str| req.get(name).and_then(Value::as_str).unwrap().to_string();
        log.borrow_mut().push((field("method"), field("url")));

        let mut end_args = vec![args[1].clone()];
        if let Some(body) = body {
            end_args.push(Value::from(body));
        }
        reg.call(&rt, "ServerResponse.end", &end_args).unwrap();

        if log.borrow().len() == limit {
            let server = slot.borrow().clone().unwrap();
            reg.call(&rt, "Server.close", &[server]).unwrap();
        }
    });

    let server = registry.call(rt, "http.createServer", &[handler]).unwrap();
    let port = registry
        .call(rt, "Server.listen", &[server.clone(), Value::Number(0.0)])
        .unwrap()
        .as_f64()
        .unwrap() as u16;
    *server_slot.borrow_mut() = Some(server);
    (port, requests)
}

fn content_length(response: &str) -> usize {
    response
        .lines()
        .find_map(|line| line.strip_prefix("Content-Length: "))
        .unwrap()
        .trim()
        .parse()
        .unwrap()
}

fn body_of(response: &str) -> &str {
    response.split_once("\r\n\r\n").unwrap().1
}

// ============================================================================
// Request / response
// ============================================================================

#[test]
fn test_get_request_reaches_handler() {
    let (engine, rt, registry) = host();
    let (port, requests) = recording_server(&engine, &rt, &registry, None, 1);

    let peer = client(port, b"GET /foo HTTP/1.1\r\nHost: localhost\r\n\r\n");
    assert_eq!(rt.run().unwrap(), 0);

    assert_eq!(*requests.borrow(), vec![("GET".to_string(), "/foo".to_string())]);

    let response = peer.join().unwrap();
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.contains("Content-Type: text/plain\r\n"));
    assert_eq!(body_of(&response), "Hello, World!");
    assert_eq!(content_length(&response), body_of(&response).len());
}

#[test]
fn test_end_with_custom_body() {
    let (engine, rt, registry) = host();
    let (port, requests) = recording_server(&engine, &rt, &registry, Some("héllo ✓"), 1);

    let peer = client(port, b"POST /submit HTTP/1.1\r\nContent-Length: 3\r\n\r\nabc");
    rt.run().unwrap();

    assert_eq!(requests.borrow()[0], ("POST".to_string(), "/submit".to_string()));
    let response = peer.join().unwrap();
    assert_eq!(body_of(&response), "héllo ✓");
    assert_eq!(content_length(&response), "héllo ✓".len());
}

#[test]
fn test_sequential_clients_each_get_a_response() {
    let (engine, rt, registry) = host();
    let (port, requests) = recording_server(&engine, &rt, &registry, None, 3);

    let peers: Vec<_> = (0..3)
        .map(|_| client(port, b"GET /n HTTP/1.0\r\n\r\n"))
        .collect();
    assert_eq!(rt.run().unwrap(), 0);

    assert_eq!(requests.borrow().len(), 3);
    for peer in peers {
        assert!(peer.join().unwrap().starts_with("HTTP/1.1 200 OK\r\n"));
    }
    assert_eq!(rt.stats().connections, 0);
    assert_eq!(rt.stats().listeners, 0);
}

#[test]
fn test_request_line_split_across_packets() {
    let (engine, rt, registry) = host();
    let (port, requests) = recording_server(&engine, &rt, &registry, None, 1);

    let peer = thread::spawn(move || {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        let pieces: [&[u8]; 4] = [b"GE", b"T /sl", b"ow HTTP/1.1\r", b"\n\r\n"];
        for piece in pieces {
            stream.write_all(piece).unwrap();
            stream.flush().unwrap();
            thread::sleep(Duration::from_millis(15));
        }
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        response
    });
    rt.run().unwrap();

    assert_eq!(requests.borrow()[0].1, "/slow");
    assert!(peer.join().unwrap().contains("Content-Length: 13\r\n"));
}

#[test]
fn test_double_end_sends_one_response() {
    let (engine, rt, registry) = host();
    let server_slot: Rc<RefCell<Option<Value>>> = Rc::default();

    let (slot, weak, reg) = (server_slot.clone(), rt.downgrade(), registry.clone());
    let handler = engine.function(move |args| {
        let rt = weak.upgrade().unwrap();
        reg.call(&rt, "ServerResponse.end", &[args[1].clone(), Value::from("first")])
            .unwrap();
        reg.call(&rt, "ServerResponse.end", &[args[1].clone(), Value::from("second")])
            .unwrap();
        let server = slot.borrow().clone().unwrap();
        reg.call(&rt, "Server.close", &[server]).unwrap();
    });
    let server = registry.call(&rt, "http.createServer", &[handler]).unwrap();
    let port = registry
        .call(&rt, "Server.listen", &[server.clone(), Value::Number(0.0)])
        .unwrap()
        .as_f64()
        .unwrap() as u16;
    *server_slot.borrow_mut() = Some(server);

    let peer = client(port, b"GET / HTTP/1.1\r\n\r\n");
    rt.run().unwrap();

    let response = peer.join().unwrap();
    assert_eq!(response.matches("HTTP/1.1 200 OK").count(), 1);
    assert_eq!(body_of(&response), "first");
}

#[test]
fn test_half_closed_client_still_gets_response() {
    let (engine, rt, registry) = host();
    let (port, requests) = recording_server(&engine, &rt, &registry, Some("still here"), 1);

    let peer = thread::spawn(move || {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        stream.write_all(b"GET /half HTTP/1.0\r\n\r\n").unwrap();
        stream.shutdown(Shutdown::Write).unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        response
    });
    assert_eq!(rt.run().unwrap(), 0);

    assert_eq!(requests.borrow()[0].1, "/half");
    let response = peer.join().unwrap();
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "got {:?}", response);
    assert_eq!(body_of(&response), "still here");
    assert_eq!(rt.stats().connections, 0);
}

// ============================================================================
// Malformed input
// ============================================================================

#[test]
fn test_malformed_request_line_is_ignored() {
    let (engine, rt, registry) = host();
    let invoked = Rc::new(Cell::new(false));

    let flag = invoked.clone();
    let handler = engine.function(move |_| flag.set(true));
    let server = registry.call(&rt, "http.createServer", &[handler]).unwrap();
    let port = registry
        .call(&rt, "Server.listen", &[server.clone(), Value::Number(0.0)])
        .unwrap()
        .as_f64()
        .unwrap() as u16;

    let (weak, reg) = (rt.downgrade(), registry.clone());
    let stop = engine.function(move |_| {
        let rt = weak.upgrade().unwrap();
        reg.call(&rt, "Server.close", &[server.clone()]).unwrap();
    });
    registry.call(&rt, "setTimeout", &[stop, Value::Number(300.0)]).unwrap();

    let peer = thread::spawn(move || {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        stream.write_all(b"GARBAGE\r\n").unwrap();
        thread::sleep(Duration::from_millis(50));
        stream.shutdown(Shutdown::Write).unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).unwrap();
        response
    });

    assert_eq!(rt.run().unwrap(), 0);
    assert!(!invoked.get());
    assert!(peer.join().unwrap().is_empty());
}
