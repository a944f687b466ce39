//! End-to-end scenarios driven over real UNIX-domain sockets, exercising
//! the full acceptor/handler/worker stack together (spec.md §8).

use objstore::acceptor::Acceptor;
use objstore::socket::ServerSocket;
use objstore::worker::Worker;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::tempdir;

struct Harness {
    sock_path: std::path::PathBuf,
    worker: Arc<Worker>,
    shutdown: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl Harness {
    fn start(data_root: &std::path::Path, sock_path: std::path::PathBuf) -> Harness {
        let worker = Arc::new(Worker::new(data_root).unwrap());
        let shutdown = Arc::new(AtomicBool::new(false));
        let socket = ServerSocket::bind(&sock_path).unwrap();
        let acceptor = Acceptor::new(
            socket,
            Arc::clone(&worker),
            Arc::clone(&shutdown),
            Duration::from_millis(50),
        );
        let thread = std::thread::spawn(move || {
            acceptor.run().unwrap();
        });
        Harness {
            sock_path,
            worker,
            shutdown,
            thread: Some(thread),
        }
    }

    fn connect(&self) -> UnixStream {
        UnixStream::connect(&self.sock_path).unwrap()
    }

    fn stop(mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.thread.take().unwrap().join().unwrap();
    }
}

fn send(stream: &mut UnixStream, bytes: &[u8]) {
    stream.write_all(bytes).unwrap();
}

fn recv_exact(stream: &mut UnixStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).unwrap();
    buf
}

#[test]
fn happy_path_single_block() {
    let root = tempdir().unwrap();
    let sock = root.path().join("s.sock");
    let harness = Harness::start(&root.path().join("data"), sock);
    let mut client = harness.connect();

    send(&mut client, b"REGISTER alice \n");
    assert_eq!(recv_exact(&mut client, 4), b"OK \n");

    send(&mut client, b"STORE foo 5 \nhello");
    assert_eq!(recv_exact(&mut client, 4), b"OK \n");

    send(&mut client, b"RETRIEVE foo \n");
    assert_eq!(recv_exact(&mut client, 9), b"DATA 5 \nh");
    assert_eq!(recv_exact(&mut client, 4), b"ello");

    send(&mut client, b"DELETE foo \n");
    assert_eq!(recv_exact(&mut client, 4), b"OK \n");

    send(&mut client, b"LEAVE \n");
    drop(client);
    std::thread::sleep(Duration::from_millis(100));

    let alice_dir = root.path().join("data").join("alice");
    assert!(alice_dir.is_dir());
    assert_eq!(std::fs::read_dir(&alice_dir).unwrap().count(), 0);

    harness.stop();
}

#[test]
fn ladder_of_sizes() {
    let root = tempdir().unwrap();
    let sock = root.path().join("s.sock");
    let harness = Harness::start(&root.path().join("data"), sock);
    let mut client = harness.connect();

    send(&mut client, b"REGISTER ladder \n");
    assert_eq!(recv_exact(&mut client, 4), b"OK \n");

    let names: Vec<char> = ('A'..='T').collect();
    let sizes: Vec<usize> = (0..20)
        .map(|i| 100 + i * 99_900 / 19)
        .collect();
    let payloads: Vec<Vec<u8>> = sizes
        .iter()
        .map(|&size| (0..size).map(|k| (k % 256) as u8).collect())
        .collect();

    for (name, payload) in names.iter().zip(payloads.iter()) {
        let header = format!("STORE {name} {} \n", payload.len());
        let mut request = header.into_bytes();
        request.extend_from_slice(payload);
        send(&mut client, &request);
        assert_eq!(recv_exact(&mut client, 4), b"OK \n");
    }

    for (name, payload) in names.iter().zip(payloads.iter()) {
        send(&mut client, format!("RETRIEVE {name} \n").as_bytes());
        let header = format!("DATA {} \n", payload.len());
        let got_header = recv_exact(&mut client, header.len());
        assert_eq!(got_header, header.into_bytes());
        let got_body = recv_exact(&mut client, payload.len());
        assert_eq!(&got_body, payload);
    }

    harness.stop();
}

#[test]
fn unregistered_access_is_rejected() {
    let root = tempdir().unwrap();
    let sock = root.path().join("s.sock");
    let harness = Harness::start(&root.path().join("data"), sock);
    let mut client = harness.connect();

    send(&mut client, b"STORE foo 3 \nabc");
    assert_eq!(recv_exact(&mut client, 8), b"KO 107 \n");

    harness.stop();
}

#[test]
fn concurrent_distinct_users_do_not_cross_contaminate() {
    let root = tempdir().unwrap();
    let sock = root.path().join("s.sock");
    let harness = Harness::start(&root.path().join("data"), sock);

    let mut u1 = harness.connect();
    let mut u2 = harness.connect();

    send(&mut u1, b"REGISTER u1 \n");
    assert_eq!(recv_exact(&mut u1, 4), b"OK \n");
    send(&mut u2, b"REGISTER u2 \n");
    assert_eq!(recv_exact(&mut u2, 4), b"OK \n");

    send(&mut u1, b"STORE x 4 \nuno!");
    assert_eq!(recv_exact(&mut u1, 4), b"OK \n");
    send(&mut u2, b"STORE x 4 \ndos!");
    assert_eq!(recv_exact(&mut u2, 4), b"OK \n");

    send(&mut u1, b"RETRIEVE x \n");
    assert_eq!(recv_exact(&mut u1, 9), b"DATA 4 \nu");
    assert_eq!(recv_exact(&mut u1, 3), b"no!");

    send(&mut u2, b"RETRIEVE x \n");
    assert_eq!(recv_exact(&mut u2, 9), b"DATA 4 \nd");
    assert_eq!(recv_exact(&mut u2, 3), b"os!");

    harness.stop();
}

#[test]
fn report_reflects_connected_clients_and_stored_objects() {
    let root = tempdir().unwrap();
    let sock = root.path().join("s.sock");
    let harness = Harness::start(&root.path().join("data"), sock);

    let mut u1 = harness.connect();
    let mut u2 = harness.connect();
    send(&mut u1, b"REGISTER r1 \n");
    assert_eq!(recv_exact(&mut u1, 4), b"OK \n");
    send(&mut u2, b"REGISTER r2 \n");
    assert_eq!(recv_exact(&mut u2, 4), b"OK \n");

    send(&mut u1, b"STORE a 10 \n0123456789");
    assert_eq!(recv_exact(&mut u1, 4), b"OK \n");
    send(&mut u1, b"STORE b 20 \n01234567890123456789");
    assert_eq!(recv_exact(&mut u1, 4), b"OK \n");
    send(&mut u2, b"STORE c 30 \n012345678901234567890123456789");
    assert_eq!(recv_exact(&mut u2, 4), b"OK \n");

    let report = harness.worker.report().unwrap();
    assert_eq!(report.live_sessions, 2);
    assert_eq!(report.object_count, 3);
    assert_eq!(report.total_bytes, 60);

    harness.stop();
}

#[test]
fn shutdown_under_load_drops_idle_client_promptly() {
    let root = tempdir().unwrap();
    let sock = root.path().join("s.sock");
    let harness = Harness::start(&root.path().join("data"), sock);

    let mut client = harness.connect();
    send(&mut client, b"REGISTER idle \n");
    assert_eq!(recv_exact(&mut client, 4), b"OK \n");

    let start = Instant::now();
    harness.stop();
    assert!(start.elapsed() < Duration::from_secs(2));

    let mut buf = [0u8; 1];
    let n = client.read(&mut buf).unwrap();
    assert_eq!(n, 0);
}

#[test]
fn delete_then_delete_yields_ok_then_no_such_block() {
    let root = tempdir().unwrap();
    let sock = root.path().join("s.sock");
    let harness = Harness::start(&root.path().join("data"), sock);
    let mut client = harness.connect();

    send(&mut client, b"REGISTER bob \n");
    assert_eq!(recv_exact(&mut client, 4), b"OK \n");
    send(&mut client, b"STORE once 3 \nxyz");
    assert_eq!(recv_exact(&mut client, 4), b"OK \n");
    send(&mut client, b"DELETE once \n");
    assert_eq!(recv_exact(&mut client, 4), b"OK \n");
    send(&mut client, b"DELETE once \n");
    assert_eq!(recv_exact(&mut client, 6), b"KO 2 \n");

    harness.stop();
}
