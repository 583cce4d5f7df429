//! End-to-end scenarios exercised over real loopback sockets: discovery,
//! login/list/disconnect, login displacement, permission denial with
//! inbox draining, file upload/download round trips, and operator
//! broadcast fan-out.

use std::io::{Read, Write};
use std::net::{TcpStream, UdpSocket};
use std::thread;
use std::time::Duration;

use lanhub::config::ConfigBuilder;
use lanhub::protocol::{Codec, Packet};
use lanhub::Server;
use serde_json::Value;

const TICK_PAUSE: Duration = Duration::from_millis(60);

fn start_test_server(users_csv: &str) -> (Server, tempfile::TempDir, tempfile::NamedTempFile) {
    let share_dir = tempfile::tempdir().unwrap();
    let mut users_file = tempfile::NamedTempFile::new().unwrap();
    users_file.write_all(users_csv.as_bytes()).unwrap();

    let config = ConfigBuilder::new()
        .server_name("TestSrv")
        .bind_address("127.0.0.1:0")
        .advertise_ip("127.0.0.1")
        .share_dir(share_dir.path())
        .user_list_path(users_file.path())
        .discovery_port(0)
        .build()
        .unwrap();

    let server = Server::start(&config).unwrap();
    let master = server.master().clone();
    thread::spawn(move || master.run());
    thread::sleep(TICK_PAUSE);

    (server, share_dir, users_file)
}

fn connect(server: &Server) -> TcpStream {
    let stream = TcpStream::connect(("127.0.0.1", server.tcp_port())).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    stream
}

fn send_recv(codec: &Codec, stream: &mut TcpStream, cmd: &str, args: Vec<Value>) -> Packet {
    let pkt = Packet::new(Packet::next_id(), cmd, args);
    codec.write_packet(stream, &pkt).unwrap();
    codec.read_packet(stream).unwrap().unwrap()
}

fn login(codec: &Codec, stream: &mut TcpStream, user: &str, pass: &str) -> Packet {
    send_recv(codec, stream, "login", vec![Value::from(user), Value::from(pass)])
}

fn status_of(pkt: &Packet) -> i64 {
    pkt.args[0].as_i64().unwrap()
}

const USERS: &str = "id,password,msgDown,msgUp,fileDown,fileUp\n\
                      alice,pw1,1,1,1,1\n\
                      bob,pw2,1,1,1,1\n\
                      mute,pw3,0,1,1,1\n";

#[test]
fn discovery_responds_on_the_configured_port() {
    let (server, _share, _users) = start_test_server(USERS);
    let client = UdpSocket::bind(("0.0.0.0", 0)).unwrap();
    client.set_read_timeout(Some(Duration::from_millis(500))).unwrap();
    client
        .send_to(b"REQUIRE_SERVER", ("127.0.0.1", server.discovery_port()))
        .unwrap();

    let mut buf = [0u8; 256];
    let (len, _) = client.recv_from(&mut buf).unwrap();
    let response = std::str::from_utf8(&buf[..len]).unwrap();
    assert!(response.starts_with("RESPONSE_SERVER_<TestSrv>_127.0.0.1_"));
}

#[test]
fn login_list_and_disconnect() {
    let (server, share, _users) = start_test_server(USERS);
    std::fs::write(share.path().join("hello.txt"), b"hi").unwrap();

    let codec = Codec::default();
    let mut stream = connect(&server);

    let resp = login(&codec, &mut stream, "alice", "pw1");
    assert_eq!(status_of(&resp), 0);

    let resp = send_recv(&codec, &mut stream, "getFileList", vec![Value::from("/")]);
    assert_eq!(status_of(&resp), 0);
    let files = resp.args[1][1].as_array().unwrap();
    assert!(files.iter().any(|f| f[0] == "hello.txt"));

    drop(stream);
    thread::sleep(TICK_PAUSE);
    assert_eq!(server.master().connected_user_count(), 0);
}

#[test]
fn rejects_unknown_user_and_bad_password() {
    let (server, _share, _users) = start_test_server(USERS);
    let codec = Codec::default();

    let mut stream = connect(&server);
    let resp = login(&codec, &mut stream, "ghost", "whatever");
    assert_eq!(status_of(&resp), 202);

    let mut stream = connect(&server);
    let resp = login(&codec, &mut stream, "alice", "wrong");
    assert_eq!(status_of(&resp), 203);
}

#[test]
fn commands_before_login_are_rejected() {
    let (server, _share, _users) = start_test_server(USERS);
    let codec = Codec::default();
    let mut stream = connect(&server);
    let resp = send_recv(&codec, &mut stream, "getFileList", vec![Value::from("/")]);
    assert_eq!(status_of(&resp), 201);
}

#[test]
fn second_login_displaces_the_first_connection() {
    let (server, _share, _users) = start_test_server(USERS);
    let codec = Codec::default();

    let mut first = connect(&server);
    let resp = login(&codec, &mut first, "alice", "pw1");
    assert_eq!(status_of(&resp), 0);

    let mut second = connect(&server);
    let resp = login(&codec, &mut second, "alice", "pw1");
    assert_eq!(status_of(&resp), 0);

    thread::sleep(TICK_PAUSE);
    // The first connection's socket was shut down by the server; a read
    // now observes EOF.
    let mut buf = [0u8; 8];
    let n = first.read(&mut buf).unwrap();
    assert_eq!(n, 0);
}

#[test]
fn relogin_on_the_same_connection_is_rejected() {
    let (server, _share, _users) = start_test_server(USERS);
    let codec = Codec::default();
    let mut stream = connect(&server);
    assert_eq!(status_of(&login(&codec, &mut stream, "alice", "pw1")), 0);
    assert_eq!(status_of(&login(&codec, &mut stream, "alice", "pw1")), 205);
}

#[test]
fn permission_denied_message_drains_the_inbox() {
    let (server, _share, _users) = start_test_server(USERS);
    let codec = Codec::default();

    let mut sender = connect(&server);
    login(&codec, &mut sender, "alice", "pw1");
    let mut muted = connect(&server);
    login(&codec, &mut muted, "mute", "pw3");

    let resp = send_recv(&codec, &mut sender, "putMessage", vec![Value::from("hello")]);
    assert_eq!(status_of(&resp), 0);
    thread::sleep(TICK_PAUSE);

    // `mute` has msgDown=0: denied, and whatever queued for it is dropped.
    let resp = send_recv(&codec, &mut muted, "getMessage", vec![]);
    assert_eq!(status_of(&resp), 204);

    // Flip the global flag off too and confirm a permitted user is also
    // denied (global gate applies ahead of the per-user one).
    server.master().permissions().set_all_user_get_message(false);
    let resp = send_recv(&codec, &mut sender, "getMessage", vec![]);
    assert_eq!(status_of(&resp), 204);
}

#[test]
fn broadcast_respects_distribute_message_flag() {
    let (server, _share, _users) = start_test_server(USERS);
    server.master().permissions().set_distribute_message(false);
    let codec = Codec::default();

    let mut alice = connect(&server);
    login(&codec, &mut alice, "alice", "pw1");
    let mut bob = connect(&server);
    login(&codec, &mut bob, "bob", "pw2");

    let resp = send_recv(&codec, &mut alice, "putMessage", vec![Value::from("only for me")]);
    assert_eq!(status_of(&resp), 0);
    thread::sleep(TICK_PAUSE);

    // alice sees her own message (self-echo)...
    let resp = send_recv(&codec, &mut alice, "getMessage", vec![]);
    assert_eq!(status_of(&resp), 0);
    let msgs = resp.args[1].as_array().unwrap();
    assert_eq!(msgs.len(), 1);

    // ...bob does not, since distributeMessage is off and this isn't a
    // server-origin broadcast.
    let resp = send_recv(&codec, &mut bob, "getMessage", vec![]);
    assert_eq!(status_of(&resp), 0);
    assert!(resp.args[1].as_array().unwrap().is_empty());
}

#[test]
fn operator_broadcast_reaches_everyone_even_with_distribution_off() {
    let (server, _share, _users) = start_test_server(USERS);
    server.master().permissions().set_distribute_message(false);
    let codec = Codec::default();

    let mut bob = connect(&server);
    login(&codec, &mut bob, "bob", "pw2");

    let op_tx = server.master().operator_sender();
    op_tx.send(lanhub::message::Message::from_server("server says hi")).unwrap();
    thread::sleep(TICK_PAUSE);

    let resp = send_recv(&codec, &mut bob, "getMessage", vec![]);
    assert_eq!(status_of(&resp), 0);
    let msgs = resp.args[1].as_array().unwrap();
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0]["body"], "server says hi");
}

#[test]
fn upload_then_download_round_trip_and_reject_duplicate_upload() {
    let (server, _share, _users) = start_test_server(USERS);
    let codec = Codec::default();
    let mut stream = connect(&server);
    login(&codec, &mut stream, "alice", "pw1");

    let payload = b"round trip bytes";
    let resp = send_recv(
        &codec,
        &mut stream,
        "putFile",
        vec![Value::from("/up.bin"), Value::from(payload.len() as u64)],
    );
    assert_eq!(status_of(&resp), 0);
    let port = resp.args[1][0].as_u64().unwrap() as u16;

    let mut xfer = TcpStream::connect(("127.0.0.1", port)).unwrap();
    xfer.write_all(payload).unwrap();
    drop(xfer);
    thread::sleep(TICK_PAUSE);

    // Re-uploading the same path now fails.
    let resp = send_recv(
        &codec,
        &mut stream,
        "putFile",
        vec![Value::from("/up.bin"), Value::from(payload.len() as u64)],
    );
    assert_eq!(status_of(&resp), 302);

    let resp = send_recv(&codec, &mut stream, "getFile", vec![Value::from("/up.bin"), Value::from(0u64)]);
    assert_eq!(status_of(&resp), 0);
    let port = resp.args[1][0].as_u64().unwrap() as u16;
    let mut xfer = TcpStream::connect(("127.0.0.1", port)).unwrap();
    let mut received = Vec::new();
    xfer.read_to_end(&mut received).unwrap();
    assert_eq!(received, payload);
}

#[test]
fn download_of_missing_file_is_rejected() {
    let (server, _share, _users) = start_test_server(USERS);
    let codec = Codec::default();
    let mut stream = connect(&server);
    login(&codec, &mut stream, "alice", "pw1");

    let resp = send_recv(&codec, &mut stream, "getFile", vec![Value::from("/nope.bin"), Value::from(0u64)]);
    assert_eq!(status_of(&resp), 301);
}
