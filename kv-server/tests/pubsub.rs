mod common;

use std::net::TcpStream;

use kv_client::RespValue;

/// `SUBSCRIBE`/`PUBLISH` need a second raw socket, since `kv-client`'s pool
/// is request/response only and has no notion of unsolicited push frames.
fn raw_connect(addr: &str) -> TcpStream {
    TcpStream::connect(addr).expect("connect")
}

fn send_command(stream: &mut TcpStream, args: &[&[u8]]) {
    use std::io::Write;
    let mut buf = Vec::new();
    buf.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());
    for arg in args {
        buf.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        buf.extend_from_slice(arg);
        buf.extend_from_slice(b"\r\n");
    }
    stream.write_all(&buf).unwrap();
    stream.flush().unwrap();
}

fn read_array(stream: &mut TcpStream) -> Vec<Vec<u8>> {
    use std::io::{BufRead, BufReader, Read};
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut line = String::new();
    reader.read_line(&mut line).unwrap();
    assert!(line.starts_with('*'), "expected array, got {line:?}");
    let count: usize = line[1..line.len() - 2].parse().unwrap();
    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        let mut header = String::new();
        reader.read_line(&mut header).unwrap();
        assert!(header.starts_with('$'), "expected bulk, got {header:?}");
        let len: usize = header[1..header.len() - 2].parse().unwrap();
        let mut data = vec![0u8; len];
        reader.read_exact(&mut data).unwrap();
        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf).unwrap();
        items.push(data);
    }
    items
}

#[test]
fn publish_delivers_to_subscribed_channel() {
    let (client, addr) = common::spawn_server();
    let mut subscriber = raw_connect(&addr);
    send_command(&mut subscriber, &[b"SUBSCRIBE", b"news"]);
    let confirm = read_array(&mut subscriber);
    assert_eq!(confirm[0], b"subscribe");
    assert_eq!(confirm[1], b"news");
    assert_eq!(confirm[2], b"1");

    assert_eq!(client.command(&[b"PUBLISH", b"news", b"hello"]).unwrap(), RespValue::Integer(1));

    let message = read_array(&mut subscriber);
    assert_eq!(message[0], b"message");
    assert_eq!(message[1], b"news");
    assert_eq!(message[2], b"hello");
}

#[test]
fn psubscribe_matches_pattern_and_reports_pattern_name() {
    let (client, addr) = common::spawn_server();
    let mut subscriber = raw_connect(&addr);
    send_command(&mut subscriber, &[b"PSUBSCRIBE", b"news.*"]);
    let confirm = read_array(&mut subscriber);
    assert_eq!(confirm[0], b"psubscribe");

    assert_eq!(client.command(&[b"PUBLISH", b"news.sports", b"goal"]).unwrap(), RespValue::Integer(1));
    let message = read_array(&mut subscriber);
    assert_eq!(message[0], b"pmessage");
    assert_eq!(message[1], b"news.*");
    assert_eq!(message[2], b"news.sports");
    assert_eq!(message[3], b"goal");
}

#[test]
fn multiple_channel_subscribe_confirms_each_then_unsubscribe_all() {
    let (_client, addr) = common::spawn_server();
    let mut subscriber = raw_connect(&addr);
    send_command(&mut subscriber, &[b"SUBSCRIBE", b"a", b"b", b"c"]);
    for (idx, channel) in [b"a".as_slice(), b"b", b"c"].iter().enumerate() {
        let confirm = read_array(&mut subscriber);
        assert_eq!(confirm[0], b"subscribe");
        assert_eq!(&confirm[1], channel);
        assert_eq!(confirm[2], (idx + 1).to_string().into_bytes());
    }

    send_command(&mut subscriber, &[b"UNSUBSCRIBE"]);
    for idx in (0..3).rev() {
        let confirm = read_array(&mut subscriber);
        assert_eq!(confirm[0], b"unsubscribe");
        assert_eq!(confirm[2], idx.to_string().into_bytes());
    }
}

#[test]
fn publish_with_no_subscribers_reports_zero() {
    let (client, _addr) = common::spawn_server();
    assert_eq!(client.command(&[b"PUBLISH", b"quiet", b"noop"]).unwrap(), RespValue::Integer(0));
}
