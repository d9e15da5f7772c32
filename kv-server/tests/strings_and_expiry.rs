mod common;

use std::thread;
use std::time::Duration;

use kv_client::RespValue;

#[test]
fn set_get_and_ttl_round_trip() {
    let (client, _addr) = common::spawn_server();
    client.set(b"greeting", b"hello").unwrap();
    assert_eq!(client.get(b"greeting").unwrap(), Some(b"hello".to_vec()));
    assert_eq!(client.get(b"missing").unwrap(), None);

    client.set_with_ttl(b"soon", b"bye", Duration::from_secs(60)).unwrap();
    match client.ttl(b"soon").unwrap() {
        kv_client::ClientTtl::ExpiresIn(d) => assert!(d.as_secs() <= 60 && d.as_secs() > 0),
        other => panic!("expected a bounded ttl, got {:?}", other),
    }
}

#[test]
fn keys_expire_on_their_own() {
    let (client, _addr) = common::spawn_server();
    client.command(&[b"SET", b"fleeting", b"v", b"PX", b"50"]).unwrap();
    assert_eq!(client.get(b"fleeting").unwrap(), Some(b"v".to_vec()));
    thread::sleep(Duration::from_millis(300));
    assert_eq!(client.get(b"fleeting").unwrap(), None);
    assert_eq!(client.ttl(b"fleeting").unwrap(), kv_client::ClientTtl::Missing);
}

#[test]
fn delete_removes_key_and_reports_count() {
    let (client, _addr) = common::spawn_server();
    client.set(b"to-delete", b"v").unwrap();
    assert!(client.delete(b"to-delete").unwrap());
    assert!(!client.delete(b"to-delete").unwrap());
}

#[test]
fn incr_is_consistent_under_concurrency() {
    let (client, _addr) = common::spawn_server();
    let client = std::sync::Arc::new(client);
    client.set(b"counter", b"0").unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let client = client.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..25 {
                client.command(&[b"INCR", b"counter"]).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    match client.command(&[b"GET", b"counter"]).unwrap() {
        RespValue::Bulk(Some(data)) => assert_eq!(&data, b"200"),
        other => panic!("unexpected reply: {:?}", other),
    }
}

#[test]
fn wrong_type_error_is_reported_by_name() {
    let (client, _addr) = common::spawn_server();
    client.command(&[b"LPUSH", b"a-list", b"x"]).unwrap();
    match client.command(&[b"GET", b"a-list"]).unwrap() {
        RespValue::Error(msg) => assert!(String::from_utf8_lossy(&msg).starts_with("WRONGTYPE")),
        other => panic!("expected WRONGTYPE error, got {:?}", other),
    }
}
