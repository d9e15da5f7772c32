mod common;

use kv_client::RespValue;

fn bulk(value: &RespValue) -> &[u8] {
    match value {
        RespValue::Bulk(Some(data)) => data,
        other => panic!("expected bulk string, got {:?}", other),
    }
}

#[test]
fn list_push_range_and_move_round_trip() {
    let (client, _addr) = common::spawn_server();
    client.command(&[b"RPUSH", b"src", b"a", b"b", b"c"]).unwrap();
    match client.command(&[b"LRANGE", b"src", b"0", b"-1"]).unwrap() {
        RespValue::Array(items) => {
            let values: Vec<&[u8]> = items.iter().map(bulk).collect();
            assert_eq!(values, vec![b"a".as_slice(), b"b", b"c"]);
        }
        other => panic!("unexpected reply: {:?}", other),
    }

    match client.command(&[b"LMOVE", b"src", b"dst", b"RIGHT", b"LEFT"]).unwrap() {
        RespValue::Bulk(Some(data)) => assert_eq!(data, b"c"),
        other => panic!("unexpected reply: {:?}", other),
    }
    match client.command(&[b"LRANGE", b"dst", b"0", b"-1"]).unwrap() {
        RespValue::Array(items) => assert_eq!(items.len(), 1),
        other => panic!("unexpected reply: {:?}", other),
    }
    match client.command(&[b"LRANGE", b"src", b"0", b"-1"]).unwrap() {
        RespValue::Array(items) => {
            let values: Vec<&[u8]> = items.iter().map(bulk).collect();
            assert_eq!(values, vec![b"a".as_slice(), b"b"]);
        }
        other => panic!("unexpected reply: {:?}", other),
    }
}

#[test]
fn hash_field_lifecycle() {
    let (client, _addr) = common::spawn_server();
    client.command(&[b"HSET", b"profile", b"name", b"ada", b"age", b"30"]).unwrap();
    assert_eq!(client.command(&[b"HGET", b"profile", b"name"]).unwrap(), RespValue::Bulk(Some(b"ada".to_vec())));
    assert_eq!(client.command(&[b"HINCRBY", b"profile", b"age", b"1"]).unwrap(), RespValue::Integer(31));
    assert_eq!(client.command(&[b"HDEL", b"profile", b"age"]).unwrap(), RespValue::Integer(1));
    assert_eq!(client.command(&[b"HEXISTS", b"profile", b"age"]).unwrap(), RespValue::Integer(0));
}

#[test]
fn set_membership_and_moves() {
    let (client, _addr) = common::spawn_server();
    client.command(&[b"SADD", b"a", b"x", b"y", b"z"]).unwrap();
    client.command(&[b"SADD", b"b", b"z"]).unwrap();
    assert_eq!(client.command(&[b"SISMEMBER", b"a", b"y"]).unwrap(), RespValue::Integer(1));
    assert_eq!(client.command(&[b"SMOVE", b"a", b"b", b"y"]).unwrap(), RespValue::Integer(1));
    assert_eq!(client.command(&[b"SISMEMBER", b"a", b"y"]).unwrap(), RespValue::Integer(0));
    assert_eq!(client.command(&[b"SCARD", b"b"]).unwrap(), RespValue::Integer(2));
}

#[test]
fn list_pop_on_missing_key_returns_nil() {
    let (client, _addr) = common::spawn_server();
    assert_eq!(client.command(&[b"LPOP", b"nope"]).unwrap(), RespValue::Bulk(None));
}
