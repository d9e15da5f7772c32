mod common;

use kv_client::RespValue;

fn bulk(value: &RespValue) -> &[u8] {
    match value {
        RespValue::Bulk(Some(data)) => data,
        other => panic!("expected bulk string, got {:?}", other),
    }
}

#[test]
fn zadd_and_zrange_with_scores() {
    let (client, _addr) = common::spawn_server();
    assert_eq!(
        client.command(&[b"ZADD", b"board", b"1", b"alice", b"2", b"bob", b"3", b"carol"]).unwrap(),
        RespValue::Integer(3)
    );
    match client.command(&[b"ZRANGE", b"board", b"0", b"-1", b"WITHSCORES"]).unwrap() {
        RespValue::Array(items) => {
            let values: Vec<&[u8]> = items.iter().map(bulk).collect();
            assert_eq!(values, vec![
                b"alice".as_slice(), b"1", b"bob", b"2", b"carol", b"3",
            ]);
        }
        other => panic!("unexpected reply: {:?}", other),
    }
    assert_eq!(client.command(&[b"ZSCORE", b"board", b"bob"]).unwrap(), RespValue::Bulk(Some(b"2".to_vec())));
    assert_eq!(client.command(&[b"ZRANK", b"board", b"carol"]).unwrap(), RespValue::Integer(2));
}

#[test]
fn zadd_xx_ch_only_updates_existing_members() {
    let (client, _addr) = common::spawn_server();
    client.command(&[b"ZADD", b"board", b"1", b"alice"]).unwrap();

    // XX on a brand new member: no-op, nothing added.
    assert_eq!(client.command(&[b"ZADD", b"board", b"XX", b"5", b"dave"]).unwrap(), RespValue::Integer(0));
    assert_eq!(client.command(&[b"ZSCORE", b"board", b"dave"]).unwrap(), RespValue::Bulk(None));

    // XX CH on an existing member with a changed score reports 1 changed.
    assert_eq!(client.command(&[b"ZADD", b"board", b"XX", b"CH", b"9", b"alice"]).unwrap(), RespValue::Integer(1));
    assert_eq!(client.command(&[b"ZSCORE", b"board", b"alice"]).unwrap(), RespValue::Bulk(Some(b"9".to_vec())));
}

#[test]
fn zadd_incr_returns_new_score_and_nan_becomes_nil() {
    let (client, _addr) = common::spawn_server();
    client.command(&[b"ZADD", b"board", b"1", b"alice"]).unwrap();
    assert_eq!(client.command(&[b"ZADD", b"board", b"INCR", b"4", b"alice"]).unwrap(), RespValue::Bulk(Some(b"5".to_vec())));

    // +inf plus -inf produces NaN; the member's score is left untouched and
    // the reply is a nil bulk string rather than a new score.
    client.command(&[b"ZADD", b"infinities", b"+inf", b"alice"]).unwrap();
    assert_eq!(
        client.command(&[b"ZADD", b"infinities", b"INCR", b"-inf", b"alice"]).unwrap(),
        RespValue::Bulk(None)
    );
}

#[test]
fn zunionstore_aggregates_scores_across_keys() {
    let (client, _addr) = common::spawn_server();
    client.command(&[b"ZADD", b"a", b"1", b"x", b"2", b"y"]).unwrap();
    client.command(&[b"ZADD", b"b", b"10", b"y", b"10", b"z"]).unwrap();

    assert_eq!(
        client.command(&[b"ZUNIONSTORE", b"out", b"2", b"a", b"b"]).unwrap(),
        RespValue::Integer(3)
    );
    assert_eq!(client.command(&[b"ZSCORE", b"out", b"y"]).unwrap(), RespValue::Bulk(Some(b"12".to_vec())));
    assert_eq!(client.command(&[b"ZSCORE", b"out", b"x"]).unwrap(), RespValue::Bulk(Some(b"1".to_vec())));
}

#[test]
fn zrem_deletes_key_once_empty() {
    let (client, _addr) = common::spawn_server();
    client.command(&[b"ZADD", b"solo", b"1", b"only"]).unwrap();
    assert_eq!(client.command(&[b"ZREM", b"solo", b"only"]).unwrap(), RespValue::Integer(1));
    assert_eq!(client.command(&[b"EXISTS", b"solo"]).unwrap(), RespValue::Integer(0));
}
