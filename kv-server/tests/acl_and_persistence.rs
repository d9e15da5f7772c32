mod common;

use kv_client::RespValue;

#[test]
fn acl_setuser_restricts_commands_and_auth_enforces_it() {
    let (admin, addr) = common::spawn_server();
    assert_eq!(
        admin.command(&[b"ACL", b"SETUSER", b"reader", b"on", b">secret", b"+@read", b"~*", b"&*"]).unwrap(),
        RespValue::Simple(b"OK".to_vec())
    );

    let mut config = kv_client::ClientConfig::default();
    config.addr = addr;
    let reader = kv_client::KVClient::with_config(config).unwrap();

    // Not authenticated yet: a read command should be rejected with NOAUTH.
    match reader.command(&[b"GET", b"anything"]).unwrap() {
        RespValue::Error(msg) => assert!(String::from_utf8_lossy(&msg).starts_with("NOAUTH")),
        other => panic!("expected NOAUTH, got {:?}", other),
    }

    assert_eq!(reader.command(&[b"AUTH", b"reader", b"secret"]).unwrap(), RespValue::Simple(b"OK".to_vec()));
    assert_eq!(reader.command(&[b"GET", b"anything"]).unwrap(), RespValue::Bulk(None));

    // The reader has no write category, so a write command is NOPERM.
    match reader.command(&[b"SET", b"anything", b"v"]).unwrap() {
        RespValue::Error(msg) => assert!(String::from_utf8_lossy(&msg).starts_with("NOPERM")),
        other => panic!("expected NOPERM, got {:?}", other),
    }
}

#[test]
fn auth_with_wrong_password_is_rejected() {
    let (admin, addr) = common::spawn_server();
    admin.command(&[b"ACL", b"SETUSER", b"bob", b"on", b">correct-horse"]).unwrap();

    let mut config = kv_client::ClientConfig::default();
    config.addr = addr;
    let client = kv_client::KVClient::with_config(config).unwrap();
    match client.command(&[b"AUTH", b"bob", b"wrong"]).unwrap() {
        RespValue::Error(msg) => assert!(String::from_utf8_lossy(&msg).starts_with("WRONGPASS")),
        other => panic!("expected WRONGPASS, got {:?}", other),
    }
}

#[test]
fn acl_whoami_and_list_reflect_setuser() {
    let (client, _addr) = common::spawn_server();
    client.command(&[b"ACL", b"SETUSER", b"alice", b"on", b"nopass"]).unwrap();
    match client.command(&[b"ACL", b"LIST"]).unwrap() {
        RespValue::Array(items) => {
            let names: Vec<Vec<u8>> = items
                .into_iter()
                .map(|v| match v {
                    RespValue::Bulk(Some(data)) => data,
                    other => panic!("unexpected entry: {:?}", other),
                })
                .collect();
            assert!(names.contains(&b"alice".to_vec()));
            assert!(names.contains(&b"default".to_vec()));
        }
        other => panic!("unexpected reply: {:?}", other),
    }
}

#[test]
fn state_survives_a_restart_via_aof_replay() {
    let dir = common::tmp_dir("restart");
    std::fs::remove_dir_all(&dir).ok();

    {
        let (client, _addr) = common::spawn_server_with_dir(&dir);
        client.set(b"durable", b"yes").unwrap();
        client.command(&[b"LPUSH", b"durable-list", b"a", b"b"]).unwrap();
        // No explicit shutdown: the server thread is simply abandoned, the
        // way a crashed process would leave its AOF behind.
    }

    let (client, _addr) = common::spawn_server_with_dir(&dir);
    assert_eq!(client.get(b"durable").unwrap(), Some(b"yes".to_vec()));
    match client.command(&[b"LRANGE", b"durable-list", b"0", b"-1"]).unwrap() {
        RespValue::Array(items) => assert_eq!(items.len(), 2),
        other => panic!("unexpected reply: {:?}", other),
    }

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn save_and_lastsave_round_trip() {
    let (client, _addr) = common::spawn_server();
    client.set(b"k", b"v").unwrap();
    assert_eq!(client.command(&[b"SAVE"]).unwrap(), RespValue::Simple(b"OK".to_vec()));
    match client.command(&[b"LASTSAVE"]).unwrap() {
        RespValue::Integer(ts) => assert!(ts > 0),
        other => panic!("unexpected reply: {:?}", other),
    }
}
