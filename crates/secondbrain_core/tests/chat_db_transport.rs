use chrono::Utc;
use rusqlite::{params, Connection};
use secondbrain_core::transport::chat_db::utc_to_apple;
use secondbrain_core::{ChatDbTransport, Transport};
use std::path::Path;

const SELF_HANDLE: &str = "+15550100";

fn typedstream(text: &str) -> Vec<u8> {
    let mut blob = b"\x04\x0bstreamtyped\x81\xe8\x03\x84\x01@\x84\x84\x84\x12NSAttributedString\x00\
        \x84\x84\x08NSObject\x00\x85\x92\x84\x84\x84\x08NSString\x01\x94\x84\x01+"
        .to_vec();
    blob.push(u8::try_from(text.len()).unwrap());
    blob.extend_from_slice(text.as_bytes());
    blob.extend_from_slice(b"\x86\x84\x02iI\x01");
    blob
}

fn create_fixture(path: &Path) -> Connection {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE message (
            ROWID INTEGER PRIMARY KEY AUTOINCREMENT,
            guid TEXT UNIQUE NOT NULL,
            date INTEGER,
            text TEXT,
            attributedBody BLOB,
            thread_originator_guid TEXT
        );
        CREATE TABLE chat (
            ROWID INTEGER PRIMARY KEY AUTOINCREMENT,
            chat_identifier TEXT
        );
        CREATE TABLE chat_message_join (
            chat_id INTEGER,
            message_id INTEGER
        );
        INSERT INTO chat (ROWID, chat_identifier) VALUES (1, '+15550100');
        INSERT INTO chat (ROWID, chat_identifier) VALUES (2, '+15559999');",
    )
    .unwrap();
    conn
}

fn insert(
    conn: &Connection,
    chat_id: i64,
    guid: &str,
    date: i64,
    text: Option<&str>,
    body: Option<Vec<u8>>,
    parent: Option<&str>,
) {
    conn.execute(
        "INSERT INTO message (guid, date, text, attributedBody, thread_originator_guid)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![guid, date, text, body, parent],
    )
    .unwrap();
    let message_id = conn.last_insert_rowid();
    conn.execute(
        "INSERT INTO chat_message_join (chat_id, message_id) VALUES (?1, ?2)",
        params![chat_id, message_id],
    )
    .unwrap();
}

#[test]
fn fetch_since_filters_orders_and_decodes() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("chat.db");
    let conn = create_fixture(&db_path);
    let base = utc_to_apple(Utc::now()) - 60_000_000_000;

    insert(&conn, 1, "G3", base + 3, Some("third"), None, Some("G1"));
    insert(&conn, 1, "G1", base + 1, Some("first"), None, None);
    insert(&conn, 2, "OTHER", base + 2, Some("not mine"), None, None);
    insert(&conn, 1, "G2", base + 2, None, Some(typedstream("from blob")), None);
    insert(&conn, 1, "EMPTY", base + 4, Some(""), None, None);
    drop(conn);

    let transport = ChatDbTransport::new(&db_path, vec![SELF_HANDLE.to_string()]);
    assert_eq!(transport.name(), "imessage");

    let fetched = transport.fetch_since(None).unwrap();
    let ids = fetched.iter().map(|m| m.id.as_str()).collect::<Vec<_>>();
    assert_eq!(ids, vec!["G1", "G2", "G3"]);
    assert_eq!(fetched[1].text.as_deref(), Some("from blob"));
    assert_eq!(fetched[2].parent_id.as_deref(), Some("G1"));
    assert_eq!(fetched[0].parent_id, None);

    let after_first = transport.fetch_since(Some(base + 1)).unwrap();
    assert_eq!(after_first.len(), 2);
    assert_eq!(after_first[0].id, "G2");

    assert!(transport.fetch_since(Some(base + 3)).unwrap().is_empty());
}

#[test]
fn first_run_only_looks_back_one_hour() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("chat.db");
    let conn = create_fixture(&db_path);
    let now = utc_to_apple(Utc::now());
    insert(&conn, 1, "OLD", now - 2 * 3600 * 1_000_000_000, Some("old"), None, None);
    insert(&conn, 1, "NEW", now - 60 * 1_000_000_000, Some("new"), None, None);
    drop(conn);

    let transport = ChatDbTransport::new(&db_path, vec![SELF_HANDLE.to_string()]);
    let fetched = transport.fetch_since(None).unwrap();
    assert_eq!(fetched.len(), 1);
    assert_eq!(fetched[0].id, "NEW");

    assert_eq!(transport.fetch_since(Some(0)).unwrap().len(), 2);
}

#[test]
fn fetch_message_returns_text_and_raw_body() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("chat.db");
    let conn = create_fixture(&db_path);
    let body = typedstream("[SB:ABC123] Unclear");
    insert(&conn, 1, "N1", 10, None, Some(body.clone()), None);
    insert(&conn, 1, "N2", 11, Some("[SB:DEF456] Unclear"), None, None);
    drop(conn);

    let transport = ChatDbTransport::new(&db_path, vec![SELF_HANDLE.to_string()]);
    let n1 = transport.fetch_message("N1").unwrap().unwrap();
    assert_eq!(n1.text, None);
    assert_eq!(n1.encoded_body, Some(body));

    let n2 = transport.fetch_message("N2").unwrap().unwrap();
    assert_eq!(n2.text.as_deref(), Some("[SB:DEF456] Unclear"));
    assert!(transport.fetch_message("missing").unwrap().is_none());
}

#[test]
fn missing_database_is_an_error_and_no_handles_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let missing = ChatDbTransport::new(dir.path().join("absent.db"), vec![SELF_HANDLE.to_string()]);
    assert!(missing.fetch_since(Some(0)).is_err());

    let unconfigured = ChatDbTransport::new(dir.path().join("absent.db"), Vec::new());
    assert!(unconfigured.fetch_since(Some(0)).unwrap().is_empty());
}
