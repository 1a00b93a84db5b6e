//! End-to-end test against a live PostgreSQL source.
//!
//! Ignored by default; needs a server with `wal_level=logical` and a role
//! allowed to create tables, publications and replication slots:
//!
//! ```text
//! WAL2EVENTS_TEST_DSN="host=localhost user=postgres dbname=test" \
//!     cargo test --test live_stream -- --ignored
//! ```

use std::env;
use std::thread;
use std::time::Duration;
use wal2events::utils::connection::PGConnection;
use wal2events::{CellValue, LogicalReplicationReader, Operation, ReplicationConfig};

const PUBLICATION: &str = "wal2events_test_pub";
const SLOT: &str = "wal2events_test_slot";

fn test_dsn() -> String {
    env::var("WAL2EVENTS_TEST_DSN")
        .expect("set WAL2EVENTS_TEST_DSN to run the live replication tests")
}

fn test_db() -> String {
    env::var("WAL2EVENTS_TEST_DB").unwrap_or_else(|_| "test".to_string())
}

fn exec(connection: &PGConnection, sql: &str) {
    let result = connection.exec(sql).expect("statement sent");
    assert!(result.is_ok(), "statement failed: {sql}: {}", result.error_message());
}

fn setup(connection: &PGConnection) {
    exec(connection, "DROP TABLE IF EXISTS public.test_table;");
    exec(
        connection,
        "CREATE TABLE public.test_table (id integer PRIMARY KEY, updated_at timestamptz);",
    );
    exec(
        connection,
        &format!("DROP PUBLICATION IF EXISTS {PUBLICATION};"),
    );
    exec(
        connection,
        &format!("CREATE PUBLICATION {PUBLICATION} FOR TABLE public.test_table;"),
    );
    // A leftover slot from an earlier run would replay stale changes
    let _ = connection.exec(&format!(
        "SELECT pg_drop_replication_slot('{SLOT}') \
         FROM pg_replication_slots WHERE slot_name = '{SLOT}';"
    ));
}

#[test]
#[ignore]
fn insert_flows_through_as_one_change_event() {
    let dsn = test_dsn();
    let sql_conn = PGConnection::connect(&dsn).expect("control connection");
    setup(&sql_conn);

    let config = ReplicationConfig::new(test_db(), dsn, PUBLICATION, SLOT).unwrap();
    let mut reader = LogicalReplicationReader::connect(config).expect("reader connects");

    // Give the extractor time to create the slot and start streaming;
    // changes written before that point are not in the slot.
    thread::sleep(Duration::from_secs(1));
    exec(
        &sql_conn,
        "INSERT INTO public.test_table (id, updated_at) VALUES (10, '2020-01-01T00:00:00Z');",
    );

    let event = reader
        .next()
        .expect("one event before the stream ends")
        .expect("no transform error");

    assert_eq!(event.op, Operation::Insert);
    assert!(event.before.is_none());

    let after = event.after.as_ref().expect("insert carries an after image");
    assert_eq!(after.get("id"), Some(&CellValue::Integer(10)));
    let Some(CellValue::Timestamp(updated_at)) = after.get("updated_at") else {
        panic!("updated_at should coerce to a timestamp");
    };
    assert_eq!(updated_at.to_rfc3339(), "2020-01-01T00:00:00+00:00");

    let id_column = &event.table_schema.column_definitions[0];
    assert_eq!(id_column.name, "id");
    assert!(id_column.part_of_pkey);
    assert_eq!(id_column.type_name, "integer");
    assert!(!id_column.optional);
    assert_eq!(event.table_schema.schema_name, "public");
    assert_eq!(event.table_schema.table, "test_table");

    reader.stop();
    drop(reader);

    // The slot outlives the reader by design; clean it up for the next run
    thread::sleep(Duration::from_millis(500));
    let _ = sql_conn.exec(&format!("SELECT pg_drop_replication_slot('{SLOT}');"));
}

#[test]
#[ignore]
fn truncate_emits_a_t_event() {
    let dsn = test_dsn();
    let sql_conn = PGConnection::connect(&dsn).expect("control connection");
    setup(&sql_conn);

    let config = ReplicationConfig::new(test_db(), dsn, PUBLICATION, SLOT).unwrap();
    let mut reader = LogicalReplicationReader::connect(config).expect("reader connects");

    thread::sleep(Duration::from_secs(1));
    exec(
        &sql_conn,
        "INSERT INTO public.test_table (id, updated_at) VALUES (1, now());",
    );
    exec(&sql_conn, "TRUNCATE public.test_table;");

    let first = reader.next().unwrap().unwrap();
    assert_eq!(first.op, Operation::Insert);

    let second = reader.next().unwrap().unwrap();
    assert_eq!(second.op, Operation::Truncate);
    assert!(second.before.is_none());
    assert!(second.after.is_none());
    assert_eq!(second.table_schema.table, "test_table");

    reader.stop();
    drop(reader);
    thread::sleep(Duration::from_millis(500));
    let _ = sql_conn.exec(&format!("SELECT pg_drop_replication_slot('{SLOT}');"));
}
