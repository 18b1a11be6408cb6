//! Tests against a real SCSP server.
//!
//! Set `SCSP_TEST_URL` to a connection string (with credentials and a
//! database) to run them; they are skipped otherwise.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use scsp::{Config, Connection, Error, ErrorCategory, Params, Response, Value};

const URL_ENV: &str = "SCSP_TEST_URL";

fn live_config() -> Option<Config> {
    let raw = std::env::var(URL_ENV).ok()?;
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    match Config::from_url(raw) {
        Ok(config) => Some(config.connect_timeout(Duration::from_secs(10))),
        Err(e) => {
            eprintln!("skipping live tests: {URL_ENV} is not usable: {e}");
            None
        }
    }
}

fn unique_suffix() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_nanos()
}

#[test]
fn live_select_literals() {
    let Some(config) = live_config() else {
        eprintln!("skipping live tests: set {URL_ENV}");
        return;
    };

    let mut conn = Connection::connect(config).expect("connect");
    let reply = conn
        .execute("SELECT 1 AS one, 'two' AS two, NULL AS three;")
        .expect("select");
    let rows = reply.as_rowset().expect("row set");
    assert_eq!(rows.nrows(), 1);
    assert_eq!(rows.columns(), ["one", "two", "three"]);
    assert_eq!(rows.value(0, 0), Some(&Value::Integer(1)));
    assert_eq!(rows.value(0, 1), Some(&Value::Text("two".to_string())));
    assert_eq!(rows.value(0, 2), Some(&Value::Null));
    conn.disconnect();
}

#[test]
fn live_round_trip_through_a_table() {
    let Some(config) = live_config() else {
        eprintln!("skipping live tests: set {URL_ENV}");
        return;
    };

    let table = format!("scsp_rt_{}", unique_suffix());
    let mut conn = Connection::connect(config).expect("connect");
    conn.execute(&format!(
        "CREATE TABLE {table} (id INTEGER PRIMARY KEY, name TEXT, photo BLOB);"
    ))
    .expect("create table");

    let insert = conn.execute_statement(
        &format!("INSERT INTO {table} (name, photo) VALUES (:name, :photo);"),
        &Params::named([
            ("name", Value::from("O'Conner")),
            ("photo", Value::from(vec![0x48_u8, 0x65])),
        ]),
    );
    assert!(insert.is_ok(), "insert failed: {insert:?}");

    let reply = conn
        .execute(&format!("SELECT name, photo FROM {table};"))
        .expect("select");
    let rows = reply.as_rowset().expect("row set");
    assert_eq!(rows.value(0, 0), Some(&Value::Text("O'Conner".to_string())));
    assert_eq!(rows.value(0, 1), Some(&Value::Blob(vec![0x48, 0x65])));

    conn.execute(&format!("DROP TABLE {table};"))
        .expect("drop table");
}

#[test]
fn live_sql_error_is_categorised() {
    let Some(config) = live_config() else {
        eprintln!("skipping live tests: set {URL_ENV}");
        return;
    };

    let mut conn = Connection::connect(config).expect("connect");
    let err = conn
        .execute("SELECT no_such_column FROM sqlite_master;")
        .unwrap_err();
    assert!(matches!(err, Error::Server(_)), "unexpected error: {err:?}");
    assert_eq!(err.category(), Some(ErrorCategory::Operational));

    // the session survives a SQL-level error
    assert!(matches!(
        conn.execute("SELECT 1;"),
        Ok(Response::RowSet(_))
    ));
}
