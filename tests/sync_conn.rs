//! Integration tests for the blocking connection against a scripted server

#![cfg(unix)]

mod common;

use common::*;
use mysql_cursor::constant::CapabilityFlags;
use mysql_cursor::error::Error;
use pretty_assertions::assert_eq;

#[test]
fn handshake_and_server_info() {
    let (conn, server) = connect(vec![]);
    assert_eq!(conn.server_version(), "8.0.36-fake");
    assert_eq!(conn.connection_id(), 42);
    assert!(
        conn.capability_flags()
            .contains(CapabilityFlags::CLIENT_DEPRECATE_EOF)
    );
    assert!(!conn.is_broken());
    drop(conn);

    let received = server.received();
    assert_eq!(received.len(), 1);
    let caps = u32::from_le_bytes([received[0][0], received[0][1], received[0][2], received[0][3]]);
    assert!(CapabilityFlags::from_bits_retain(caps).contains(CapabilityFlags::CLIENT_CONNECT_WITH_DB));
}

#[test]
fn query_reads_typed_columns() {
    let (mut conn, server) = connect(vec![result_set(
        true,
        &["id", "nick", "score"],
        &[
            vec![Some("1"), Some("ann"), Some("3.5")],
            vec![Some("2"), None, Some("4")],
        ],
        AUTOCOMMIT,
    )]);

    let mut rows = conn.query("SELECT id, nick, score FROM people").unwrap();
    let names: Vec<_> = rows.columns().iter().map(|c| c.name.clone()).collect();
    assert_eq!(names, ["id", "nick", "score"]);

    let mut seen = Vec::new();
    while rows.advance() {
        seen.push((rows.i64(), rows.nullable_string(), rows.f64()));
    }
    assert!(rows.last_error().is_none());
    assert!(!rows.advance());
    drop(rows);

    assert_eq!(
        seen,
        vec![(1, Some("ann".to_string()), 3.5), (2, None, 4.0)]
    );
    assert!(!conn.is_broken());
    drop(conn);

    let received = server.received();
    assert_eq!(received[1], com_query("SELECT id, nick, score FROM people"));
}

#[test]
fn query_with_eof_packets() {
    let caps = server_caps() - CapabilityFlags::CLIENT_DEPRECATE_EOF;
    let (mut conn, _server) = connect_with(
        caps,
        &opts(),
        vec![
            result_set(false, &["n"], &[vec![Some("7")], vec![Some("8")]], AUTOCOMMIT),
            vec![ok(0, 0, AUTOCOMMIT)],
        ],
    );
    assert!(
        !conn
            .capability_flags()
            .contains(CapabilityFlags::CLIENT_DEPRECATE_EOF)
    );

    let mut rows = conn.query("SELECT n FROM t").unwrap();
    let mut seen = Vec::new();
    while rows.advance() {
        seen.push(rows.u8());
    }
    assert!(rows.last_error().is_none());
    drop(rows);
    assert_eq!(seen, vec![7, 8]);

    conn.ping().unwrap();
}

#[test]
fn statement_without_rows_gives_empty_cursor() {
    let (mut conn, _server) = connect(vec![vec![ok(3, 0, AUTOCOMMIT)]]);
    let mut rows = conn.query("DELETE FROM t").unwrap();
    assert!(rows.columns().is_empty());
    assert!(!rows.advance());
    assert!(rows.last_error().is_none());
}

#[test]
fn query_server_error_is_returned_directly() {
    let (mut conn, _server) = connect(vec![
        vec![err(1064, "42000", "You have an error in your SQL syntax")],
        vec![ok(0, 0, AUTOCOMMIT)],
    ]);
    let Err(Error::ServerError(err)) = conn.query("SELEC 1") else {
        panic!("expected a server error");
    };
    assert_eq!(err.error_code, 1064);
    assert_eq!(err.sql_state, "42000");
    assert!(!conn.is_broken());
    conn.ping().unwrap();
}

#[test]
fn exec_returns_acknowledgment() {
    let (mut conn, server) = connect(vec![vec![ok(2, 17, AUTOCOMMIT)]]);
    let ok = conn.exec("INSERT INTO t VALUES (1), (2)").unwrap();
    assert_eq!(ok.affected_rows, 2);
    assert_eq!(ok.last_insert_id, 17);
    drop(conn);
    assert_eq!(server.received()[1], com_query("INSERT INTO t VALUES (1), (2)"));
}

#[test]
fn exec_rejects_result_set_and_drains_it() {
    let (mut conn, server) = connect(vec![
        result_set(true, &["a"], &[vec![Some("1")], vec![Some("2")]], AUTOCOMMIT),
        vec![ok(0, 0, AUTOCOMMIT)],
    ]);
    assert!(matches!(
        conn.exec("SELECT a FROM t"),
        Err(Error::BadUsageError(_))
    ));
    conn.ping().unwrap();
    drop(conn);
    assert_eq!(server.received()[2], [0x0E]);
}

#[test]
fn abandoned_cursor_is_drained_by_next_command() {
    let (mut conn, _server) = connect(vec![
        result_set(
            true,
            &["a"],
            &[vec![Some("1")], vec![Some("2")], vec![Some("3")]],
            AUTOCOMMIT,
        ),
        vec![ok(1, 0, AUTOCOMMIT)],
    ]);

    let mut rows = conn.query("SELECT a FROM t").unwrap();
    assert!(rows.advance());
    assert_eq!(rows.i32(), 1);
    drop(rows);

    let ok = conn.exec("UPDATE t SET a = 0 WHERE a = 1").unwrap();
    assert_eq!(ok.affected_rows, 1);
    assert!(!conn.is_broken());
}

#[test]
fn conversion_error_keeps_connection_usable() {
    let (mut conn, _server) = connect(vec![
        result_set(true, &["a"], &[vec![Some("abc")], vec![Some("5")]], AUTOCOMMIT),
        vec![ok(0, 0, AUTOCOMMIT)],
    ]);

    let mut rows = conn.query("SELECT a FROM t").unwrap();
    assert!(rows.advance());
    assert_eq!(rows.nullable_i64(), Some(0));
    assert!(!rows.advance());
    assert!(matches!(
        rows.last_error(),
        Some(Error::ConversionError { .. })
    ));
    drop(rows);

    conn.ping().unwrap();
}

#[test]
fn error_packet_in_place_of_a_row() {
    let mut script = result_set(true, &["a"], &[vec![Some("1")]], AUTOCOMMIT);
    script.pop();
    script.push(err(1317, "70100", "Query execution was interrupted"));

    let (mut conn, _server) = connect(vec![script, vec![ok(0, 0, AUTOCOMMIT)]]);

    let mut rows = conn.query("SELECT a FROM t").unwrap();
    assert!(rows.advance());
    assert!(!rows.advance());
    match rows.last_error() {
        Some(Error::ServerError(err)) => assert_eq!(err.error_code, 1317),
        other => panic!("unexpected {other:?}"),
    }
    assert!(rows.is_ended());
    drop(rows);

    assert!(!conn.is_broken());
    conn.ping().unwrap();
}

#[test]
fn transport_failure_breaks_connection() {
    // the server hangs up in the middle of the result set
    let mut script = result_set(true, &["a"], &[vec![Some("1")]], AUTOCOMMIT);
    script.pop();
    let (mut conn, _server) = connect(vec![script]);

    let mut rows = conn.query("SELECT a FROM t").unwrap();
    assert!(rows.advance());
    assert!(!rows.advance());
    assert!(matches!(rows.last_error(), Some(Error::IoError(_))));
    assert!(!rows.advance());
    drop(rows);

    assert!(conn.is_broken());
    assert!(matches!(conn.ping(), Err(Error::ConnectionBroken)));
    assert!(matches!(conn.query("SELECT 1"), Err(Error::ConnectionBroken)));
}

#[test]
fn further_result_sets_are_discarded() {
    let mut call = result_set(
        true,
        &["x"],
        &[vec![Some("1")]],
        AUTOCOMMIT | MORE_RESULTS,
    );
    call.extend(result_set(
        true,
        &["y"],
        &[vec![Some("2")], vec![Some("3")]],
        AUTOCOMMIT | MORE_RESULTS,
    ));
    call.push(ok(0, 0, AUTOCOMMIT));

    let (mut conn, _server) = connect(vec![call, vec![ok(0, 0, AUTOCOMMIT)]]);

    let mut rows = conn.query("CALL report()").unwrap();
    assert!(rows.advance());
    assert_eq!(rows.string(), "1");
    assert!(!rows.advance());
    assert!(rows.last_error().is_none());
    drop(rows);

    conn.ping().unwrap();
    assert!(!conn.is_broken());
}

#[test]
fn init_command_runs_after_handshake() {
    let mut options = opts();
    options.init_command = Some("SET NAMES utf8mb4".to_string());
    let (conn, server) = connect_with(server_caps(), &options, vec![vec![ok(0, 0, AUTOCOMMIT)]]);
    drop(conn);
    assert_eq!(server.received()[1], com_query("SET NAMES utf8mb4"));
}

#[test]
fn utility_commands() {
    let (mut conn, server) = connect(vec![
        vec![ok(0, 0, AUTOCOMMIT)],
        vec![ok(0, 0, AUTOCOMMIT)],
        vec![],
    ]);
    conn.select_db("archive").unwrap();
    conn.reset().unwrap();
    conn.close().unwrap();

    let received = server.received();
    assert_eq!(received[1], b"\x02archive");
    assert_eq!(received[2], [0x1F]);
    assert_eq!(received[3], [0x01]);
}

#[test]
fn local_infile_is_refused() {
    let mut request = vec![0xFB];
    request.extend_from_slice(b"/etc/passwd");
    let (mut conn, server) = connect(vec![
        vec![request],
        vec![ok(0, 0, AUTOCOMMIT)],
        vec![ok(0, 0, AUTOCOMMIT)],
    ]);

    assert!(matches!(
        conn.query("LOAD DATA LOCAL INFILE '/etc/passwd' INTO TABLE t"),
        Err(Error::BadUsageError(_))
    ));
    assert!(!conn.is_broken());
    conn.ping().unwrap();
    drop(conn);

    // an empty packet tells the server there is no file
    assert_eq!(server.received()[2], Vec::<u8>::new());
}
