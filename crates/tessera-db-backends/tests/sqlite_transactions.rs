//! Transaction nesting against a real SQLite connection.
//!
//! These tests check that savepoint frames undo exactly their own changes,
//! that outer frames stay usable after an inner rollback, and that frames
//! closed out of order are rejected.

use tessera_core::{DatabaseSettings, TesseraError, TesseraResult};
use tessera_db::{ColumnDef, ColumnType, Database, DbExecutor, Filter, TableDef, Value};
use tessera_db_backends::connect;

async fn setup() -> Database {
    let db = connect(&DatabaseSettings::sqlite_memory()).unwrap();
    db.create_tables(
        &[TableDef::with_auto_id("register").column(ColumnDef::new("value", ColumnType::Integer))],
        false,
    )
    .await
    .unwrap();
    db
}

async fn values(db: &Database) -> Vec<i64> {
    let mut cursor = db
        .execute_sql("SELECT value FROM register ORDER BY value", &[], true)
        .await
        .unwrap();
    cursor
        .fetch_all()
        .into_iter()
        .map(|row| row.get::<i64>("value").unwrap())
        .collect()
}

async fn add(exec: &dyn DbExecutor, value: i64) -> TesseraResult<u64> {
    exec.execute_sql("INSERT INTO register (value) VALUES (?)", &[Value::Int(value)])
        .await
}

fn boom() -> TesseraError {
    TesseraError::DatabaseError("boom".to_string())
}

// ── Scoped API ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_atomic_commits() {
    let db = setup().await;
    db.atomic(|txn| async move {
        add(&txn, 1).await?;
        add(&txn, 2).await?;
        Ok(())
    })
    .await
    .unwrap();
    assert_eq!(values(&db).await, vec![1, 2]);
    assert!(!db.in_transaction().await);
}

#[tokio::test]
async fn test_atomic_error_rolls_back() {
    let db = setup().await;
    let result: TesseraResult<()> = db
        .atomic(|txn| async move {
            add(&txn, 1).await?;
            Err(boom())
        })
        .await;
    assert!(result.is_err());
    assert!(values(&db).await.is_empty());
}

#[tokio::test]
async fn test_inner_rollback_keeps_outer_changes() {
    let db = setup().await;
    db.atomic(|outer| async move {
        add(&outer, 1).await?;
        let inner: TesseraResult<()> = outer
            .atomic(|inner| async move {
                add(&inner, 2).await?;
                Err(boom())
            })
            .await;
        assert!(inner.is_err());
        add(&outer, 3).await?;
        Ok(())
    })
    .await
    .unwrap();
    assert_eq!(values(&db).await, vec![1, 3]);
}

#[tokio::test]
async fn test_outer_rollback_undoes_released_savepoints() {
    let db = setup().await;
    let result: TesseraResult<()> = db
        .atomic(|outer| async move {
            add(&outer, 1).await?;
            outer
                .atomic(|inner| async move {
                    add(&inner, 2).await?;
                    Ok(())
                })
                .await?;
            Err(boom())
        })
        .await;
    assert!(result.is_err());
    assert!(values(&db).await.is_empty());
}

#[tokio::test]
async fn test_three_levels() {
    let db = setup().await;
    db.atomic(|l1| async move {
        add(&l1, 1).await?;
        l1.atomic(|l2| async move {
            add(&l2, 2).await?;
            assert_eq!(l2.handle().depth(), 2);
            let l3: TesseraResult<()> = l2
                .atomic(|l3| async move {
                    assert_eq!(l3.handle().depth(), 3);
                    add(&l3, 3).await?;
                    Err(boom())
                })
                .await;
            assert!(l3.is_err());
            Ok(())
        })
        .await?;
        Ok(())
    })
    .await
    .unwrap();
    assert_eq!(values(&db).await, vec![1, 2]);
}

#[tokio::test]
async fn test_explicit_rollback_inside_scope() {
    let db = setup().await;
    db.atomic(|txn| async move {
        add(&txn, 1).await?;
        txn.rollback().await?;
        Ok(())
    })
    .await
    .unwrap();
    assert!(values(&db).await.is_empty());
    assert_eq!(db.depth().await, 0);
}

#[tokio::test]
async fn test_scope_reports_leaked_frame() {
    let db = setup().await;
    let err = db
        .atomic(|txn| async move {
            add(&txn, 1).await?;
            let leaked = txn.begin().await?;
            add(&leaked, 2).await?;
            Ok(())
        })
        .await
        .unwrap_err();
    assert!(err.is_protocol_error());
    assert!(values(&db).await.is_empty());
    assert_eq!(db.depth().await, 0);
}

// ── Manual frames ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_manual_frames_are_lifo() {
    let db = setup().await;
    let outer = db.begin().await.unwrap();
    add(&outer, 1).await.unwrap();
    let inner = outer.begin().await.unwrap();
    add(&inner, 2).await.unwrap();

    let err = outer.commit().await.unwrap_err();
    assert!(matches!(err, TesseraError::ProtocolError(_)));
    assert_eq!(db.depth().await, 2);

    inner.rollback().await.unwrap();
    assert!(!inner.is_open().await);
    let err = inner.commit().await.unwrap_err();
    assert!(err.is_protocol_error());

    outer.commit().await.unwrap();
    assert_eq!(values(&db).await, vec![1]);
}

#[tokio::test]
async fn test_handle_from_other_connection_is_rejected() {
    let a = setup().await;
    let b = setup().await;
    let txn = a.begin().await.unwrap();
    let err = b.commit_frame(txn.handle()).await.unwrap_err();
    assert!(err.is_protocol_error());
    assert_eq!(a.depth().await, 1);
    txn.commit().await.unwrap();
}

#[tokio::test]
async fn test_savepoint_names_are_unique() {
    let db = setup().await;
    let outer = db.begin().await.unwrap();
    let first = outer.begin().await.unwrap();
    let first_name = first.handle().savepoint().map(str::to_string);
    first.commit().await.unwrap();
    let second = outer.begin().await.unwrap();
    assert!(first_name.is_some());
    assert_ne!(first_name.as_deref(), second.handle().savepoint());
    second.commit().await.unwrap();
    outer.commit().await.unwrap();
}

// ── Raw SQL and the implicit transaction ──────────────────────────────

#[tokio::test]
async fn test_execute_sql_without_commit_waits_for_commit() {
    let db = setup().await;
    db.execute_sql("INSERT INTO register (value) VALUES (7)", &[], false)
        .await
        .unwrap();
    assert!(db.in_transaction().await);
    db.rollback().await.unwrap();
    assert!(values(&db).await.is_empty());

    db.execute_sql("INSERT INTO register (value) VALUES (8)", &[], false)
        .await
        .unwrap();
    db.commit().await.unwrap();
    assert_eq!(values(&db).await, vec![8]);
}

#[tokio::test]
async fn test_close_with_open_frame_fails() {
    let db = setup().await;
    let txn = db.begin().await.unwrap();
    assert!(matches!(
        db.close().await.unwrap_err(),
        TesseraError::OperationalError(_)
    ));
    txn.rollback().await.unwrap();
    assert!(db.close().await.unwrap());
    assert!(db.count("register", &[Filter::eq("value", 1)]).await.is_err());
}
