/*!
 * Transaction helper
 *
 * Every multi-write operation runs inside one explicit transaction:
 * commit on `Ok`, rollback on `Err`, with the domain error returned as-is.
 * A transaction that loses a lock race in the store is rolled back and run
 * again from the start, so its reads observe the winner's committed writes.
 */

use metrics::{counter, histogram};
use sea_orm::{
    sqlx, DatabaseConnection, DatabaseTransaction, DbErr, RuntimeErr, TransactionError,
    TransactionTrait,
};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use super::retry::{with_retry, RetryConfig, RetryPolicy};
use crate::errors::ServiceError;

/// Type alias for boxed future used in transactions
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Errors that can tell whether the store refused the work because another
/// transaction held a conflicting lock.
pub trait LockContention {
    fn is_lock_contention(&self) -> bool;
}

impl LockContention for DbErr {
    fn is_lock_contention(&self) -> bool {
        let (DbErr::Exec(RuntimeErr::SqlxError(sqlx::Error::Database(err)))
        | DbErr::Query(RuntimeErr::SqlxError(sqlx::Error::Database(err)))
        | DbErr::Conn(RuntimeErr::SqlxError(sqlx::Error::Database(err)))) = self
        else {
            return false;
        };
        let Some(code) = err.code() else {
            return false;
        };

        if err.try_downcast_ref::<sqlx::sqlite::SqliteError>().is_some() {
            // SQLITE_BUSY / SQLITE_LOCKED and their extended codes
            code.parse::<i32>()
                .map(|code| matches!(code & 0xff, 5 | 6))
                .unwrap_or(false)
        } else {
            // serialization_failure / deadlock_detected
            matches!(&*code, "40001" | "40P01")
        }
    }
}

impl LockContention for ServiceError {
    fn is_lock_contention(&self) -> bool {
        matches!(self, ServiceError::TransactionAborted(err) if err.is_lock_contention())
    }
}

struct ContentionPolicy;

impl<E: LockContention> RetryPolicy<E> for ContentionPolicy {
    fn is_retryable(&self, error: &E) -> bool {
        error.is_lock_contention()
    }
}

fn contention_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 20,
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(250),
        backoff_factor: 2.0,
    }
}

/// Execute a closure within a database transaction
///
/// Store failures while opening or committing the transaction are converted
/// through `E: From<DbErr>`; errors returned by the closure are passed through
/// unchanged after the rollback. The closure may run more than once when the
/// store reports lock contention, so it must build everything it writes from
/// what it reads inside the transaction.
///
/// ```rust,ignore
/// let order = with_transaction(&db, move |txn| {
///     let order_model = order_model.clone();
///     let lines = lines.clone();
///     Box::pin(async move {
///         let order = order_model.insert(txn).await?;
///         for line in lines {
///             line.insert(txn).await?;
///         }
///         Ok(order)
///     })
/// })
/// .await?;
/// ```
pub async fn with_transaction<F, T, E>(db: &DatabaseConnection, f: F) -> Result<T, E>
where
    F: for<'a> Fn(&'a DatabaseTransaction) -> BoxFuture<'a, Result<T, E>> + Send + Sync,
    T: Send,
    E: From<DbErr> + LockContention + std::error::Error + Send,
{
    let transaction_id = Uuid::new_v4();
    let start = std::time::Instant::now();

    debug!(transaction_id = %transaction_id, "Starting database transaction");
    counter!("pharmacy_db.transaction.started", 1);

    let f = &f;
    let result = with_retry(&contention_retry(), ContentionPolicy, move || async move {
        db.transaction(f).await.map_err(|e| match e {
            TransactionError::Connection(db_err) => E::from(db_err),
            TransactionError::Transaction(err) => err,
        })
    })
    .await;

    let elapsed = start.elapsed();
    histogram!("pharmacy_db.transaction.duration", elapsed);

    match &result {
        Ok(_) => {
            counter!("pharmacy_db.transaction.committed", 1);
            debug!(transaction_id = %transaction_id, "Transaction committed in {:?}", elapsed);
        }
        Err(e) => {
            counter!("pharmacy_db.transaction.rolled_back", 1);
            warn!(transaction_id = %transaction_id, error = %e, "Transaction rolled back after {:?}", elapsed);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ServiceError;
    use sea_orm::{ConnectOptions, ConnectionTrait, Database, DbBackend, Statement};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    async fn scratch_db() -> DatabaseConnection {
        let mut opt = ConnectOptions::new("sqlite::memory:");
        opt.max_connections(1).min_connections(1);
        let db = Database::connect(opt).await.unwrap();
        db.execute(Statement::from_string(
            DbBackend::Sqlite,
            "CREATE TABLE scratch (id INTEGER PRIMARY KEY)".to_string(),
        ))
        .await
        .unwrap();
        db
    }

    async fn file_db(dir: &TempDir, busy_timeout: Duration) -> DatabaseConnection {
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("scratch.db").display());
        let mut opt = ConnectOptions::new(url);
        opt.max_connections(1)
            .min_connections(1)
            .sqlx_logging(false)
            .map_sqlx_sqlite_opts(move |opts| opts.busy_timeout(busy_timeout));
        Database::connect(opt).await.unwrap()
    }

    async fn count(db: &DatabaseConnection) -> i64 {
        let row = db
            .query_one(Statement::from_string(
                DbBackend::Sqlite,
                "SELECT COUNT(*) AS n FROM scratch".to_string(),
            ))
            .await
            .unwrap()
            .unwrap();
        row.try_get::<i64>("", "n").unwrap()
    }

    #[tokio::test]
    async fn commits_on_ok() {
        let db = scratch_db().await;
        let value = with_transaction::<_, _, ServiceError>(&db, |txn| {
            Box::pin(async move {
                txn.execute(Statement::from_string(
                    DbBackend::Sqlite,
                    "INSERT INTO scratch (id) VALUES (1)".to_string(),
                ))
                .await?;
                Ok(7)
            })
        })
        .await
        .unwrap();

        assert_eq!(value, 7);
        assert_eq!(count(&db).await, 1);
    }

    #[tokio::test]
    async fn rolls_back_and_keeps_domain_error() {
        let db = scratch_db().await;
        let err = with_transaction::<_, (), ServiceError>(&db, |txn| {
            Box::pin(async move {
                txn.execute(Statement::from_string(
                    DbBackend::Sqlite,
                    "INSERT INTO scratch (id) VALUES (1)".to_string(),
                ))
                .await?;
                Err(ServiceError::EmptyOrder)
            })
        })
        .await
        .unwrap_err();

        assert!(matches!(err, ServiceError::EmptyOrder));
        assert_eq!(count(&db).await, 0);
    }

    #[tokio::test]
    async fn reruns_after_losing_a_lock_race() {
        let dir = tempfile::tempdir().unwrap();
        let holder = file_db(&dir, Duration::from_secs(5)).await;
        holder
            .execute_unprepared("CREATE TABLE scratch (id INTEGER PRIMARY KEY)")
            .await
            .unwrap();
        // Refuses lock waits instead of sleeping on them
        let contender = file_db(&dir, Duration::ZERO).await;

        let lock = holder.begin().await.unwrap();
        lock.execute_unprepared("INSERT INTO scratch (id) VALUES (1)")
            .await
            .unwrap();

        let refused = contender
            .execute_unprepared("INSERT INTO scratch (id) VALUES (3)")
            .await
            .unwrap_err();
        assert!(refused.is_lock_contention());
        assert!(ServiceError::from(refused).is_lock_contention());

        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            lock.commit().await.unwrap();
        });

        let attempts = AtomicU32::new(0);
        let attempts_ref = &attempts;
        let value = with_transaction::<_, _, ServiceError>(&contender, move |txn| {
            attempts_ref.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                txn.execute_unprepared("INSERT INTO scratch (id) VALUES (2)")
                    .await?;
                Ok(2)
            })
        })
        .await
        .unwrap();
        release.await.unwrap();

        assert_eq!(value, 2);
        assert!(attempts.load(Ordering::SeqCst) > 1);
        assert_eq!(count(&contender).await, 2);
    }

    #[test]
    fn domain_errors_are_not_contention() {
        assert!(!ServiceError::EmptyOrder.is_lock_contention());
        assert!(!ServiceError::TransactionAborted(DbErr::RecordNotFound("order".into()))
            .is_lock_contention());
    }
}
