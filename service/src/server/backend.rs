use filegate::store::sqlite::SqliteStore;

type SqlitePool = r2d2::Pool<r2d2_sqlite::SqliteConnectionManager>;
type SqliteConn = r2d2::PooledConnection<r2d2_sqlite::SqliteConnectionManager>;

pub(super) type BackendStore = SqliteStore<SqliteConn>;

#[derive(Clone)]
pub(super) struct Backend {
    pub(super) pool: SqlitePool,
}

/// Interrupts the statement running on a checked-out connection.
pub(super) struct CancelHandle(rusqlite::InterruptHandle);

impl CancelHandle {
    pub(super) fn cancel(&self) {
        self.0.interrupt();
    }
}

impl Backend {
    pub(super) fn open(&self) -> filegate::Result<(BackendStore, CancelHandle)> {
        let conn = self
            .pool
            .get()
            .map_err(|err| filegate::Error::Storage(err.to_string()))?;
        let cancel = CancelHandle(conn.get_interrupt_handle());
        Ok((SqliteStore::from_connection(conn), cancel))
    }
}
