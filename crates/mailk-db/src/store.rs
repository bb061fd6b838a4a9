//! Synchronous [`RecordStore`] over Postgres.
//!
//! Every write is a single `update ... where resource_version = $n`; zero
//! affected rows means the record changed (conflict) or is gone (not found).
//!
//! Methods block on the captured runtime handle. Call them from blocking
//! threads (`spawn_blocking`) only, never from an async task.

use mailk_reconcile::{RecordStore, StoreError};
use mailk_schemas::{MailRequest, RecordKey};
use sqlx::types::Json;
use sqlx::PgPool;
use tokio::runtime::Handle;
use tracing::debug;

use crate::{row_to_request, COLUMNS};

#[derive(Clone)]
pub struct PgRecordStore {
    pool: PgPool,
    handle: Handle,
}

fn backend(e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(format!("{e:#}"))
}

impl PgRecordStore {
    pub fn new(pool: PgPool, handle: Handle) -> Self {
        Self { pool, handle }
    }

    /// Capture the current runtime. Panics outside a tokio runtime.
    pub fn from_current(pool: PgPool) -> Self {
        Self::new(pool, Handle::current())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Distinguish a lost compare-and-swap from a vanished record.
    async fn miss(&self, key: &RecordKey) -> StoreError {
        let exists = sqlx::query_as::<_, (bool,)>(
            "select exists (select 1 from mail_requests where namespace = $1 and name = $2)",
        )
        .bind(&key.namespace)
        .bind(&key.name)
        .fetch_one(&self.pool)
        .await;
        match exists {
            Ok((true,)) => StoreError::Conflict { key: key.clone() },
            Ok((false,)) => StoreError::NotFound { key: key.clone() },
            Err(e) => backend(e),
        }
    }

    async fn update_meta(&self, record: &MailRequest) -> Result<Option<MailRequest>, StoreError> {
        let key = record.key();
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let sql = format!(
            r#"
            update mail_requests
            set spec = $3,
                generation = case when spec = $3 then generation else generation + 1 end,
                finalizers = $4,
                annotations = $5,
                resource_version = resource_version + 1
            where namespace = $1 and name = $2 and resource_version = $6
            returning {COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(&key.namespace)
            .bind(&key.name)
            .bind(Json(&record.spec))
            .bind(Json(&record.metadata.finalizers))
            .bind(Json(&record.metadata.annotations))
            .bind(record.metadata.resource_version)
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend)?;

        let Some(row) = row else {
            tx.rollback().await.map_err(backend)?;
            return Err(self.miss(&key).await);
        };
        let stored = row_to_request(&row).map_err(backend)?;

        if stored.metadata.is_deletion_requested() && stored.metadata.finalizers.is_empty() {
            sqlx::query("delete from mail_requests where namespace = $1 and name = $2")
                .bind(&key.namespace)
                .bind(&key.name)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
            tx.commit().await.map_err(backend)?;
            debug!(record = %key, "last finalizer released; record removed");
            return Ok(None);
        }

        tx.commit().await.map_err(backend)?;
        Ok(Some(stored))
    }

    async fn update_status_async(&self, record: &MailRequest) -> Result<MailRequest, StoreError> {
        let key = record.key();
        let sql = format!(
            r#"
            update mail_requests
            set status = $3,
                resource_version = resource_version + 1
            where namespace = $1 and name = $2 and resource_version = $4
            returning {COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(&key.namespace)
            .bind(&key.name)
            .bind(Json(&record.status))
            .bind(record.metadata.resource_version)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        match row {
            Some(row) => row_to_request(&row).map_err(backend),
            None => Err(self.miss(&key).await),
        }
    }
}

impl RecordStore for PgRecordStore {
    fn get(&self, key: &RecordKey) -> Result<Option<MailRequest>, StoreError> {
        self.handle
            .block_on(crate::fetch_request(&self.pool, key))
            .map_err(backend)
    }

    fn update(&self, record: &MailRequest) -> Result<Option<MailRequest>, StoreError> {
        self.handle.block_on(self.update_meta(record))
    }

    fn update_status(&self, record: &MailRequest) -> Result<MailRequest, StoreError> {
        self.handle.block_on(self.update_status_async(record))
    }

    fn list_keys(&self) -> Result<Vec<RecordKey>, StoreError> {
        self.handle
            .block_on(crate::list_keys(&self.pool))
            .map_err(backend)
    }
}
