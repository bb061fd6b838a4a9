//! mailk-db
//!
//! Postgres resource store for MailRequest records.
//!
//! The async functions here are the external actor's view (create, edit,
//! request deletion, annotate) plus operator helpers. [`PgRecordStore`] is the
//! controller's synchronous compare-and-swap view.

use std::collections::BTreeMap;

use anyhow::{anyhow, Context, Result};
use mailk_schemas::{ChangeEvent, ChangeKind, MailRequest, MailSpec, MailStatus, RecordKey, RecordMeta};
use serde::Deserialize;
use serde_json::Value;
use sqlx::postgres::{PgListener, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

mod store;

pub use store::PgRecordStore;

pub const ENV_DB_URL: &str = "MAILK_DATABASE_URL";

/// `pg_notify` channel carrying change notifications.
pub const CHANGE_CHANNEL: &str = "mail_requests";

pub(crate) const COLUMNS: &str = "namespace, name, uid, generation, resource_version, spec, status, \
     finalizers, annotations, deletion_requested_at";

/// Connect to Postgres using MAILK_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_mail_requests_table: bool,
    /// `0` when the table does not exist yet.
    pub records: i64,
}

/// Connectivity, schema presence and record count.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='mail_requests'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    let records = if exists {
        let (n,): (i64,) = sqlx::query_as::<_, (i64,)>("select count(*)::bigint from mail_requests")
            .fetch_one(pool)
            .await
            .context("status count query failed")?;
        n
    } else {
        0
    };

    Ok(DbStatus {
        ok: one == 1,
        has_mail_requests_table: exists,
        records,
    })
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

pub(crate) fn row_to_request(row: &PgRow) -> Result<MailRequest> {
    let spec: Value = row.try_get("spec")?;
    let status: Value = row.try_get("status")?;
    let finalizers: Value = row.try_get("finalizers")?;
    let annotations: Value = row.try_get("annotations")?;

    Ok(MailRequest {
        metadata: RecordMeta {
            namespace: row.try_get("namespace")?,
            name: row.try_get("name")?,
            uid: row.try_get("uid")?,
            generation: row.try_get("generation")?,
            resource_version: row.try_get("resource_version")?,
            deletion_requested_at: row.try_get("deletion_requested_at")?,
            finalizers: serde_json::from_value::<Vec<String>>(finalizers)
                .context("decode finalizers")?,
            annotations: serde_json::from_value::<BTreeMap<String, String>>(annotations)
                .context("decode annotations")?,
        },
        spec: serde_json::from_value::<MailSpec>(spec).context("decode spec")?,
        status: serde_json::from_value::<MailStatus>(status).context("decode status")?,
    })
}

// ---------------------------------------------------------------------------
// External actor
// ---------------------------------------------------------------------------

/// Create a record with empty status and generation 1.
pub async fn insert_request(
    pool: &PgPool,
    namespace: &str,
    name: &str,
    spec: &MailSpec,
) -> Result<MailRequest> {
    let sql = format!(
        r#"
        insert into mail_requests (namespace, name, uid, spec)
        values ($1, $2, $3, $4)
        returning {COLUMNS}
        "#
    );
    let row = sqlx::query(&sql)
        .bind(namespace)
        .bind(name)
        .bind(Uuid::new_v4())
        .bind(Json(spec))
        .fetch_one(pool)
        .await
        .with_context(|| format!("insert_request {namespace}/{name} failed"))?;
    row_to_request(&row)
}

pub async fn fetch_request(pool: &PgPool, key: &RecordKey) -> Result<Option<MailRequest>> {
    let sql = format!("select {COLUMNS} from mail_requests where namespace = $1 and name = $2");
    let row = sqlx::query(&sql)
        .bind(&key.namespace)
        .bind(&key.name)
        .fetch_optional(pool)
        .await
        .with_context(|| format!("fetch_request {key} failed"))?;
    row.as_ref().map(row_to_request).transpose()
}

/// Replace the desired state. Bumps `generation` only if the spec changed.
/// Returns `None` if the record does not exist.
pub async fn update_spec(pool: &PgPool, key: &RecordKey, spec: &MailSpec) -> Result<Option<MailRequest>> {
    let sql = format!(
        r#"
        update mail_requests
        set spec = $3,
            generation = case when spec = $3 then generation else generation + 1 end,
            resource_version = resource_version + 1
        where namespace = $1 and name = $2
        returning {COLUMNS}
        "#
    );
    let row = sqlx::query(&sql)
        .bind(&key.namespace)
        .bind(&key.name)
        .bind(Json(spec))
        .fetch_optional(pool)
        .await
        .with_context(|| format!("update_spec {key} failed"))?;
    row.as_ref().map(row_to_request).transpose()
}

/// Mark a record for deletion. The row is removed at once if no finalizer
/// guards it. Returns `false` if the record does not exist.
pub async fn request_delete(pool: &PgPool, key: &RecordKey) -> Result<bool> {
    let mut tx = pool.begin().await.context("request_delete begin failed")?;

    let row = sqlx::query(
        r#"
        update mail_requests
        set deletion_requested_at = coalesce(deletion_requested_at, now()),
            resource_version = resource_version + 1
        where namespace = $1 and name = $2
        returning finalizers
        "#,
    )
    .bind(&key.namespace)
    .bind(&key.name)
    .fetch_optional(&mut *tx)
    .await
    .with_context(|| format!("request_delete {key} failed"))?;

    let Some(row) = row else {
        tx.rollback().await.ok();
        return Ok(false);
    };
    let finalizers: Value = row.try_get("finalizers")?;
    if finalizers.as_array().map(|a| a.is_empty()).unwrap_or(true) {
        sqlx::query("delete from mail_requests where namespace = $1 and name = $2")
            .bind(&key.namespace)
            .bind(&key.name)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("request_delete remove {key} failed"))?;
        debug!(record = %key, "unguarded record removed");
    }

    tx.commit().await.context("request_delete commit failed")?;
    Ok(true)
}

/// Set (`Some`) or clear (`None`) one annotation. Returns `false` if the
/// record does not exist.
pub async fn set_annotation(
    pool: &PgPool,
    key: &RecordKey,
    annotation: &str,
    value: Option<&str>,
) -> Result<bool> {
    let res = match value {
        Some(v) => {
            sqlx::query(
                r#"
                update mail_requests
                set annotations = annotations || jsonb_build_object($3::text, $4::text),
                    resource_version = resource_version + 1
                where namespace = $1 and name = $2
                "#,
            )
            .bind(&key.namespace)
            .bind(&key.name)
            .bind(annotation)
            .bind(v)
            .execute(pool)
            .await
        }
        None => {
            sqlx::query(
                r#"
                update mail_requests
                set annotations = annotations - $3::text,
                    resource_version = resource_version + 1
                where namespace = $1 and name = $2
                "#,
            )
            .bind(&key.namespace)
            .bind(&key.name)
            .bind(annotation)
            .execute(pool)
            .await
        }
    }
    .with_context(|| format!("set_annotation {key} failed"))?;

    Ok(res.rows_affected() == 1)
}

pub async fn list_keys(pool: &PgPool) -> Result<Vec<RecordKey>> {
    let rows = sqlx::query_as::<_, (String, String)>(
        "select namespace, name from mail_requests order by namespace, name",
    )
    .fetch_all(pool)
    .await
    .context("list_keys failed")?;
    Ok(rows
        .into_iter()
        .map(|(ns, name)| RecordKey::new(ns, name))
        .collect())
}

// ---------------------------------------------------------------------------
// Change feed
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct NotifyPayload {
    namespace: String,
    name: String,
    kind: ChangeKind,
}

/// Decode one `pg_notify` payload from the `mail_requests` trigger.
pub fn parse_notification(payload: &str) -> Result<ChangeEvent> {
    let p: NotifyPayload = serde_json::from_str(payload)
        .map_err(|e| anyhow!("bad change notification {payload:?}: {e}"))?;
    Ok(ChangeEvent::new(RecordKey::new(p.namespace, p.name), p.kind))
}

/// Subscribe to the change feed. Notifications sent while the listener is
/// reconnecting are lost; periodic resync covers the gap.
pub async fn listen_changes(pool: &PgPool) -> Result<mpsc::UnboundedReceiver<ChangeEvent>> {
    let mut listener = PgListener::connect_with(pool)
        .await
        .context("change listener connect failed")?;
    listener
        .listen(CHANGE_CHANNEL)
        .await
        .context("LISTEN mail_requests failed")?;

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        loop {
            match listener.recv().await {
                Ok(n) => match parse_notification(n.payload()) {
                    Ok(ev) => {
                        if tx.send(ev).is_err() {
                            return;
                        }
                    }
                    Err(e) => warn!(error = %e, "ignoring change notification"),
                },
                Err(e) => {
                    if tx.is_closed() {
                        return;
                    }
                    warn!(error = %e, "change listener error; reconnecting");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
    });
    Ok(rx)
}
