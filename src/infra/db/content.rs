use async_trait::async_trait;
use futures::StreamExt;
use pubcache_api_types::ContentRow;
use tracing::{debug, instrument};

use crate::application::repos::{ContentSource, RepoError, RowStream};
use crate::domain::types::{ContentType, DomainAssignment, TreeKind};

use super::{PostgresContentSource, map_sqlx_error};

const ROW_COLUMNS: &str = "n.id, n.parent_id, n.sort_order, n.level, n.path";
const ROW_ORDER: &str = "ORDER BY n.level, n.sort_order, n.id";

const STREAM_TREE_SQL: &str = "SELECT n.id, n.parent_id, n.sort_order, n.level, n.path, \
     p.payload, p.rv, TRUE AS published \
     FROM nodes n \
     INNER JOIN published_payloads p ON p.node_id = n.id \
     WHERE n.kind = $1 AND NOT n.trashed \
     ORDER BY n.level, n.sort_order, n.id";

/// Serialized node document built from the write-side tables.
const PAYLOAD_EXPR: &str = "jsonb_build_object( \
    'key', d.node_key, \
    'typeAlias', ct.alias, \
    'name', d.name, \
    'urlName', d.url_name, \
    'templateId', d.template_id, \
    'createDate', to_char(d.create_date AT TIME ZONE 'UTC', 'YYYY-MM-DD\"T\"HH24:MI:SS\"Z\"'), \
    'updateDate', to_char(d.update_date AT TIME ZONE 'UTC', 'YYYY-MM-DD\"T\"HH24:MI:SS\"Z\"'), \
    'creatorId', d.creator_id, \
    'writerId', d.writer_id, \
    'properties', d.properties)::text";

#[derive(sqlx::FromRow)]
struct ContentTypeRow {
    id: i32,
    alias: String,
    kind: TreeKind,
}

impl From<ContentTypeRow> for ContentType {
    fn from(row: ContentTypeRow) -> Self {
        Self {
            id: row.id,
            alias: row.alias,
            kind: row.kind,
        }
    }
}

#[derive(sqlx::FromRow)]
struct DomainRow {
    content_id: i32,
    host: String,
    is_wildcard: bool,
}

impl From<DomainRow> for DomainAssignment {
    fn from(row: DomainRow) -> Self {
        Self {
            content_id: row.content_id,
            host: row.host,
            is_wildcard: row.is_wildcard,
        }
    }
}

fn published_rows_sql(filter: &str) -> String {
    format!(
        "SELECT {ROW_COLUMNS}, p.payload, p.rv, TRUE AS published \
         FROM nodes n \
         INNER JOIN published_payloads p ON p.node_id = n.id \
         WHERE n.kind = $1 AND NOT n.trashed {filter} \
         {ROW_ORDER}"
    )
}

#[async_trait]
impl ContentSource for PostgresContentSource {
    fn stream_tree(&self, kind: TreeKind) -> RowStream<'_> {
        let stream = sqlx::query_as::<_, ContentRow>(STREAM_TREE_SQL)
            .bind(kind)
            .fetch(self.pool())
            .map(|row| row.map_err(map_sqlx_error));
        Box::pin(stream)
    }

    async fn load_branch(&self, kind: TreeKind, id: i32) -> Result<Vec<ContentRow>, RepoError> {
        let sql = published_rows_sql(
            "AND EXISTS (SELECT 1 FROM published_payloads own WHERE own.node_id = $2) \
             AND (n.id = $2 OR n.path LIKE (SELECT b.path FROM nodes b WHERE b.id = $2) || ',%')",
        );
        sqlx::query_as::<_, ContentRow>(&sql)
            .bind(kind)
            .bind(id)
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)
    }

    async fn load_by_content_types(
        &self,
        kind: TreeKind,
        content_type_ids: &[i32],
    ) -> Result<Vec<ContentRow>, RepoError> {
        let sql = published_rows_sql("AND n.content_type_id = ANY($2)");
        sqlx::query_as::<_, ContentRow>(&sql)
            .bind(kind)
            .bind(content_type_ids.to_vec())
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)
    }

    async fn load_preview(
        &self,
        id: i32,
        include_descendants: bool,
    ) -> Result<Vec<ContentRow>, RepoError> {
        let sql = format!(
            "SELECT {ROW_COLUMNS}, v.payload, v.rv, COALESCE(d.published, FALSE) AS published \
             FROM nodes n \
             INNER JOIN preview_payloads v ON v.node_id = n.id \
             LEFT JOIN documents d ON d.node_id = n.id \
             INNER JOIN nodes target ON target.id = $1 \
             WHERE NOT n.trashed \
               AND ((target.path || ',') LIKE (n.path || ',%') \
                    OR ($2 AND n.path LIKE target.path || ',%')) \
             {ROW_ORDER}"
        );
        sqlx::query_as::<_, ContentRow>(&sql)
            .bind(id)
            .bind(include_descendants)
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)
    }

    async fn content_types(&self, kind: TreeKind) -> Result<Vec<ContentType>, RepoError> {
        let rows = sqlx::query_as::<_, ContentTypeRow>(
            "SELECT id, alias, kind FROM content_types WHERE kind = $1 ORDER BY id",
        )
        .bind(kind)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(ContentType::from).collect())
    }

    async fn domain_roots(&self) -> Result<Vec<DomainAssignment>, RepoError> {
        let rows = sqlx::query_as::<_, DomainRow>(
            "SELECT content_id, host, host LIKE '*%' AS is_wildcard FROM domains ORDER BY id",
        )
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(DomainAssignment::from).collect())
    }

    #[instrument(skip(self, content_type_ids))]
    async fn rebuild(
        &self,
        kind: TreeKind,
        group_size: usize,
        content_type_ids: Option<&[i32]>,
    ) -> Result<u64, RepoError> {
        let group_size = group_size.max(1);
        let type_filter: Option<Vec<i32>> = content_type_ids.map(<[i32]>::to_vec);

        let mut tx = self.pool().begin().await.map_err(map_sqlx_error)?;
        let ids: Vec<i32> = sqlx::query_scalar(
            "SELECT n.id FROM nodes n \
             WHERE n.kind = $1 AND ($2::int[] IS NULL OR n.content_type_id = ANY($2)) \
             ORDER BY n.id",
        )
        .bind(kind)
        .bind(type_filter)
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let upsert_published = format!(
            "INSERT INTO published_payloads (node_id, payload, rv) \
             SELECT n.id, {PAYLOAD_EXPR}, 1 \
             FROM nodes n \
             INNER JOIN documents d ON d.node_id = n.id \
             INNER JOIN content_types ct ON ct.id = n.content_type_id \
             WHERE n.id = ANY($1) AND d.published AND NOT n.trashed \
             ON CONFLICT (node_id) DO UPDATE \
             SET payload = EXCLUDED.payload, rv = published_payloads.rv + 1"
        );
        let upsert_preview = format!(
            "INSERT INTO preview_payloads (node_id, payload, rv) \
             SELECT n.id, {PAYLOAD_EXPR}, 1 \
             FROM nodes n \
             INNER JOIN documents d ON d.node_id = n.id \
             INNER JOIN content_types ct ON ct.id = n.content_type_id \
             WHERE n.id = ANY($1) AND NOT n.trashed \
             ON CONFLICT (node_id) DO UPDATE \
             SET payload = EXCLUDED.payload, rv = preview_payloads.rv + 1"
        );
        let prune_published = "DELETE FROM published_payloads p \
             USING nodes n LEFT JOIN documents d ON d.node_id = n.id \
             WHERE p.node_id = n.id AND n.id = ANY($1) \
               AND (n.trashed OR NOT COALESCE(d.published, FALSE))";

        let mut written = 0u64;
        for group in ids.chunks(group_size) {
            let group = group.to_vec();
            sqlx::query(prune_published)
                .bind(&group)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
            written += sqlx::query(&upsert_published)
                .bind(&group)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?
                .rows_affected();
            sqlx::query(&upsert_preview)
                .bind(&group)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
            debug!(group = group.len(), written, "Rebuilt payload group");
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(written)
    }
}
