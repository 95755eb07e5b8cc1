//! SQLite-backed reference `PersistenceStore`.
//!
//! # Responsibility
//! - Persist items, bucket order and claimants in the migrated schema.
//! - Publish one `ChangeEvent` per successful write to an attached notifier.
//!
//! # Invariants
//! - Writes validate items before any SQL mutation.
//! - `sort_order` is contiguous from zero within each bucket after every
//!   write.
//! - Claim and release are single conditional `UPDATE` statements.

use crate::model::event::ChangeEvent;
use crate::model::ids::{BucketId, Identity, ItemId};
use crate::model::item::{normalize_label, EntityKind, Item};
use crate::model::status::{MeetingStatus, Status, TaskStatus};
use crate::repo::persistence::{
    BucketRecord, ClaimOutcome, ItemPatch, PersistError, PersistResult, PersistenceStore,
    ReleaseOutcome,
};
use crate::sync::notifier::ChangeNotifier;
use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use serde_json::{Map, Value};

const ITEM_SELECT_SQL: &str = "SELECT
    id,
    kind,
    bucket,
    sort_order,
    fields,
    status,
    claimant,
    revision
FROM items";

const TOUCH_SQL: &str = "updated_at = (strftime('%s', 'now') * 1000)";

/// Reference store over one migrated SQLite connection.
pub struct SqlitePersistenceStore<'conn> {
    conn: &'conn Connection,
    notifier: Option<ChangeNotifier>,
}

impl<'conn> SqlitePersistenceStore<'conn> {
    /// Wraps a connection returned by `db::open_db*`.
    pub fn new(conn: &'conn Connection) -> Self {
        Self {
            conn,
            notifier: None,
        }
    }

    /// Publishes every successful write to `notifier`.
    pub fn with_notifier(mut self, notifier: ChangeNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Reads one item by id.
    pub fn get(&self, id: &ItemId) -> PersistResult<Option<Item>> {
        load_item(self.conn, id)
    }

    fn publish(&self, event: ChangeEvent) {
        if let Some(notifier) = &self.notifier {
            notifier.publish(&event);
        }
    }
}

impl PersistenceStore for SqlitePersistenceStore<'_> {
    fn create(&self, item: &Item) -> PersistResult<Item> {
        item.validate()?;

        let tx = self.conn.unchecked_transaction()?;
        if let Some(stored_revision) = stored_revision(&tx, &item.id)? {
            return Err(PersistError::Conflict {
                id: item.id.clone(),
                stored_revision,
            });
        }
        ensure_bucket(&tx, &item.bucket)?;

        let revision = item.revision.max(1);
        tx.execute(
            "INSERT INTO items (id, kind, bucket, sort_order, fields, status, claimant, revision)
             VALUES (?1, ?2, ?3, 0, ?4, ?5, ?6, ?7);",
            params![
                item.id.as_str(),
                item.kind.as_str(),
                item.bucket.as_str(),
                serde_json::to_string(&item.fields)?,
                item.status.map(Status::as_str),
                item.claimant.as_ref().map(Identity::as_str),
                revision_to_db(revision)?,
            ],
        )?;

        let mut order = bucket_order(&tx, &item.bucket)?;
        order.retain(|existing| existing != item.id.as_str());
        let index = item
            .position
            .map_or(order.len(), |hint| (hint as usize).min(order.len()));
        order.insert(index, item.id.as_str().to_string());
        write_order(&tx, &order)?;

        let stored = require_item(&tx, &item.id)?;
        tx.commit()?;

        info!(
            "event=item_create module=repo status=ok kind={} revision={}",
            stored.kind.as_str(),
            stored.revision
        );
        self.publish(ChangeEvent::insert(stored.clone(), stored.revision));
        Ok(stored)
    }

    fn update(&self, id: &ItemId, patch: &ItemPatch) -> PersistResult<Item> {
        let tx = self.conn.unchecked_transaction()?;
        let mut item = require_item(&tx, id)?;
        if item.revision > patch.revision {
            debug!(
                "event=item_update module=repo status=conflict stored={} requested={}",
                item.revision, patch.revision
            );
            return Err(PersistError::Conflict {
                id: id.clone(),
                stored_revision: item.revision,
            });
        }

        for (key, value) in &patch.fields {
            if value.is_null() {
                item.fields.remove(key);
            } else {
                item.fields.insert(key.clone(), value.clone());
            }
        }
        if let Some(status) = patch.status {
            item.status = Some(status);
        }
        let source_bucket = item.bucket.clone();
        if let Some(bucket) = &patch.bucket {
            item.bucket = bucket.clone();
        }
        item.validate()?;
        let revision = next_revision(item.revision, patch.revision);

        tx.execute(
            &format!(
                "UPDATE items
                 SET bucket = ?1, fields = ?2, status = ?3, revision = ?4, {TOUCH_SQL}
                 WHERE id = ?5;"
            ),
            params![
                item.bucket.as_str(),
                serde_json::to_string(&item.fields)?,
                item.status.map(Status::as_str),
                revision_to_db(revision)?,
                id.as_str(),
            ],
        )?;

        if source_bucket != item.bucket || patch.index.is_some() {
            ensure_bucket(&tx, &item.bucket)?;
            let mut source = bucket_order(&tx, &source_bucket)?;
            source.retain(|existing| existing != id.as_str());
            write_order(&tx, &source)?;

            let mut target = bucket_order(&tx, &item.bucket)?;
            target.retain(|existing| existing != id.as_str());
            let index = patch.index.map_or(target.len(), |index| index.min(target.len()));
            target.insert(index, id.as_str().to_string());
            write_order(&tx, &target)?;
        }

        let stored = require_item(&tx, id)?;
        tx.commit()?;

        debug!(
            "event=item_update module=repo status=ok revision={} moved={}",
            stored.revision,
            source_bucket != stored.bucket
        );
        self.publish(ChangeEvent::update(stored.clone(), stored.revision));
        Ok(stored)
    }

    fn delete(&self, id: &ItemId, revision: u64) -> PersistResult<Option<u64>> {
        let tx = self.conn.unchecked_transaction()?;
        let Some(item) = load_item(&tx, id)? else {
            return Ok(None);
        };
        let deleted_at = next_revision(item.revision, revision);
        tx.execute("DELETE FROM items WHERE id = ?1;", params![id.as_str()])?;
        let order = bucket_order(&tx, &item.bucket)?;
        write_order(&tx, &order)?;
        tx.commit()?;

        info!(
            "event=item_delete module=repo status=ok kind={} revision={}",
            item.kind.as_str(),
            deleted_at
        );
        self.publish(ChangeEvent::delete(id.clone(), item.kind, deleted_at));
        Ok(Some(deleted_at))
    }

    fn conditional_claim(
        &self,
        id: &ItemId,
        identity: &Identity,
        revision: u64,
    ) -> PersistResult<ClaimOutcome> {
        let tx = self.conn.unchecked_transaction()?;
        let current = require_claimable(&tx, id)?;
        let changed = tx.execute(
            &format!(
                "UPDATE items
                 SET claimant = ?1, revision = MAX(revision + 1, ?2), {TOUCH_SQL}
                 WHERE id = ?3 AND claimant IS NULL;"
            ),
            params![identity.as_str(), revision_to_db(revision)?, id.as_str()],
        )?;
        if changed == 0 {
            let holder = current.claimant.ok_or_else(|| {
                PersistError::InvalidData(format!("claim on {id} lost without a holder"))
            })?;
            debug!("event=item_claim module=repo status=already_claimed");
            return Ok(ClaimOutcome::AlreadyClaimed { holder });
        }
        let stored = require_item(&tx, id)?;
        tx.commit()?;

        info!(
            "event=item_claim module=repo status=ok kind={} revision={}",
            stored.kind.as_str(),
            stored.revision
        );
        self.publish(ChangeEvent::update(stored.clone(), stored.revision));
        Ok(ClaimOutcome::Claimed(stored))
    }

    fn conditional_release(
        &self,
        id: &ItemId,
        identity: &Identity,
        revision: u64,
    ) -> PersistResult<ReleaseOutcome> {
        let tx = self.conn.unchecked_transaction()?;
        let current = require_claimable(&tx, id)?;
        let changed = tx.execute(
            &format!(
                "UPDATE items
                 SET claimant = NULL, revision = MAX(revision + 1, ?1), {TOUCH_SQL}
                 WHERE id = ?2 AND claimant = ?3;"
            ),
            params![revision_to_db(revision)?, id.as_str(), identity.as_str()],
        )?;
        if changed == 0 {
            debug!("event=item_release module=repo status=not_claimant");
            return Ok(ReleaseOutcome::NotClaimant {
                holder: current.claimant,
            });
        }
        let stored = require_item(&tx, id)?;
        tx.commit()?;

        info!(
            "event=item_release module=repo status=ok kind={} revision={}",
            stored.kind.as_str(),
            stored.revision
        );
        self.publish(ChangeEvent::update(stored.clone(), stored.revision));
        Ok(ReleaseOutcome::Released(stored))
    }

    fn list(&self) -> PersistResult<Vec<Item>> {
        let mut stmt = self.conn.prepare(
            "SELECT
                items.id,
                items.kind,
                items.bucket,
                items.sort_order,
                items.fields,
                items.status,
                items.claimant,
                items.revision
             FROM items
             LEFT JOIN buckets ON buckets.id = items.bucket
             ORDER BY COALESCE(buckets.board_order, 2147483647), items.bucket, items.sort_order;",
        )?;
        let mut rows = stmt.query([])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(parse_item_row(row)?);
        }
        Ok(items)
    }

    fn list_buckets(&self) -> PersistResult<Vec<BucketRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, label FROM buckets ORDER BY board_order, id;")?;
        let mut rows = stmt.query([])?;
        let mut buckets = Vec::new();
        while let Some(row) = rows.next()? {
            let id: String = row.get(0)?;
            buckets.push(BucketRecord {
                id: BucketId::new(id)?,
                label: row.get(1)?,
            });
        }
        Ok(buckets)
    }

    fn put_bucket(&self, id: &BucketId, label: &str) -> PersistResult<()> {
        let label = normalize_label(label.to_string())?;
        self.conn.execute(
            "INSERT INTO buckets (id, label, board_order)
             VALUES (?1, ?2, (SELECT COALESCE(MAX(board_order) + 1, 0) FROM buckets))
             ON CONFLICT(id) DO UPDATE SET label = excluded.label;",
            params![id.as_str(), label],
        )?;
        Ok(())
    }
}

fn next_revision(stored: u64, requested: u64) -> u64 {
    stored.saturating_add(1).max(requested)
}

fn revision_to_db(revision: u64) -> PersistResult<i64> {
    i64::try_from(revision)
        .map_err(|_| PersistError::InvalidData(format!("revision {revision} exceeds i64 range")))
}

fn stored_revision(tx: &Transaction<'_>, id: &ItemId) -> PersistResult<Option<u64>> {
    let revision = tx
        .query_row(
            "SELECT revision FROM items WHERE id = ?1;",
            params![id.as_str()],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    revision
        .map(|value| {
            u64::try_from(value)
                .map_err(|_| PersistError::InvalidData(format!("negative revision {value}")))
        })
        .transpose()
}

fn ensure_bucket(tx: &Transaction<'_>, bucket: &BucketId) -> PersistResult<()> {
    tx.execute(
        "INSERT OR IGNORE INTO buckets (id, label, board_order)
         VALUES (?1, ?1, (SELECT COALESCE(MAX(board_order) + 1, 0) FROM buckets));",
        params![bucket.as_str()],
    )?;
    Ok(())
}

fn bucket_order(tx: &Transaction<'_>, bucket: &BucketId) -> PersistResult<Vec<String>> {
    let mut stmt =
        tx.prepare("SELECT id FROM items WHERE bucket = ?1 ORDER BY sort_order, rowid;")?;
    let ids = stmt
        .query_map(params![bucket.as_str()], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

fn write_order(tx: &Transaction<'_>, order: &[String]) -> PersistResult<()> {
    let mut stmt = tx.prepare("UPDATE items SET sort_order = ?1 WHERE id = ?2;")?;
    for (index, id) in order.iter().enumerate() {
        let index = i64::try_from(index)
            .map_err(|_| PersistError::InvalidData(format!("bucket index {index} overflow")))?;
        stmt.execute(params![index, id])?;
    }
    Ok(())
}

fn load_item(conn: &Connection, id: &ItemId) -> PersistResult<Option<Item>> {
    let mut stmt = conn.prepare(&format!("{ITEM_SELECT_SQL} WHERE id = ?1;"))?;
    let mut rows = stmt.query(params![id.as_str()])?;
    match rows.next()? {
        Some(row) => Ok(Some(parse_item_row(row)?)),
        None => Ok(None),
    }
}

fn require_item(conn: &Connection, id: &ItemId) -> PersistResult<Item> {
    load_item(conn, id)?.ok_or_else(|| PersistError::NotFound(id.clone()))
}

fn require_claimable(conn: &Connection, id: &ItemId) -> PersistResult<Item> {
    let item = require_item(conn, id)?;
    if !item.kind.is_claimable() {
        return Err(PersistError::NotClaimable(id.clone()));
    }
    Ok(item)
}

fn parse_item_row(row: &Row<'_>) -> PersistResult<Item> {
    let id: String = row.get(0)?;
    let kind_raw: String = row.get(1)?;
    let bucket: String = row.get(2)?;
    let sort_order: i64 = row.get(3)?;
    let fields_raw: String = row.get(4)?;
    let status_raw: Option<String> = row.get(5)?;
    let claimant: Option<String> = row.get(6)?;
    let revision: i64 = row.get(7)?;

    let kind = EntityKind::parse(&kind_raw)
        .ok_or_else(|| PersistError::InvalidData(format!("unknown item kind `{kind_raw}`")))?;
    let fields: Map<String, Value> = serde_json::from_str(&fields_raw)?;
    let status = status_raw
        .map(|raw| status_from_db(kind, &raw))
        .transpose()?;

    let item = Item {
        id: ItemId::new(id)?,
        kind,
        bucket: BucketId::new(bucket)?,
        fields,
        status,
        claimant: claimant.map(Identity::new).transpose()?,
        revision: u64::try_from(revision)
            .map_err(|_| PersistError::InvalidData(format!("negative revision {revision}")))?,
        pending: false,
        position: u32::try_from(sort_order).ok(),
    };
    item.validate()?;
    Ok(item)
}

fn status_from_db(kind: EntityKind, raw: &str) -> PersistResult<Status> {
    let status = match kind {
        EntityKind::Task => TaskStatus::parse(raw).map(Status::Task),
        EntityKind::Meeting => MeetingStatus::parse(raw).map(Status::Meeting),
        EntityKind::Tool | EntityKind::Shift => None,
    };
    status.ok_or_else(|| {
        PersistError::InvalidData(format!("status `{raw}` is not valid for {}", kind.as_str()))
    })
}
