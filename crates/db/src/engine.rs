//! In-process table engine with optional snapshot persistence.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::attribute::{AttributeValue, Item};
use crate::error::{DbError, Result};
use crate::expression::{Condition, UpdateExpression};
use crate::snapshot::{self, Snapshot, TableSnapshot};
use crate::table::{TableDefinition, TableDescription, TableStatus};

#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// When set, state is loaded from and written to this file.
    pub snapshot_path: Option<PathBuf>,
    /// Time a new table spends in `CREATING`.
    pub provisioning_delay: Duration,
}

/// Polling policy for [`MemoryEngine::wait_until_active`].
#[derive(Debug, Clone, Copy)]
pub struct WaitPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(50),
            max_attempts: 40,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScanRequest {
    pub limit: Option<usize>,
    /// Resume after this key (the previous page's `last_evaluated_key`).
    pub exclusive_start_key: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ScanOutput {
    pub items: Vec<Item>,
    /// Set when more items remain after this page.
    pub last_evaluated_key: Option<String>,
}

struct TableState {
    definition: TableDefinition,
    created_at: String,
    ready_at: Instant,
    items: BTreeMap<String, Item>,
}

impl TableState {
    fn status(&self) -> TableStatus {
        if Instant::now() >= self.ready_at {
            TableStatus::Active
        } else {
            TableStatus::Creating
        }
    }

    fn describe(&self) -> TableDescription {
        TableDescription {
            name: self.definition.name.clone(),
            key_schema: self.definition.key_schema.clone(),
            billing_mode: self.definition.billing_mode,
            status: self.status(),
            item_count: self.items.len(),
            created_at: self.created_at.clone(),
        }
    }

    fn hash_key(&self) -> &str {
        &self.definition.key_schema.hash_key
    }
}

/// Key-value table engine shared by every request.
///
/// Every item write happens under the write lock, so each one is atomic with
/// respect to concurrent readers and writers. There is no versioning; the
/// last write to a key wins.
pub struct MemoryEngine {
    options: EngineOptions,
    tables: RwLock<HashMap<String, TableState>>,
}

impl MemoryEngine {
    /// Engine without persistence.
    pub fn in_memory() -> Self {
        Self::with_options(EngineOptions::default())
    }

    fn with_options(options: EngineOptions) -> Self {
        Self {
            options,
            tables: RwLock::new(HashMap::new()),
        }
    }

    /// Open an engine, restoring tables from the snapshot file if one exists.
    pub async fn open(options: EngineOptions) -> Result<Self> {
        let engine = Self::with_options(options);

        if let Some(path) = &engine.options.snapshot_path {
            if let Some(snapshot) = snapshot::load(path).await? {
                let mut tables = engine.tables.write().await;
                let now = Instant::now();
                for table in snapshot.tables {
                    let hash_key = table.definition.key_schema.hash_key.clone();
                    let items = table
                        .items
                        .into_iter()
                        .filter_map(|item| {
                            let key = item.get(&hash_key)?.as_s()?.to_string();
                            Some((key, item))
                        })
                        .collect();
                    tables.insert(
                        table.definition.name.clone(),
                        TableState {
                            definition: table.definition,
                            created_at: table.created_at,
                            ready_at: now,
                            items,
                        },
                    );
                }
                tracing::info!(
                    path = %path.display(),
                    tables = tables.len(),
                    "restored engine snapshot"
                );
            }
        }

        Ok(engine)
    }

    pub async fn create_table(&self, definition: TableDefinition) -> Result<TableDescription> {
        if definition.name.trim().is_empty() {
            return Err(DbError::Validation("table name must not be empty".into()));
        }
        if definition.key_schema.hash_key.trim().is_empty() {
            return Err(DbError::Validation("hash key name must not be empty".into()));
        }

        let mut tables = self.tables.write().await;
        if tables.contains_key(&definition.name) {
            return Err(DbError::ResourceInUse {
                table: definition.name,
            });
        }

        let state = TableState {
            created_at: now_rfc3339(),
            ready_at: Instant::now() + self.options.provisioning_delay,
            items: BTreeMap::new(),
            definition,
        };
        let description = state.describe();
        tables.insert(description.name.clone(), state);
        if let Err(err) = self.persist(&tables).await {
            tables.remove(&description.name);
            return Err(err);
        }

        tracing::info!(
            table = %description.name,
            hash_key = %description.key_schema.hash_key,
            status = %description.status,
            "table created"
        );
        Ok(description)
    }

    pub async fn describe_table(&self, name: &str) -> Result<TableDescription> {
        let tables = self.tables.read().await;
        tables
            .get(name)
            .map(TableState::describe)
            .ok_or_else(|| not_found(name))
    }

    pub async fn list_tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Poll until the table reports `ACTIVE`.
    pub async fn wait_until_active(
        &self,
        name: &str,
        policy: WaitPolicy,
    ) -> Result<TableDescription> {
        for attempt in 1..=policy.max_attempts.max(1) {
            let description = self.describe_table(name).await?;
            if description.status == TableStatus::Active {
                return Ok(description);
            }
            tracing::debug!(table = name, attempt, "waiting for table to become active");
            tokio::time::sleep(policy.interval).await;
        }

        Err(DbError::WaitTimeout {
            table: name.to_string(),
            attempts: policy.max_attempts,
        })
    }

    /// Unconditional upsert. Returns the item it replaced, if any.
    pub async fn put_item(&self, table: &str, item: Item) -> Result<Option<Item>> {
        let mut tables = self.tables.write().await;
        let state = active_mut(&mut tables, table)?;

        let key = match item.get(state.hash_key()) {
            Some(AttributeValue::S(key)) if !key.is_empty() => key.clone(),
            Some(other) => {
                return Err(DbError::Validation(format!(
                    "key attribute '{}' must be a non-empty S, got {}",
                    state.hash_key(),
                    other.type_name()
                )))
            }
            None => {
                return Err(DbError::Validation(format!(
                    "missing key attribute '{}'",
                    state.hash_key()
                )))
            }
        };

        let previous = state.items.insert(key.clone(), item);
        if let Err(err) = self.persist(&tables).await {
            restore(&mut tables, table, &key, previous);
            return Err(err);
        }
        Ok(previous)
    }

    pub async fn get_item(&self, table: &str, key: &str) -> Result<Option<Item>> {
        let tables = self.tables.read().await;
        let state = active(&tables, table)?;
        Ok(state.items.get(key).cloned())
    }

    /// One page of items in key order.
    pub async fn scan(&self, table: &str, request: ScanRequest) -> Result<ScanOutput> {
        use std::ops::Bound;

        let tables = self.tables.read().await;
        let state = active(&tables, table)?;

        let lower = match &request.exclusive_start_key {
            Some(key) => Bound::Excluded(key.clone()),
            None => Bound::Unbounded,
        };
        let limit = request.limit.unwrap_or(usize::MAX).max(1);

        let mut range = state.items.range((lower, Bound::Unbounded));
        let items: Vec<Item> = range.by_ref().take(limit).map(|(_, v)| v.clone()).collect();

        let last_evaluated_key = match range.next() {
            Some(_) => items
                .last()
                .and_then(|item| item.get(state.hash_key()))
                .and_then(AttributeValue::as_s)
                .map(str::to_string),
            None => None,
        };

        Ok(ScanOutput {
            items,
            last_evaluated_key,
        })
    }

    /// Apply `SET` assignments to one item and return it as stored afterwards.
    ///
    /// Without a condition a missing item is created from the key and the
    /// assignments.
    pub async fn update_item(
        &self,
        table: &str,
        key: &str,
        update: &UpdateExpression,
        condition: Option<&Condition>,
    ) -> Result<Item> {
        if update.is_empty() {
            return Err(DbError::Validation("update expression is empty".into()));
        }

        let mut tables = self.tables.write().await;
        let state = active_mut(&mut tables, table)?;

        if update.names().any(|name| name == state.hash_key()) {
            return Err(DbError::Validation(format!(
                "cannot update key attribute '{}'",
                state.hash_key()
            )));
        }

        if let Some(condition) = condition {
            if !check(condition, state.items.get(key)) {
                return Err(DbError::ConditionalCheckFailed);
            }
        }

        let previous = state.items.get(key).cloned();
        let hash_key = state.hash_key().to_string();
        let item = state.items.entry(key.to_string()).or_insert_with(|| {
            Item::from([(hash_key, AttributeValue::S(key.to_string()))])
        });
        for (name, value) in update.assignments() {
            item.insert(name.clone(), value.clone());
        }
        let updated = item.clone();

        if let Err(err) = self.persist(&tables).await {
            restore(&mut tables, table, key, previous);
            return Err(err);
        }
        Ok(updated)
    }

    /// Remove an item, returning the old one.
    pub async fn delete_item(&self, table: &str, key: &str) -> Result<Option<Item>> {
        let mut tables = self.tables.write().await;
        let state = active_mut(&mut tables, table)?;
        let previous = state.items.remove(key);

        if previous.is_some() {
            if let Err(err) = self.persist(&tables).await {
                restore(&mut tables, table, key, previous);
                return Err(err);
            }
        }
        Ok(previous)
    }

    /// Write the snapshot now, if persistence is configured.
    pub async fn flush(&self) -> Result<()> {
        let tables = self.tables.read().await;
        self.persist(&tables).await
    }

    async fn persist(&self, tables: &HashMap<String, TableState>) -> Result<()> {
        let Some(path) = &self.options.snapshot_path else {
            return Ok(());
        };

        let mut snapshot = Snapshot::default();
        for state in tables.values() {
            snapshot.tables.push(TableSnapshot {
                definition: state.definition.clone(),
                created_at: state.created_at.clone(),
                items: state.items.values().cloned().collect(),
            });
        }
        snapshot
            .tables
            .sort_by(|a, b| a.definition.name.cmp(&b.definition.name));

        snapshot::write(path, &snapshot).await
    }
}

/// Put `key` back to how it was before a mutation whose snapshot failed.
fn restore(
    tables: &mut HashMap<String, TableState>,
    table: &str,
    key: &str,
    previous: Option<Item>,
) {
    let Some(state) = tables.get_mut(table) else {
        return;
    };
    match previous {
        Some(item) => {
            state.items.insert(key.to_string(), item);
        }
        None => {
            state.items.remove(key);
        }
    }
    tracing::warn!(table, key, "snapshot write failed, mutation rolled back");
}

fn check(condition: &Condition, current: Option<&Item>) -> bool {
    match condition {
        Condition::AttributeExists(name) => current.is_some_and(|item| item.contains_key(name)),
    }
}

fn active<'a>(tables: &'a HashMap<String, TableState>, name: &str) -> Result<&'a TableState> {
    let state = tables.get(name).ok_or_else(|| not_found(name))?;
    ensure_active(state)?;
    Ok(state)
}

fn active_mut<'a>(
    tables: &'a mut HashMap<String, TableState>,
    name: &str,
) -> Result<&'a mut TableState> {
    let state = tables.get_mut(name).ok_or_else(|| not_found(name))?;
    ensure_active(state)?;
    Ok(state)
}

fn ensure_active(state: &TableState) -> Result<()> {
    match state.status() {
        TableStatus::Active => Ok(()),
        status => Err(DbError::TableNotActive {
            table: state.definition.name.clone(),
            status: status.to_string(),
        }),
    }
}

fn not_found(name: &str) -> DbError {
    DbError::ResourceNotFound {
        table: name.to_string(),
    }
}

fn now_rfc3339() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&Rfc3339)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "books-table";

    fn item(key: &str, title: &str) -> Item {
        Item::from([
            ("book_id".to_string(), AttributeValue::from(key)),
            ("title".to_string(), AttributeValue::from(title)),
        ])
    }

    async fn engine_with_table() -> MemoryEngine {
        let engine = MemoryEngine::in_memory();
        engine
            .create_table(TableDefinition::on_demand(TABLE, "book_id"))
            .await
            .unwrap();
        engine
    }

    #[tokio::test]
    async fn describe_missing_table_is_resource_not_found() {
        let engine = MemoryEngine::in_memory();
        let err = engine.describe_table(TABLE).await.unwrap_err();
        assert!(matches!(err, DbError::ResourceNotFound { .. }));
    }

    #[tokio::test]
    async fn creating_twice_is_resource_in_use() {
        let engine = engine_with_table().await;
        let err = engine
            .create_table(TableDefinition::on_demand(TABLE, "book_id"))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::ResourceInUse { .. }));
    }

    #[tokio::test]
    async fn table_becomes_active_after_provisioning_delay() {
        let engine = MemoryEngine::with_options(EngineOptions {
            snapshot_path: None,
            provisioning_delay: Duration::from_millis(60),
        });
        let created = engine
            .create_table(TableDefinition::on_demand(TABLE, "book_id"))
            .await
            .unwrap();
        assert_eq!(created.status, TableStatus::Creating);

        let err = engine.get_item(TABLE, "x").await.unwrap_err();
        assert!(matches!(err, DbError::TableNotActive { .. }));

        let policy = WaitPolicy {
            interval: Duration::from_millis(20),
            max_attempts: 50,
        };
        let active = engine.wait_until_active(TABLE, policy).await.unwrap();
        assert_eq!(active.status, TableStatus::Active);
    }

    #[tokio::test]
    async fn wait_gives_up_after_max_attempts() {
        let engine = MemoryEngine::with_options(EngineOptions {
            snapshot_path: None,
            provisioning_delay: Duration::from_secs(60),
        });
        engine
            .create_table(TableDefinition::on_demand(TABLE, "book_id"))
            .await
            .unwrap();

        let policy = WaitPolicy {
            interval: Duration::from_millis(1),
            max_attempts: 3,
        };
        let err = engine.wait_until_active(TABLE, policy).await.unwrap_err();
        assert!(matches!(err, DbError::WaitTimeout { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn put_requires_string_key() {
        let engine = engine_with_table().await;
        let mut bad = item("a", "Dune");
        bad.insert("book_id".into(), AttributeValue::N(1.into()));
        assert!(matches!(
            engine.put_item(TABLE, bad).await.unwrap_err(),
            DbError::Validation(_)
        ));

        let mut missing = item("a", "Dune");
        missing.remove("book_id");
        assert!(matches!(
            engine.put_item(TABLE, missing).await.unwrap_err(),
            DbError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn put_is_last_writer_wins() {
        let engine = engine_with_table().await;
        assert!(engine.put_item(TABLE, item("a", "first")).await.unwrap().is_none());
        let replaced = engine.put_item(TABLE, item("a", "second")).await.unwrap();
        assert_eq!(replaced.unwrap()["title"], AttributeValue::from("first"));

        let stored = engine.get_item(TABLE, "a").await.unwrap().unwrap();
        assert_eq!(stored["title"], AttributeValue::from("second"));
    }

    #[tokio::test]
    async fn conditional_update_on_missing_item_creates_nothing() {
        let engine = engine_with_table().await;
        let update = UpdateExpression::new().set("stock", AttributeValue::N(5.into()));
        let condition = Condition::AttributeExists("book_id".into());

        let err = engine
            .update_item(TABLE, "ghost", &update, Some(&condition))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::ConditionalCheckFailed));
        assert!(engine.get_item(TABLE, "ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_touches_only_assigned_attributes() {
        let engine = engine_with_table().await;
        engine.put_item(TABLE, item("a", "Dune")).await.unwrap();

        let update = UpdateExpression::new().set("stock", AttributeValue::N(5.into()));
        let updated = engine
            .update_item(
                TABLE,
                "a",
                &update,
                Some(&Condition::AttributeExists("book_id".into())),
            )
            .await
            .unwrap();

        assert_eq!(updated["title"], AttributeValue::from("Dune"));
        assert_eq!(updated["stock"], AttributeValue::N(5.into()));
    }

    #[tokio::test]
    async fn unconditional_update_upserts() {
        let engine = engine_with_table().await;
        let update = UpdateExpression::new().set("title", AttributeValue::from("New"));
        let created = engine.update_item(TABLE, "n", &update, None).await.unwrap();
        assert_eq!(created["book_id"], AttributeValue::from("n"));
    }

    #[tokio::test]
    async fn key_attribute_cannot_be_updated() {
        let engine = engine_with_table().await;
        engine.put_item(TABLE, item("a", "Dune")).await.unwrap();
        let update = UpdateExpression::new().set("book_id", AttributeValue::from("b"));
        assert!(matches!(
            engine.update_item(TABLE, "a", &update, None).await.unwrap_err(),
            DbError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn delete_returns_old_item_once() {
        let engine = engine_with_table().await;
        engine.put_item(TABLE, item("a", "Dune")).await.unwrap();

        assert!(engine.delete_item(TABLE, "a").await.unwrap().is_some());
        assert!(engine.delete_item(TABLE, "a").await.unwrap().is_none());
        assert!(engine.get_item(TABLE, "a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn paged_scan_visits_every_item_once() {
        let engine = engine_with_table().await;
        for i in 0..7 {
            engine
                .put_item(TABLE, item(&format!("k{i}"), "t"))
                .await
                .unwrap();
        }

        let mut seen = Vec::new();
        let mut request = ScanRequest {
            limit: Some(3),
            exclusive_start_key: None,
        };
        let mut pages = 0;
        loop {
            let page = engine.scan(TABLE, request.clone()).await.unwrap();
            pages += 1;
            seen.extend(
                page.items
                    .iter()
                    .map(|i| i["book_id"].as_s().unwrap().to_string()),
            );
            match page.last_evaluated_key {
                Some(key) => request.exclusive_start_key = Some(key),
                None => break,
            }
        }

        assert_eq!(pages, 3);
        assert_eq!(seen, (0..7).map(|i| format!("k{i}")).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn snapshot_restores_tables_and_items() {
        let dir = tempfile::tempdir().unwrap();
        let options = EngineOptions {
            snapshot_path: Some(dir.path().join("state").join("engine.json")),
            provisioning_delay: Duration::ZERO,
        };

        {
            let engine = MemoryEngine::open(options.clone()).await.unwrap();
            engine
                .create_table(TableDefinition::on_demand(TABLE, "book_id"))
                .await
                .unwrap();
            engine.put_item(TABLE, item("a", "Dune")).await.unwrap();
            engine.put_item(TABLE, item("b", "Emma")).await.unwrap();
            engine.delete_item(TABLE, "b").await.unwrap();
        }

        let reopened = MemoryEngine::open(options).await.unwrap();
        let description = reopened.describe_table(TABLE).await.unwrap();
        assert_eq!(description.status, TableStatus::Active);
        assert_eq!(description.item_count, 1);
        let stored = reopened.get_item(TABLE, "a").await.unwrap().unwrap();
        assert_eq!(stored["title"], AttributeValue::from("Dune"));
    }

    /// Engine whose snapshot directory is swapped for a plain file once the
    /// table holds `a`, so every later snapshot write fails.
    async fn engine_with_broken_snapshot(dir: &std::path::Path) -> MemoryEngine {
        let data = dir.join("data");
        let engine = MemoryEngine::open(EngineOptions {
            snapshot_path: Some(data.join("books.json")),
            provisioning_delay: Duration::ZERO,
        })
        .await
        .unwrap();
        engine
            .create_table(TableDefinition::on_demand(TABLE, "book_id"))
            .await
            .unwrap();
        engine.put_item(TABLE, item("a", "Dune")).await.unwrap();

        std::fs::remove_dir_all(&data).unwrap();
        std::fs::write(&data, "").unwrap();
        engine
    }

    #[tokio::test]
    async fn failed_snapshot_discards_the_put() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_broken_snapshot(dir.path()).await;

        assert!(engine.put_item(TABLE, item("b1", "Emma")).await.is_err());
        assert!(engine.get_item(TABLE, "b1").await.unwrap().is_none());

        assert!(engine.put_item(TABLE, item("a", "Other")).await.is_err());
        let stored = engine.get_item(TABLE, "a").await.unwrap().unwrap();
        assert_eq!(stored["title"], AttributeValue::from("Dune"));
    }

    #[tokio::test]
    async fn failed_snapshot_discards_the_update() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_broken_snapshot(dir.path()).await;
        let update = UpdateExpression::new().set("title", AttributeValue::from("Other"));

        let guard = Condition::AttributeExists("book_id".into());
        assert!(engine
            .update_item(TABLE, "a", &update, Some(&guard))
            .await
            .is_err());
        let stored = engine.get_item(TABLE, "a").await.unwrap().unwrap();
        assert_eq!(stored["title"], AttributeValue::from("Dune"));

        assert!(engine.update_item(TABLE, "new", &update, None).await.is_err());
        assert!(engine.get_item(TABLE, "new").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_snapshot_keeps_the_deleted_item() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_broken_snapshot(dir.path()).await;

        assert!(engine.delete_item(TABLE, "a").await.is_err());
        assert!(engine.get_item(TABLE, "a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn failed_snapshot_discards_the_new_table() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_broken_snapshot(dir.path()).await;

        assert!(engine
            .create_table(TableDefinition::on_demand("other", "id"))
            .await
            .is_err());
        assert!(matches!(
            engine.describe_table("other").await.unwrap_err(),
            DbError::ResourceNotFound { .. }
        ));
    }
}
