use std::collections::VecDeque;
use std::path::Path;

use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;
use uuid::Uuid;

/// One write inside an atomic commit. `Update` is a shallow merge into an
/// existing document and fails (rolling back the whole batch) if the
/// document is missing.
pub enum WriteOp {
    Put {
        collection: String,
        id: String,
        body: Value,
    },
    Update {
        collection: String,
        id: String,
        patch: Value,
    },
    Delete {
        collection: String,
        id: String,
    },
}

struct ChangeEvent {
    kind: &'static str,
    collection: String,
    id: String,
    doc: Value,
}

struct Watcher {
    id: String,
    collection: String,
    filters: Vec<(String, Value)>,
    pending: VecDeque<Value>,
}

/// Document store over SQLite: named collections of JSON documents with
/// atomic multi-record commits and polled live queries.
///
/// The daemon loop is the only writer and the only dispatcher, so a watcher
/// never observes a half-applied batch: events are enqueued only after the
/// transaction commits.
pub struct Store {
    conn: Connection,
    watchers: Vec<Watcher>,
}

impl Store {
    pub fn open(workspace: &Path) -> anyhow::Result<Store> {
        std::fs::create_dir_all(workspace)?;
        let db_path = workspace.join("examhall.sqlite3");
        let conn = Connection::open(db_path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS documents(
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                body TEXT NOT NULL,
                PRIMARY KEY(collection, id)
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection)",
            [],
        )?;
        Ok(Store {
            conn,
            watchers: Vec::new(),
        })
    }

    pub fn get(&self, collection: &str, id: &str) -> anyhow::Result<Option<Value>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT body FROM documents WHERE collection = ? AND id = ?",
                (collection, id),
                |r| r.get(0),
            )
            .optional()?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// All documents in `collection` whose fields equal every filter value.
    pub fn query(&self, collection: &str, filters: &[(String, Value)]) -> anyhow::Result<Vec<Value>> {
        Ok(self
            .rows(collection)?
            .into_iter()
            .filter(|(_, doc)| matches_filters(doc, filters))
            .map(|(_, doc)| doc)
            .collect())
    }

    pub fn put(&mut self, collection: &str, id: &str, body: Value) -> anyhow::Result<()> {
        self.atomic_batch(vec![WriteOp::Put {
            collection: collection.to_string(),
            id: id.to_string(),
            body,
        }])
    }

    pub fn update(&mut self, collection: &str, id: &str, patch: Value) -> anyhow::Result<()> {
        self.atomic_batch(vec![WriteOp::Update {
            collection: collection.to_string(),
            id: id.to_string(),
            patch,
        }])
    }

    pub fn delete(&mut self, collection: &str, id: &str) -> anyhow::Result<()> {
        self.atomic_batch(vec![WriteOp::Delete {
            collection: collection.to_string(),
            id: id.to_string(),
        }])
    }

    /// Applies every op in one transaction. Nothing is visible (to readers or
    /// watchers) unless the whole batch commits.
    pub fn atomic_batch(&mut self, ops: Vec<WriteOp>) -> anyhow::Result<()> {
        let mut events: Vec<ChangeEvent> = Vec::new();
        let tx = self.conn.transaction()?;
        for op in ops {
            match op {
                WriteOp::Put {
                    collection,
                    id,
                    body,
                } => {
                    let existed: bool = tx
                        .query_row(
                            "SELECT 1 FROM documents WHERE collection = ? AND id = ?",
                            (&collection, &id),
                            |r| r.get::<_, i64>(0),
                        )
                        .optional()?
                        .is_some();
                    tx.execute(
                        "INSERT INTO documents(collection, id, body) VALUES(?, ?, ?)
                         ON CONFLICT(collection, id) DO UPDATE SET body = excluded.body",
                        (&collection, &id, body.to_string()),
                    )?;
                    events.push(ChangeEvent {
                        kind: if existed { "modified" } else { "added" },
                        collection,
                        id,
                        doc: body,
                    });
                }
                WriteOp::Update {
                    collection,
                    id,
                    patch,
                } => {
                    let current: Option<String> = tx
                        .query_row(
                            "SELECT body FROM documents WHERE collection = ? AND id = ?",
                            (&collection, &id),
                            |r| r.get(0),
                        )
                        .optional()?;
                    let Some(current) = current else {
                        anyhow::bail!("no document {}/{}", collection, id);
                    };
                    let mut body: Value = serde_json::from_str(&current)?;
                    merge_shallow(&mut body, patch);
                    tx.execute(
                        "UPDATE documents SET body = ? WHERE collection = ? AND id = ?",
                        (body.to_string(), &collection, &id),
                    )?;
                    events.push(ChangeEvent {
                        kind: "modified",
                        collection,
                        id,
                        doc: body,
                    });
                }
                WriteOp::Delete { collection, id } => {
                    let prior: Option<String> = tx
                        .query_row(
                            "SELECT body FROM documents WHERE collection = ? AND id = ?",
                            (&collection, &id),
                            |r| r.get(0),
                        )
                        .optional()?;
                    // Deleting an absent document is a no-op.
                    if let Some(prior) = prior {
                        tx.execute(
                            "DELETE FROM documents WHERE collection = ? AND id = ?",
                            (&collection, &id),
                        )?;
                        events.push(ChangeEvent {
                            kind: "removed",
                            collection,
                            id,
                            doc: serde_json::from_str(&prior)?,
                        });
                    }
                }
            }
        }
        tx.commit()?;

        for ev in events {
            self.dispatch(ev);
        }
        Ok(())
    }

    /// Registers a live query. The watcher's queue is seeded with an `added`
    /// event per currently matching document, then receives every committed
    /// change that matches.
    pub fn subscribe(
        &mut self,
        collection: &str,
        filters: Vec<(String, Value)>,
    ) -> anyhow::Result<String> {
        let watch_id = Uuid::new_v4().to_string();
        let mut pending = VecDeque::new();
        for (id, doc) in self.rows(collection)? {
            if matches_filters(&doc, &filters) {
                pending.push_back(event_json("added", collection, &id, &doc));
            }
        }
        self.watchers.push(Watcher {
            id: watch_id.clone(),
            collection: collection.to_string(),
            filters,
            pending,
        });
        Ok(watch_id)
    }

    /// Drains the pending events for a watcher; `None` for an unknown handle.
    pub fn poll(&mut self, watch_id: &str) -> Option<Vec<Value>> {
        let w = self.watchers.iter_mut().find(|w| w.id == watch_id)?;
        Some(w.pending.drain(..).collect())
    }

    pub fn unsubscribe(&mut self, watch_id: &str) -> bool {
        let before = self.watchers.len();
        self.watchers.retain(|w| w.id != watch_id);
        self.watchers.len() < before
    }

    fn rows(&self, collection: &str) -> anyhow::Result<Vec<(String, Value)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, body FROM documents WHERE collection = ?")?;
        let raw = stmt
            .query_map([collection], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        let mut out = Vec::with_capacity(raw.len());
        for (id, body) in raw {
            out.push((id, serde_json::from_str(&body)?));
        }
        Ok(out)
    }

    fn dispatch(&mut self, ev: ChangeEvent) {
        for w in &mut self.watchers {
            if w.collection == ev.collection && matches_filters(&ev.doc, &w.filters) {
                w.pending
                    .push_back(event_json(ev.kind, &ev.collection, &ev.id, &ev.doc));
            }
        }
    }
}

fn matches_filters(doc: &Value, filters: &[(String, Value)]) -> bool {
    filters
        .iter()
        .all(|(field, expected)| doc.get(field) == Some(expected))
}

fn event_json(kind: &str, collection: &str, id: &str, doc: &Value) -> Value {
    serde_json::json!({
        "type": kind,
        "collection": collection,
        "id": id,
        "doc": doc,
    })
}

/// Top-level field merge: patch keys overwrite (or introduce) fields on the
/// existing document; an explicit null stores null.
fn merge_shallow(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (k, v) in patch_map {
                base_map.insert(k, v);
            }
        }
        (base, patch) => *base = patch,
    }
}
