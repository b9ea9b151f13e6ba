use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kpi_types::{
    Comparator, DefinitionId, FulfillmentResult, InstanceSelectionMode, KpiDefinition,
    LogicalOperator, NodeId, SdInstance, SdInstanceId, SdParameter, SdType, SdTypeId, SdTypeRef,
    ValidationError, ValueDomain,
};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Deserialize;

use crate::codec::{self, AtomRow, LogicalOperationRow, NodeRow};
use crate::error::{ForeignKeyError, StoreError, StoreResult};
use crate::integrity::check_definition;
use crate::{DefinitionUpdate, KpiStore, NewSdType};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS sd_types (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    denotation TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS sd_parameters (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sd_type_id INTEGER NOT NULL REFERENCES sd_types(id),
    denotation TEXT NOT NULL,
    type TEXT NOT NULL,
    UNIQUE (sd_type_id, denotation)
);
CREATE TABLE IF NOT EXISTS sd_instances (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uid TEXT NOT NULL UNIQUE,
    sd_type_id INTEGER NOT NULL REFERENCES sd_types(id)
);
CREATE TABLE IF NOT EXISTS kpi_nodes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    parent_node_id INTEGER REFERENCES kpi_nodes(id)
);
CREATE INDEX IF NOT EXISTS kpi_nodes_parent ON kpi_nodes (parent_node_id);
CREATE TABLE IF NOT EXISTS logical_operation_kpi_nodes (
    node_id INTEGER PRIMARY KEY REFERENCES kpi_nodes(id),
    type TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS atom_kpi_nodes (
    node_id INTEGER PRIMARY KEY REFERENCES kpi_nodes(id),
    sd_parameter_id INTEGER NOT NULL REFERENCES sd_parameters(id),
    type TEXT NOT NULL,
    string_reference_value TEXT,
    boolean_reference_value INTEGER,
    numeric_reference_value REAL
);
CREATE TABLE IF NOT EXISTS kpi_definitions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sd_type_id INTEGER NOT NULL REFERENCES sd_types(id),
    user_identifier TEXT NOT NULL,
    root_node_id INTEGER NOT NULL REFERENCES kpi_nodes(id),
    sd_instance_mode TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS kpi_definition_selected_sd_instances (
    kpi_definition_id INTEGER NOT NULL REFERENCES kpi_definitions(id),
    sd_instance_id INTEGER NOT NULL REFERENCES sd_instances(id),
    PRIMARY KEY (kpi_definition_id, sd_instance_id)
);
CREATE TABLE IF NOT EXISTS kpi_fulfillment_results (
    kpi_definition_id INTEGER NOT NULL REFERENCES kpi_definitions(id),
    sd_instance_id INTEGER NOT NULL REFERENCES sd_instances(id),
    fulfilled INTEGER NOT NULL,
    PRIMARY KEY (kpi_definition_id, sd_instance_id)
);
";

const TREE_NODES: &str = "
WITH RECURSIVE tree(id) AS (
    SELECT ?1
    UNION
    SELECT n.id FROM kpi_nodes n JOIN tree t ON n.parent_node_id = t.id
)
SELECT n.id, n.parent_node_id FROM kpi_nodes n JOIN tree t ON n.id = t.id ORDER BY n.id";

const TREE_LOGICAL: &str = "
WITH RECURSIVE tree(id) AS (
    SELECT ?1
    UNION
    SELECT n.id FROM kpi_nodes n JOIN tree t ON n.parent_node_id = t.id
)
SELECT l.node_id, l.type FROM logical_operation_kpi_nodes l JOIN tree t ON l.node_id = t.id";

const TREE_ATOMS: &str = "
WITH RECURSIVE tree(id) AS (
    SELECT ?1
    UNION
    SELECT n.id FROM kpi_nodes n JOIN tree t ON n.parent_node_id = t.id
)
SELECT a.node_id, a.sd_parameter_id, p.denotation, a.type,
       a.string_reference_value, a.boolean_reference_value, a.numeric_reference_value
FROM atom_kpi_nodes a
JOIN tree t ON a.node_id = t.id
JOIN sd_parameters p ON p.id = a.sd_parameter_id";

fn default_busy_timeout_ms() -> u64 {
    5_000
}

/// Location and tuning of the SQLite database.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SqliteStoreConfig {
    pub path: PathBuf,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl SqliteStoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

/// SQLite-backed store using the table-per-subtype node layout.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

struct DefinitionRow {
    sd_type_id: SdTypeId,
    user_identifier: String,
    root_id: NodeId,
    instance_mode: String,
}

impl SqliteStore {
    pub fn open(config: &SqliteStoreConfig) -> StoreResult<Self> {
        let conn = Connection::open(&config.path)?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> StoreResult<T>) -> StoreResult<T> {
        let guard = self
            .conn
            .lock()
            .map_err(|_| StoreError::Poisoned("sqlite connection"))?;
        f(&guard)
    }

    /// Runs `f` in one transaction; any error rolls the whole transaction back.
    fn with_tx<T>(&self, f: impl FnOnce(&Connection) -> StoreResult<T>) -> StoreResult<T> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|_| StoreError::Poisoned("sqlite connection"))?;
        let tx = guard.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}

fn corrupt_row(table: &'static str, reason: impl Into<String>) -> StoreError {
    StoreError::CorruptRow {
        table,
        reason: reason.into(),
    }
}

fn load_sd_type(conn: &Connection, id: SdTypeId) -> StoreResult<Option<SdType>> {
    let denotation: Option<String> = conn
        .query_row(
            "SELECT denotation FROM sd_types WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    let Some(denotation) = denotation else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT id, denotation, type FROM sd_parameters WHERE sd_type_id = ?1 ORDER BY id",
    )?;
    let raw = stmt
        .query_map(params![id], |row| {
            Ok((row.get::<_, u32>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    let mut parameters = Vec::with_capacity(raw.len());
    for (parameter_id, name, domain) in raw {
        let domain = ValueDomain::from_name(&domain)
            .ok_or_else(|| corrupt_row("sd_parameters", format!("unknown type '{domain}'")))?;
        parameters.push(SdParameter {
            id: parameter_id,
            name,
            domain,
        });
    }
    Ok(Some(SdType {
        id,
        denotation,
        parameters,
    }))
}

fn instance_by_uid(conn: &Connection, uid: &str) -> StoreResult<Option<SdInstance>> {
    Ok(conn
        .query_row(
            "SELECT id, uid, sd_type_id FROM sd_instances WHERE uid = ?1",
            params![uid],
            |row| {
                Ok(SdInstance {
                    id: row.get(0)?,
                    uid: row.get(1)?,
                    sd_type_id: row.get(2)?,
                })
            },
        )
        .optional()?)
}

fn definition_row(conn: &Connection, id: DefinitionId) -> StoreResult<Option<DefinitionRow>> {
    Ok(conn
        .query_row(
            "SELECT sd_type_id, user_identifier, root_node_id, sd_instance_mode
             FROM kpi_definitions WHERE id = ?1",
            params![id],
            |row| {
                Ok(DefinitionRow {
                    sd_type_id: row.get(0)?,
                    user_identifier: row.get(1)?,
                    root_id: row.get(2)?,
                    instance_mode: row.get(3)?,
                })
            },
        )
        .optional()?)
}

fn require_definition(conn: &Connection, id: DefinitionId) -> StoreResult<DefinitionRow> {
    definition_row(conn, id)?.ok_or(StoreError::DefinitionNotFound(id))
}

fn tree_nodes(conn: &Connection, root_id: NodeId) -> StoreResult<Vec<NodeRow>> {
    let mut stmt = conn.prepare(TREE_NODES)?;
    let rows = stmt
        .query_map(params![root_id], |row| {
            Ok(NodeRow {
                id: row.get(0)?,
                parent_id: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn tree_rows(
    conn: &Connection,
    root_id: NodeId,
) -> StoreResult<(Vec<NodeRow>, Vec<LogicalOperationRow>, Vec<AtomRow>)> {
    let nodes = tree_nodes(conn, root_id)?;

    let mut stmt = conn.prepare(TREE_LOGICAL)?;
    let raw = stmt
        .query_map(params![root_id], |row| {
            Ok((row.get::<_, NodeId>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    let mut logical = Vec::with_capacity(raw.len());
    for (node_id, operator) in raw {
        let operator = LogicalOperator::from_name(&operator)
            .ok_or_else(|| codec::corrupt(node_id, "unknown logical operation type"))?;
        logical.push(LogicalOperationRow { node_id, operator });
    }

    let mut stmt = conn.prepare(TREE_ATOMS)?;
    let raw = stmt
        .query_map(params![root_id], |row| {
            Ok((
                row.get::<_, NodeId>(0)?,
                row.get::<_, u32>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<bool>>(5)?,
                row.get::<_, Option<f64>>(6)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    let mut atoms = Vec::with_capacity(raw.len());
    for (node_id, parameter_id, parameter_name, kind, string_value, bool_value, num_value) in raw {
        let comparator = Comparator::from_name(&kind)
            .ok_or_else(|| codec::corrupt(node_id, "unknown atom type"))?;
        atoms.push(AtomRow {
            node_id,
            parameter_id,
            parameter_name,
            comparator,
            string_value,
            bool_value,
            num_value,
        });
    }
    Ok((nodes, logical, atoms))
}

/// Checks `definition` against the registry and writes its tree with fresh node ids.
fn insert_tree(
    conn: &Connection,
    definition: &KpiDefinition,
) -> StoreResult<(NodeId, BTreeSet<SdInstanceId>)> {
    let sd_type = load_sd_type(conn, definition.sd_type.id)?;
    let selected = check_definition(definition, sd_type.as_ref(), |uid| {
        instance_by_uid(conn, uid)
    })?;

    let mut last: NodeId = conn.query_row(
        "SELECT COALESCE((SELECT seq FROM sqlite_sequence WHERE name = 'kpi_nodes'), 0)",
        [],
        |row| row.get(0),
    )?;
    let flat = codec::flatten(&definition.root, || {
        last += 1;
        last
    });

    let mut insert_node =
        conn.prepare("INSERT INTO kpi_nodes (id, parent_node_id) VALUES (?1, ?2)")?;
    for row in &flat.nodes {
        insert_node.execute(params![row.id, row.parent_id])?;
    }
    let mut insert_logical =
        conn.prepare("INSERT INTO logical_operation_kpi_nodes (node_id, type) VALUES (?1, ?2)")?;
    for row in &flat.logical {
        insert_logical.execute(params![row.node_id, row.operator.as_str()])?;
    }
    let mut insert_atom = conn.prepare(
        "INSERT INTO atom_kpi_nodes (node_id, sd_parameter_id, type, string_reference_value,
             boolean_reference_value, numeric_reference_value)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for row in &flat.atoms {
        insert_atom.execute(params![
            row.node_id,
            row.parameter_id,
            row.comparator.as_str(),
            row.string_value,
            row.bool_value,
            row.num_value,
        ])?;
    }

    let root_id = flat
        .root_id()
        .ok_or_else(|| codec::corrupt(0, "flattened tree has no root"))?;
    Ok((root_id, selected))
}

/// Deletes the given nodes children first; `ids` must be in breadth-first order.
fn delete_nodes(conn: &Connection, ids: &[NodeId]) -> StoreResult<()> {
    let mut delete_logical =
        conn.prepare("DELETE FROM logical_operation_kpi_nodes WHERE node_id = ?1")?;
    let mut delete_atom = conn.prepare("DELETE FROM atom_kpi_nodes WHERE node_id = ?1")?;
    let mut delete_node = conn.prepare("DELETE FROM kpi_nodes WHERE id = ?1")?;
    for id in ids.iter().rev() {
        delete_logical.execute(params![id])?;
        delete_atom.execute(params![id])?;
        delete_node.execute(params![id])?;
    }
    Ok(())
}

fn write_selection(
    conn: &Connection,
    definition_id: DefinitionId,
    selected: &BTreeSet<SdInstanceId>,
) -> StoreResult<()> {
    conn.execute(
        "DELETE FROM kpi_definition_selected_sd_instances WHERE kpi_definition_id = ?1",
        params![definition_id],
    )?;
    let mut insert = conn.prepare(
        "INSERT INTO kpi_definition_selected_sd_instances (kpi_definition_id, sd_instance_id)
         VALUES (?1, ?2)",
    )?;
    for instance_id in selected {
        insert.execute(params![definition_id, instance_id])?;
    }
    Ok(())
}

fn materialize(conn: &Connection, id: DefinitionId, row: &DefinitionRow) -> StoreResult<KpiDefinition> {
    let (nodes, logical, atoms) = tree_rows(conn, row.root_id)?;
    let root = codec::reconstruct(row.root_id, &nodes, &logical, &atoms)?;

    let specification: String = conn
        .query_row(
            "SELECT denotation FROM sd_types WHERE id = ?1",
            params![row.sd_type_id],
            |r| r.get(0),
        )
        .optional()?
        .ok_or(ForeignKeyError::UnknownSdType(row.sd_type_id))?;
    let instance_mode = InstanceSelectionMode::from_name(&row.instance_mode).ok_or_else(|| {
        corrupt_row(
            "kpi_definitions",
            format!("unknown instance mode '{}'", row.instance_mode),
        )
    })?;
    let mut stmt = conn.prepare(
        "SELECT i.uid FROM kpi_definition_selected_sd_instances s
         JOIN sd_instances i ON i.id = s.sd_instance_id
         WHERE s.kpi_definition_id = ?1",
    )?;
    let selected_instance_uids = stmt
        .query_map(params![id], |r| r.get::<_, String>(0))?
        .collect::<Result<BTreeSet<_>, _>>()?;

    Ok(KpiDefinition {
        id: Some(id),
        sd_type: SdTypeRef::new(row.sd_type_id, specification),
        user_identifier: row.user_identifier.clone(),
        root,
        instance_mode,
        selected_instance_uids,
    })
}

impl KpiStore for SqliteStore {
    fn register_sd_type(&self, sd_type: &NewSdType) -> StoreResult<SdType> {
        if sd_type.denotation.trim().is_empty() {
            return Err(ValidationError::EmptySdTypeSpecification.into());
        }
        if sd_type.parameters.iter().any(|p| p.name.is_empty()) {
            return Err(ValidationError::EmptyParameterName.into());
        }
        self.with_tx(|conn| {
            let exists: Option<u32> = conn
                .query_row(
                    "SELECT id FROM sd_types WHERE denotation = ?1",
                    params![sd_type.denotation],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_some() {
                return Err(StoreError::Duplicate {
                    entity: "SD type",
                    key: sd_type.denotation.clone(),
                });
            }
            let id: SdTypeId = conn.query_row(
                "INSERT INTO sd_types (denotation) VALUES (?1) RETURNING id",
                params![sd_type.denotation],
                |row| row.get(0),
            )?;
            let mut parameters: Vec<SdParameter> = Vec::with_capacity(sd_type.parameters.len());
            for parameter in &sd_type.parameters {
                if parameters.iter().any(|p| p.name == parameter.name) {
                    return Err(StoreError::Duplicate {
                        entity: "SD parameter",
                        key: parameter.name.clone(),
                    });
                }
                let parameter_id = conn.query_row(
                    "INSERT INTO sd_parameters (sd_type_id, denotation, type)
                     VALUES (?1, ?2, ?3) RETURNING id",
                    params![id, parameter.name, parameter.domain.as_str()],
                    |row| row.get(0),
                )?;
                parameters.push(SdParameter {
                    id: parameter_id,
                    name: parameter.name.clone(),
                    domain: parameter.domain,
                });
            }
            Ok(SdType {
                id,
                denotation: sd_type.denotation.clone(),
                parameters,
            })
        })
    }

    fn sd_type(&self, id: SdTypeId) -> StoreResult<Option<SdType>> {
        self.with_conn(|conn| load_sd_type(conn, id))
    }

    fn sd_types(&self) -> StoreResult<Vec<SdType>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id FROM sd_types ORDER BY id")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, SdTypeId>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            let mut sd_types = Vec::with_capacity(ids.len());
            for id in ids {
                sd_types.extend(load_sd_type(conn, id)?);
            }
            Ok(sd_types)
        })
    }

    fn register_sd_instance(&self, uid: &str, sd_type_id: SdTypeId) -> StoreResult<SdInstance> {
        if uid.is_empty() {
            return Err(ValidationError::EmptyInstanceUid.into());
        }
        self.with_tx(|conn| {
            if load_sd_type(conn, sd_type_id)?.is_none() {
                return Err(ForeignKeyError::UnknownSdType(sd_type_id).into());
            }
            if instance_by_uid(conn, uid)?.is_some() {
                return Err(StoreError::Duplicate {
                    entity: "SD instance",
                    key: uid.to_owned(),
                });
            }
            let id = conn.query_row(
                "INSERT INTO sd_instances (uid, sd_type_id) VALUES (?1, ?2) RETURNING id",
                params![uid, sd_type_id],
                |row| row.get(0),
            )?;
            Ok(SdInstance {
                id,
                uid: uid.to_owned(),
                sd_type_id,
            })
        })
    }

    fn sd_instance_by_uid(&self, uid: &str) -> StoreResult<Option<SdInstance>> {
        self.with_conn(|conn| instance_by_uid(conn, uid))
    }

    fn create_definition(&self, definition: &KpiDefinition) -> StoreResult<KpiDefinition> {
        self.with_tx(|conn| {
            let (root_id, selected) = insert_tree(conn, definition)?;
            let id: DefinitionId = conn.query_row(
                "INSERT INTO kpi_definitions (sd_type_id, user_identifier, root_node_id, sd_instance_mode)
                 VALUES (?1, ?2, ?3, ?4) RETURNING id",
                params![
                    definition.sd_type.id,
                    definition.user_identifier,
                    root_id,
                    definition.instance_mode.as_str(),
                ],
                |row| row.get(0),
            )?;
            write_selection(conn, id, &selected)?;
            let row = require_definition(conn, id)?;
            materialize(conn, id, &row)
        })
    }

    fn update_definition(
        &self,
        id: DefinitionId,
        definition: &KpiDefinition,
    ) -> StoreResult<DefinitionUpdate> {
        self.with_tx(|conn| {
            let previous = require_definition(conn, id)?;
            let old_nodes =
                codec::reachable_from(previous.root_id, &tree_nodes(conn, previous.root_id)?);

            let (root_id, selected) = insert_tree(conn, definition)?;
            conn.execute(
                "UPDATE kpi_definitions
                 SET sd_type_id = ?2, user_identifier = ?3, root_node_id = ?4, sd_instance_mode = ?5
                 WHERE id = ?1",
                params![
                    id,
                    definition.sd_type.id,
                    definition.user_identifier,
                    root_id,
                    definition.instance_mode.as_str(),
                ],
            )?;
            write_selection(conn, id, &selected)?;

            let new_nodes: BTreeSet<NodeId> =
                codec::reachable_from(root_id, &tree_nodes(conn, root_id)?)
                    .into_iter()
                    .collect();
            let reclaimed: Vec<NodeId> = old_nodes
                .into_iter()
                .filter(|node| !new_nodes.contains(node))
                .collect();
            delete_nodes(conn, &reclaimed)?;

            let row = require_definition(conn, id)?;
            Ok(DefinitionUpdate {
                definition: materialize(conn, id, &row)?,
                reclaimed_nodes: reclaimed.into_iter().collect(),
            })
        })
    }

    fn delete_definition(&self, id: DefinitionId) -> StoreResult<BTreeSet<NodeId>> {
        self.with_tx(|conn| {
            let row = require_definition(conn, id)?;
            let reachable = codec::reachable_from(row.root_id, &tree_nodes(conn, row.root_id)?);
            conn.execute(
                "DELETE FROM kpi_fulfillment_results WHERE kpi_definition_id = ?1",
                params![id],
            )?;
            conn.execute(
                "DELETE FROM kpi_definition_selected_sd_instances WHERE kpi_definition_id = ?1",
                params![id],
            )?;
            conn.execute("DELETE FROM kpi_definitions WHERE id = ?1", params![id])?;
            delete_nodes(conn, &reachable)?;
            Ok(reachable.into_iter().collect())
        })
    }

    fn load_definition(&self, id: DefinitionId) -> StoreResult<Option<KpiDefinition>> {
        self.with_conn(|conn| match definition_row(conn, id)? {
            Some(row) => materialize(conn, id, &row).map(Some),
            None => Ok(None),
        })
    }

    fn load_definitions(&self) -> StoreResult<Vec<KpiDefinition>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id FROM kpi_definitions ORDER BY id")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, DefinitionId>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            let mut definitions = Vec::with_capacity(ids.len());
            for id in ids {
                let row = require_definition(conn, id)?;
                definitions.push(materialize(conn, id, &row)?);
            }
            Ok(definitions)
        })
    }

    fn definition_node_ids(&self, id: DefinitionId) -> StoreResult<BTreeSet<NodeId>> {
        self.with_conn(|conn| {
            let row = require_definition(conn, id)?;
            Ok(codec::reachable_from(row.root_id, &tree_nodes(conn, row.root_id)?)
                .into_iter()
                .collect())
        })
    }

    fn node_ids(&self) -> StoreResult<BTreeSet<NodeId>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id FROM kpi_nodes")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, NodeId>(0))?
                .collect::<Result<BTreeSet<_>, _>>()?;
            Ok(ids)
        })
    }

    fn upsert_result(&self, result: FulfillmentResult) -> StoreResult<()> {
        self.with_tx(|conn| {
            require_definition(conn, result.definition_id)?;
            let instance: Option<u32> = conn
                .query_row(
                    "SELECT id FROM sd_instances WHERE id = ?1",
                    params![result.instance_id],
                    |row| row.get(0),
                )
                .optional()?;
            if instance.is_none() {
                return Err(ForeignKeyError::UnknownInstanceId(result.instance_id).into());
            }
            conn.execute(
                "INSERT INTO kpi_fulfillment_results (kpi_definition_id, sd_instance_id, fulfilled)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT (kpi_definition_id, sd_instance_id)
                 DO UPDATE SET fulfilled = excluded.fulfilled",
                params![result.definition_id, result.instance_id, result.fulfilled],
            )?;
            Ok(())
        })
    }

    fn load_result(
        &self,
        definition_id: DefinitionId,
        instance_id: SdInstanceId,
    ) -> StoreResult<Option<FulfillmentResult>> {
        self.with_conn(|conn| {
            let fulfilled: Option<bool> = conn
                .query_row(
                    "SELECT fulfilled FROM kpi_fulfillment_results
                     WHERE kpi_definition_id = ?1 AND sd_instance_id = ?2",
                    params![definition_id, instance_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(fulfilled.map(|fulfilled| FulfillmentResult {
                definition_id,
                instance_id,
                fulfilled,
            }))
        })
    }

    fn load_results(&self) -> StoreResult<Vec<FulfillmentResult>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT kpi_definition_id, sd_instance_id, fulfilled FROM kpi_fulfillment_results
                 ORDER BY kpi_definition_id, sd_instance_id",
            )?;
            let results = stmt
                .query_map([], |row| {
                    Ok(FulfillmentResult {
                        definition_id: row.get(0)?,
                        instance_id: row.get(1)?,
                        fulfilled: row.get(2)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(results)
        })
    }
}
