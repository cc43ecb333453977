//! SQLite driver for the catalog.
//!
//! The pool is capped at a single connection: every statement is
//! serialized through it, which is the affinity contract sqlite-like
//! drivers require, behind the same async surface the trait exposes.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use crate::cds::dictionary::Dictionary;
use crate::cds::object::{
    CdsObject, INVALID_OBJECT_ID, CDS_ID_FS_ROOT, CDS_ID_ROOT, OBJECT_TYPE_CONTAINER,
    UPNP_CLASS_CONTAINER, is_forbidden_cds_id,
};
use crate::cds::object::{ItemKind, ObjectVariant, MD_DESCRIPTION};
use crate::cds::resource::Resource;
use crate::content::autoscan::{AutoscanDirectory, ScanLevel, ScanMode};
use crate::database::schema::{CREATE_SQL, DB_VERSION, MIGRATIONS};
use crate::database::{
    vpath_escape, vpath_split, BrowseParam, ChangedContainers, Storage, BROWSE_CONTAINERS,
    BROWSE_HIDE_FS_ROOT, BROWSE_ITEMS, BROWSE_TRACK_SORT,
};
use crate::error::{Error, Result};

/// Location column prefixes keep the three path namespaces apart:
/// physical files, physical directories and virtual containers.
const LOC_FILE_PREFIX: char = 'F';
const LOC_DIR_PREFIX: char = 'D';
const LOC_VIRT_PREFIX: char = 'V';

const SELECT_OBJECT: &str = "SELECT o.id, o.ref_id, o.parent_id, o.object_type, o.upnp_class, \
     o.dc_title, o.dc_description, o.location, o.mime_type, o.action, o.state, o.update_id, \
     o.searchable, o.auxdata, o.resources, o.track_number, o.service_id, o.flags, \
     (SELECT COUNT(*) FROM mt_cds_object c WHERE c.parent_id = o.id) AS child_count \
     FROM mt_cds_object o";

pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (and create if missing) the catalog database.
    pub async fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path.display()))
            .map_err(sqlx::Error::from)?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// In-memory database for tests.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self { pool })
    }

    /// Apply pragmas, bootstrap a fresh schema and run migrations.
    pub async fn init(&self) -> Result<()> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await?;
        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&self.pool)
            .await?;
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&self.pool)
            .await?;

        let version = match self.read_db_version().await {
            Ok(Some(v)) => v,
            Ok(None) | Err(_) => {
                info!("database doesn't seem to exist yet, creating schema");
                sqlx::raw_sql(CREATE_SQL).execute(&self.pool).await?;
                self.read_db_version()
                    .await?
                    .ok_or_else(|| Error::Schema("error while creating database".into()))?
            }
        };

        if version > DB_VERSION {
            return Err(Error::UnsupportedSchema {
                found: version,
                supported: DB_VERSION,
            });
        }

        let mut version = version;
        while version < DB_VERSION {
            let migration = MIGRATIONS
                .iter()
                .find(|m| m.from_version == version)
                .ok_or_else(|| {
                    Error::Schema(format!("no migration path from db_version {}", version))
                })?;
            info!("migrating database from version {} to {}", version, version + 1);
            let mut tx = self.pool.begin().await?;
            for statement in migration.statements {
                sqlx::query(statement).execute(&mut *tx).await?;
            }
            tx.commit().await?;
            version += 1;
        }

        debug!("db_version: {}", version);
        Ok(())
    }

    async fn read_db_version(&self) -> Result<Option<i64>> {
        let row = sqlx::query("SELECT value FROM mt_internal_setting WHERE key = 'db_version'")
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let value: String = row.try_get("value")?;
                let version = value
                    .parse::<i64>()
                    .map_err(|_| Error::Schema(format!("unparseable db_version: {}", value)))?;
                Ok(Some(version))
            }
            None => Ok(None),
        }
    }

    fn location_column(obj: &CdsObject) -> Option<String> {
        if obj.location.is_empty() {
            return None;
        }
        match &obj.variant {
            ObjectVariant::Container(_) => {
                if obj.virt {
                    Some(format!("{}{}", LOC_VIRT_PREFIX, obj.location))
                } else {
                    Some(format!("{}{}", LOC_DIR_PREFIX, obj.location))
                }
            }
            ObjectVariant::Item(item) => match item.kind {
                // External URLs are stored verbatim; virtual reflections
                // resolve their media through ref_id and keep no path.
                ItemKind::ExternalUrl => Some(obj.location.clone()),
                _ if obj.virt => None,
                _ => Some(format!("{}{}", LOC_FILE_PREFIX, obj.location)),
            },
        }
    }

    fn object_from_row(row: &SqliteRow) -> Result<CdsObject> {
        let object_type: u32 = row.try_get::<i64, _>("object_type")? as u32;
        let mut obj = CdsObject::create(object_type)?;

        obj.id = row.try_get("id")?;
        obj.ref_id = row.try_get("ref_id")?;
        obj.parent_id = row.try_get("parent_id")?;
        obj.class = row
            .try_get::<Option<String>, _>("upnp_class")?
            .unwrap_or_default();
        obj.title = row
            .try_get::<Option<String>, _>("dc_title")?
            .unwrap_or_default();
        obj.service_id = row.try_get("service_id")?;
        obj.flags = row.try_get::<i64, _>("flags")? as u32;
        obj.restricted = obj.flags & crate::cds::object::OBJECT_FLAG_RESTRICTED != 0;

        if let Some(description) = row.try_get::<Option<String>, _>("dc_description")? {
            obj.metadata.put(MD_DESCRIPTION, description);
        }
        if let Some(auxdata) = row.try_get::<Option<String>, _>("auxdata")? {
            obj.auxdata = Dictionary::decode(&auxdata);
        }
        if let Some(resources) = row.try_get::<Option<String>, _>("resources")? {
            obj.resources = Resource::decode_list(&resources)?;
        }

        let location: Option<String> = row.try_get("location")?;
        match &mut obj.variant {
            ObjectVariant::Container(cont) => {
                cont.searchable = row.try_get::<i64, _>("searchable")? != 0;
                cont.update_id = row.try_get::<i64, _>("update_id")? as u32;
                cont.child_count = row.try_get("child_count")?;
                if let Some(loc) = location {
                    obj.virt = loc.starts_with(LOC_VIRT_PREFIX);
                    obj.location = loc[1..].to_string();
                }
            }
            ObjectVariant::Item(item) => {
                item.mime_type = row
                    .try_get::<Option<String>, _>("mime_type")?
                    .unwrap_or_default();
                item.track_number = row.try_get("track_number")?;
                if let ItemKind::Active { action, state } = &mut item.kind {
                    *action = row
                        .try_get::<Option<String>, _>("action")?
                        .unwrap_or_default();
                    *state = row
                        .try_get::<Option<String>, _>("state")?
                        .unwrap_or_default();
                }
                obj.virt = obj.ref_id.is_some();
                if let Some(loc) = location {
                    if matches!(item.kind, ItemKind::ExternalUrl) {
                        obj.location = loc;
                    } else {
                        obj.location = loc[1..].to_string();
                    }
                }
            }
        }

        Ok(obj)
    }

    async fn load_metadata_for(&self, objects: &mut [CdsObject]) -> Result<()> {
        let item_ids: Vec<i64> = objects.iter().map(|o| o.id).collect();
        if item_ids.is_empty() {
            return Ok(());
        }
        let list = id_list(&item_ids.iter().copied().collect::<HashSet<_>>());
        let rows = sqlx::query(&format!(
            "SELECT item_id, property_name, property_value FROM mt_metadata \
             WHERE item_id IN ({})",
            list
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut by_id: HashMap<i64, Vec<(String, String)>> = HashMap::new();
        for row in rows {
            let item_id: i64 = row.try_get("item_id")?;
            let name: String = row.try_get("property_name")?;
            let value: String = row.try_get("property_value")?;
            by_id.entry(item_id).or_default().push((name, value));
        }

        for obj in objects.iter_mut() {
            if let Some(props) = by_id.remove(&obj.id) {
                for (name, value) in props {
                    obj.metadata.put(name, value);
                }
            }
        }
        Ok(())
    }

    async fn store_metadata(&self, id: i64, metadata: &Dictionary) -> Result<()> {
        sqlx::query("DELETE FROM mt_metadata WHERE item_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        for (name, value) in metadata.iter() {
            if name == MD_DESCRIPTION {
                continue;
            }
            sqlx::query(
                "INSERT INTO mt_metadata (item_id, property_name, property_value) VALUES (?, ?, ?)",
            )
            .bind(id)
            .bind(name)
            .bind(value)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn fetch_object_where(&self, clause: &str, binds: &[&str]) -> Result<Option<CdsObject>> {
        let sql = format!("{} WHERE {} LIMIT 1", SELECT_OBJECT, clause);
        let mut query = sqlx::query(&sql);
        for bind in binds {
            query = query.bind(*bind);
        }
        let row = query.fetch_optional(&self.pool).await?;
        match row {
            Some(row) => {
                let mut objects = vec![Self::object_from_row(&row)?];
                self.load_metadata_for(&mut objects).await?;
                Ok(objects.pop())
            }
            None => Ok(None),
        }
    }

    /// Expand the id set with all descendants, and with virtual
    /// reflections when `all_refs` is set, until a fixpoint.
    async fn collect_removal_set(
        &self,
        seeds: &HashSet<i64>,
        all_refs: bool,
    ) -> Result<HashSet<i64>> {
        let mut set: HashSet<i64> = seeds.clone();
        loop {
            let before = set.len();
            let list = id_list(&set);
            let rows = sqlx::query(&format!(
                "WITH RECURSIVE descendants(id) AS (\
                     SELECT id FROM mt_cds_object WHERE id IN ({list}) \
                     UNION \
                     SELECT o.id FROM mt_cds_object o \
                     JOIN descendants d ON o.parent_id = d.id\
                 ) SELECT id FROM descendants"
            ))
            .fetch_all(&self.pool)
            .await?;
            for row in rows {
                set.insert(row.try_get("id")?);
            }

            if all_refs {
                let list = id_list(&set);
                let rows = sqlx::query(&format!(
                    "SELECT id FROM mt_cds_object WHERE ref_id IN ({list})"
                ))
                .fetch_all(&self.pool)
                .await?;
                for row in rows {
                    set.insert(row.try_get("id")?);
                }
            }

            if set.len() == before {
                return Ok(set);
            }
        }
    }

    async fn delete_objects(&self, set: &HashSet<i64>) -> Result<ChangedContainers> {
        let list = id_list(set);

        let rows = sqlx::query(&format!(
            "SELECT DISTINCT parent_id FROM mt_cds_object \
             WHERE id IN ({list}) AND parent_id NOT IN ({list}) AND parent_id >= 0"
        ))
        .fetch_all(&self.pool)
        .await?;
        let mut parents = Vec::new();
        for row in rows {
            parents.push(row.try_get("parent_id")?);
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!("DELETE FROM mt_metadata WHERE item_id IN ({list})"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM mt_autoscan WHERE obj_id IN ({list})"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM mt_cds_object WHERE id IN ({list})"))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(ChangedContainers {
            upnp: parents.clone(),
            ui: parents,
        })
    }

    fn autoscan_from_row(row: &SqliteRow) -> Result<AutoscanDirectory> {
        let location: Option<String> = row.try_get("location")?;
        let mode = ScanMode::from_str(&row.try_get::<String, _>("scan_mode")?)?;
        let level = ScanLevel::from_str(&row.try_get::<String, _>("scan_level")?)?;
        let mut dir = AutoscanDirectory::new(
            PathBuf::from(location.unwrap_or_default()),
            mode,
            level,
        );
        dir.storage_id = row.try_get("id")?;
        dir.object_id = row
            .try_get::<Option<i64>, _>("obj_id")?
            .unwrap_or(INVALID_OBJECT_ID);
        dir.recursive = row.try_get::<i64, _>("recursive")? != 0;
        dir.hidden = row.try_get::<i64, _>("hidden")? != 0;
        dir.interval = std::time::Duration::from_secs(
            row.try_get::<Option<i64>, _>("interval")?.unwrap_or(1800) as u64,
        );
        dir.last_modified = row.try_get::<Option<i64>, _>("last_modified")?.unwrap_or(0);
        dir.persistent = row.try_get::<i64, _>("persistent")? != 0;
        Ok(dir)
    }
}

fn id_list(set: &HashSet<i64>) -> String {
    let mut ids: Vec<i64> = set.iter().copied().collect();
    ids.sort_unstable();
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn add_object(&self, obj: &mut CdsObject) -> Result<Option<i64>> {
        let location = Self::location_column(obj);
        let description = obj.metadata.get(MD_DESCRIPTION).map(|s| s.to_string());
        let resources = if obj.resources.is_empty() {
            None
        } else {
            Some(Resource::encode_list(&obj.resources))
        };
        let auxdata = if obj.auxdata.is_empty() {
            None
        } else {
            Some(obj.auxdata.encode())
        };

        let (mime_type, action, state, track_number, searchable, update_id) = split_variant(obj);

        let result = sqlx::query(
            "INSERT INTO mt_cds_object (ref_id, parent_id, object_type, upnp_class, dc_title, \
             dc_description, location, mime_type, action, state, update_id, searchable, \
             auxdata, resources, track_number, service_id, flags) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(obj.ref_id)
        .bind(obj.parent_id)
        .bind(obj.object_type() as i64)
        .bind(&obj.class)
        .bind(&obj.title)
        .bind(description)
        .bind(location)
        .bind(mime_type)
        .bind(action)
        .bind(state)
        .bind(update_id)
        .bind(searchable)
        .bind(auxdata)
        .bind(resources)
        .bind(track_number)
        .bind(&obj.service_id)
        .bind(obj.flags as i64)
        .execute(&self.pool)
        .await?;

        obj.id = result.last_insert_rowid();
        self.store_metadata(obj.id, &obj.metadata).await?;

        Ok(Some(obj.parent_id))
    }

    async fn update_object(&self, obj: &CdsObject) -> Result<()> {
        if obj.id == INVALID_OBJECT_ID {
            return Err(Error::InvalidObject("cannot update an unsaved object".into()));
        }
        let location = Self::location_column(obj);
        let description = obj.metadata.get(MD_DESCRIPTION).map(|s| s.to_string());
        let resources = if obj.resources.is_empty() {
            None
        } else {
            Some(Resource::encode_list(&obj.resources))
        };
        let auxdata = if obj.auxdata.is_empty() {
            None
        } else {
            Some(obj.auxdata.encode())
        };
        let (mime_type, action, state, track_number, searchable, update_id) = split_variant(obj);

        sqlx::query(
            "UPDATE mt_cds_object SET ref_id = ?, parent_id = ?, object_type = ?, \
             upnp_class = ?, dc_title = ?, dc_description = ?, location = ?, mime_type = ?, \
             action = ?, state = ?, update_id = ?, searchable = ?, auxdata = ?, resources = ?, \
             track_number = ?, service_id = ?, flags = ? WHERE id = ?",
        )
        .bind(obj.ref_id)
        .bind(obj.parent_id)
        .bind(obj.object_type() as i64)
        .bind(&obj.class)
        .bind(&obj.title)
        .bind(description)
        .bind(location)
        .bind(mime_type)
        .bind(action)
        .bind(state)
        .bind(update_id)
        .bind(searchable)
        .bind(auxdata)
        .bind(resources)
        .bind(track_number)
        .bind(&obj.service_id)
        .bind(obj.flags as i64)
        .bind(obj.id)
        .execute(&self.pool)
        .await?;

        self.store_metadata(obj.id, &obj.metadata).await?;
        Ok(())
    }

    async fn load_object(&self, id: i64) -> Result<CdsObject> {
        let row = sqlx::query(&format!("{} WHERE o.id = ?", SELECT_OBJECT))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        let row = row.ok_or(Error::NotFound)?;
        let mut objects = vec![Self::object_from_row(&row)?];
        self.load_metadata_for(&mut objects).await?;
        Ok(objects.pop().unwrap())
    }

    async fn find_object_by_path(&self, path: &str) -> Result<Option<CdsObject>> {
        let file = format!("{}{}", LOC_FILE_PREFIX, path);
        let dir = format!("{}{}", LOC_DIR_PREFIX, path.trim_end_matches('/'));
        let virt = format!("{}{}", LOC_VIRT_PREFIX, path);
        self.fetch_object_where(
            "o.location IN (?, ?, ?) ORDER BY o.location",
            &[&dir, &file, &virt],
        )
        .await
    }

    async fn find_object_id_by_path(&self, path: &str) -> Result<Option<i64>> {
        Ok(self.find_object_by_path(path).await?.map(|o| o.id))
    }

    async fn find_object_by_title(
        &self,
        title: &str,
        parent_id: i64,
    ) -> Result<Option<CdsObject>> {
        let sql = format!("{} WHERE o.parent_id = ? AND o.dc_title = ? LIMIT 1", SELECT_OBJECT);
        let row = sqlx::query(&sql)
            .bind(parent_id)
            .bind(title)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let mut objects = vec![Self::object_from_row(&row)?];
                self.load_metadata_for(&mut objects).await?;
                Ok(objects.pop())
            }
            None => Ok(None),
        }
    }

    async fn find_object_by_service_id(&self, service_id: &str) -> Result<Option<CdsObject>> {
        self.fetch_object_where("o.service_id = ?", &[service_id])
            .await
    }

    async fn browse(&self, param: &BrowseParam) -> Result<(Vec<CdsObject>, u32)> {
        if !param.direct_children() {
            let obj = self.load_object(param.object_id).await?;
            return Ok((vec![obj], 1));
        }

        // Make sure the target exists before querying children.
        let _parent = self.load_object(param.object_id).await?;

        let mut conditions = vec!["o.parent_id = ?".to_string()];
        let items = param.flags & BROWSE_ITEMS != 0;
        let containers = param.flags & BROWSE_CONTAINERS != 0;
        if items && !containers {
            conditions.push(format!("(o.object_type & {}) = 0", OBJECT_TYPE_CONTAINER));
        } else if containers && !items {
            conditions.push(format!("(o.object_type & {}) != 0", OBJECT_TYPE_CONTAINER));
        }
        if param.flags & BROWSE_HIDE_FS_ROOT != 0 && param.object_id == CDS_ID_ROOT {
            conditions.push(format!("o.id != {}", CDS_ID_FS_ROOT));
        }
        let where_clause = conditions.join(" AND ");

        let order = if param.flags & BROWSE_TRACK_SORT != 0 {
            "o.track_number IS NULL, o.track_number, o.dc_title"
        } else {
            "o.object_type, o.dc_title"
        };

        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM mt_cds_object o WHERE {}",
            where_clause
        ))
        .bind(param.object_id)
        .fetch_one(&self.pool)
        .await?;

        let limit = if param.requested_count == 0 {
            -1
        } else {
            param.requested_count as i64
        };

        let sql = format!(
            "{} WHERE {} ORDER BY {} LIMIT {} OFFSET {}",
            SELECT_OBJECT, where_clause, order, limit, param.starting_index
        );
        let rows = sqlx::query(&sql)
            .bind(param.object_id)
            .fetch_all(&self.pool)
            .await?;

        let mut objects = Vec::with_capacity(rows.len());
        for row in &rows {
            objects.push(Self::object_from_row(row)?);
        }
        self.load_metadata_for(&mut objects).await?;

        Ok((objects, total as u32))
    }

    async fn get_child_count(&self, parent_id: i64) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM mt_cds_object WHERE parent_id = ?")
                .bind(parent_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    async fn remove_object(&self, id: i64, all_refs: bool) -> Result<ChangedContainers> {
        let mut seeds = HashSet::new();
        seeds.insert(id);
        self.remove_objects(&seeds, all_refs).await
    }

    async fn remove_objects(
        &self,
        ids: &HashSet<i64>,
        all_refs: bool,
    ) -> Result<ChangedContainers> {
        if ids.is_empty() {
            return Ok(ChangedContainers::default());
        }
        for id in ids {
            if is_forbidden_cds_id(*id) {
                return Err(Error::InvalidObject(format!(
                    "tried to remove a protected object id: {}",
                    id
                )));
            }
        }
        let set = self.collect_removal_set(ids, all_refs).await?;
        self.delete_objects(&set).await
    }

    async fn get_objects(&self, parent_id: i64, items_only: bool) -> Result<HashSet<i64>> {
        let sql = if items_only {
            format!(
                "SELECT id FROM mt_cds_object WHERE parent_id = ? AND (object_type & {}) = 0",
                OBJECT_TYPE_CONTAINER
            )
        } else {
            "SELECT id FROM mt_cds_object WHERE parent_id = ?".to_string()
        };
        let rows = sqlx::query(&sql)
            .bind(parent_id)
            .fetch_all(&self.pool)
            .await?;
        let mut set = HashSet::with_capacity(rows.len());
        for row in rows {
            set.insert(row.try_get("id")?);
        }
        Ok(set)
    }

    async fn add_container_chain(
        &self,
        vpath: &str,
        last_class: Option<&str>,
        last_ref_id: Option<i64>,
    ) -> Result<(i64, Option<i64>)> {
        let components = vpath_split(vpath)?;
        let mut current_id = CDS_ID_ROOT;
        let mut built = String::new();
        let mut changed: Option<i64> = None;

        let last_index = components.len().saturating_sub(1);
        for (i, component) in components.iter().enumerate() {
            built.push(crate::database::VIRTUAL_CONTAINER_SEPARATOR);
            built.push_str(&vpath_escape(component));

            let existing: Option<i64> = sqlx::query_scalar(&format!(
                "SELECT id FROM mt_cds_object WHERE parent_id = ? AND dc_title = ? \
                 AND (object_type & {}) != 0 LIMIT 1",
                OBJECT_TYPE_CONTAINER
            ))
            .bind(current_id)
            .bind(component.as_str())
            .fetch_optional(&self.pool)
            .await?;

            if let Some(id) = existing {
                current_id = id;
                continue;
            }

            let is_last = i == last_index;
            let class = match (is_last, last_class) {
                (true, Some(class)) => class,
                _ => UPNP_CLASS_CONTAINER,
            };
            let ref_id = if is_last { last_ref_id } else { None };

            let mut container = CdsObject::new_container();
            container.parent_id = current_id;
            container.title = component.clone();
            container.class = class.to_string();
            container.location = built.clone();
            container.virt = true;
            container.ref_id = ref_id;
            self.add_object(&mut container).await?;

            if changed.is_none() {
                changed = Some(current_id);
            }
            current_id = container.id;
        }

        Ok((current_id, changed))
    }

    async fn ensure_path_existence(&self, fs_path: &Path) -> Result<(i64, Option<i64>)> {
        let mut current_id = CDS_ID_FS_ROOT;
        let mut built = PathBuf::from("/");
        let mut changed: Option<i64> = None;

        for component in fs_path.components() {
            let name = match component {
                std::path::Component::Normal(name) => name.to_string_lossy().into_owned(),
                _ => continue,
            };
            built.push(&name);
            let location = built.to_string_lossy().into_owned();

            if let Some(existing) = self.find_object_id_by_path(&location).await? {
                current_id = existing;
                continue;
            }

            let mut container = CdsObject::new_container();
            container.parent_id = current_id;
            container.title = name;
            container.location = location;
            self.add_object(&mut container).await?;

            if changed.is_none() {
                changed = Some(current_id);
            }
            current_id = container.id;
        }

        Ok((current_id, changed))
    }

    async fn set_container_update_id(&self, id: i64, update_id: u32) -> Result<()> {
        sqlx::query("UPDATE mt_cds_object SET update_id = ? WHERE id = ?")
            .bind(update_id as i64)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_autoscan_list(&self, mode: ScanMode) -> Result<Vec<AutoscanDirectory>> {
        let rows = sqlx::query("SELECT * FROM mt_autoscan WHERE scan_mode = ?")
            .bind(mode.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::autoscan_from_row).collect()
    }

    async fn get_autoscan_directory(&self, object_id: i64) -> Result<Option<AutoscanDirectory>> {
        let row = sqlx::query("SELECT * FROM mt_autoscan WHERE obj_id = ?")
            .bind(object_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::autoscan_from_row).transpose()
    }

    async fn add_autoscan_directory(&self, dir: &mut AutoscanDirectory) -> Result<()> {
        let obj_id = if dir.object_id == INVALID_OBJECT_ID {
            None
        } else {
            Some(dir.object_id)
        };
        let result = sqlx::query(
            "INSERT INTO mt_autoscan (obj_id, scan_level, scan_mode, recursive, hidden, \
             interval, last_modified, persistent, location) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(obj_id)
        .bind(dir.level.as_str())
        .bind(dir.mode.as_str())
        .bind(dir.recursive as i64)
        .bind(dir.hidden as i64)
        .bind(dir.interval.as_secs() as i64)
        .bind(dir.last_modified)
        .bind(dir.persistent as i64)
        .bind(dir.location.to_string_lossy().into_owned())
        .execute(&self.pool)
        .await?;
        dir.storage_id = result.last_insert_rowid();
        Ok(())
    }

    async fn update_autoscan_directory(&self, dir: &AutoscanDirectory) -> Result<()> {
        let obj_id = if dir.object_id == INVALID_OBJECT_ID {
            None
        } else {
            Some(dir.object_id)
        };
        sqlx::query(
            "UPDATE mt_autoscan SET obj_id = ?, scan_level = ?, scan_mode = ?, recursive = ?, \
             hidden = ?, interval = ?, last_modified = ?, persistent = ?, location = ? \
             WHERE id = ?",
        )
        .bind(obj_id)
        .bind(dir.level.as_str())
        .bind(dir.mode.as_str())
        .bind(dir.recursive as i64)
        .bind(dir.hidden as i64)
        .bind(dir.interval.as_secs() as i64)
        .bind(dir.last_modified)
        .bind(dir.persistent as i64)
        .bind(dir.location.to_string_lossy().into_owned())
        .bind(dir.storage_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_autoscan_directory(&self, storage_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM mt_autoscan WHERE id = ?")
            .bind(storage_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn check_overlapping_autoscans(&self, dir: &AutoscanDirectory) -> Result<()> {
        let rows = sqlx::query("SELECT id, location FROM mt_autoscan")
            .fetch_all(&self.pool)
            .await?;
        for row in rows {
            let id: i64 = row.try_get("id")?;
            if id == dir.storage_id {
                continue;
            }
            let location: Option<String> = row.try_get("location")?;
            let existing = PathBuf::from(location.unwrap_or_default());
            if existing == dir.location {
                return Err(Error::other(format!(
                    "there is already an autoscan directory defined for {}",
                    existing.display()
                )));
            }
            if dir.location.starts_with(&existing) || existing.starts_with(&dir.location) {
                return Err(Error::other(format!(
                    "autoscan directory {} overlaps existing autoscan {}",
                    dir.location.display(),
                    existing.display()
                )));
            }
        }
        Ok(())
    }

    async fn get_total_files(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM mt_cds_object WHERE (object_type & {}) = 0 \
             AND object_type != 0 AND ref_id IS NULL",
            OBJECT_TYPE_CONTAINER
        ))
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn get_mime_types(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT DISTINCT mime_type FROM mt_cds_object \
             WHERE mime_type IS NOT NULL ORDER BY mime_type",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut types = Vec::with_capacity(rows.len());
        for row in rows {
            types.push(row.try_get("mime_type")?);
        }
        Ok(types)
    }

    async fn get_internal_setting(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM mt_internal_setting WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| r.try_get("value").map_err(Error::from)).transpose()
    }

    async fn store_internal_setting(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO mt_internal_setting (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn shutdown(&self) {
        self.pool.close().await;
    }
}

fn split_variant(
    obj: &CdsObject,
) -> (
    Option<String>,
    Option<String>,
    Option<String>,
    Option<i32>,
    i64,
    i64,
) {
    match &obj.variant {
        ObjectVariant::Container(cont) => (
            None,
            None,
            None,
            None,
            cont.searchable as i64,
            cont.update_id as i64,
        ),
        ObjectVariant::Item(item) => {
            let (action, state) = match &item.kind {
                ItemKind::Active { action, state } => {
                    (Some(action.clone()), Some(state.clone()))
                }
                _ => (None, None),
            };
            (
                Some(item.mime_type.clone()),
                action,
                state,
                item.track_number,
                0,
                0,
            )
        }
    }
}
