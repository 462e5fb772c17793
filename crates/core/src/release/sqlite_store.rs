//! SQLite-backed release store implementation.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use super::store::{ReleaseError, ReleaseStore};
use super::types::{
    AssetUrl, DestRoot, InstalledScript, MissionScript, Release, ReleaseAsset, RunOn,
    SymbolicLink,
};

/// SQLite-backed release store.
pub struct SqliteReleaseStore {
    conn: Mutex<Connection>,
}

fn db_err(e: rusqlite::Error) -> ReleaseError {
    ReleaseError::Database(e.to_string())
}

fn path_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn invalid_column(index: usize, name: &str) -> rusqlite::Error {
    rusqlite::Error::InvalidColumnType(index, name.to_string(), rusqlite::types::Type::Text)
}

impl SqliteReleaseStore {
    /// Create a new SQLite release store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, ReleaseError> {
        let conn = Connection::open(path).map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite release store (useful for testing).
    pub fn in_memory() -> Result<Self, ReleaseError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), ReleaseError> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS releases (
                release_id TEXT PRIMARY KEY,
                mod_id TEXT NOT NULL,
                mod_name TEXT NOT NULL,
                version TEXT NOT NULL,
                version_hash TEXT NOT NULL,
                dependencies TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS release_assets (
                release_id TEXT NOT NULL REFERENCES releases(release_id) ON DELETE CASCADE,
                asset_id TEXT NOT NULL,
                name TEXT NOT NULL,
                is_archive INTEGER NOT NULL,
                position INTEGER NOT NULL,
                PRIMARY KEY (release_id, asset_id)
            );

            CREATE TABLE IF NOT EXISTS release_asset_urls (
                release_id TEXT NOT NULL REFERENCES releases(release_id) ON DELETE CASCADE,
                asset_id TEXT NOT NULL,
                url_id TEXT NOT NULL,
                url TEXT NOT NULL,
                position INTEGER NOT NULL,
                PRIMARY KEY (release_id, asset_id, url_id)
            );

            CREATE TABLE IF NOT EXISTS release_links (
                release_id TEXT NOT NULL REFERENCES releases(release_id) ON DELETE CASCADE,
                link_id TEXT NOT NULL,
                name TEXT NOT NULL,
                src TEXT NOT NULL,
                dest TEXT NOT NULL,
                dest_root TEXT NOT NULL,
                installed_path TEXT,
                position INTEGER NOT NULL,
                PRIMARY KEY (release_id, link_id)
            );

            CREATE TABLE IF NOT EXISTS release_scripts (
                release_id TEXT NOT NULL REFERENCES releases(release_id) ON DELETE CASCADE,
                script_id TEXT NOT NULL,
                name TEXT NOT NULL,
                purpose TEXT NOT NULL,
                path TEXT NOT NULL,
                root TEXT NOT NULL,
                run_on TEXT NOT NULL,
                installed_path TEXT,
                position INTEGER NOT NULL,
                PRIMARY KEY (release_id, script_id)
            );

            CREATE TABLE IF NOT EXISTS release_jobs (
                release_id TEXT NOT NULL,
                job_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                PRIMARY KEY (release_id, job_id)
            );

            CREATE INDEX IF NOT EXISTS idx_release_scripts_run_on ON release_scripts(run_on);
            "#,
        )
        .map_err(db_err)
    }

    fn insert_children(tx: &Transaction, release: &Release) -> Result<(), ReleaseError> {
        let id = &release.release_id;

        for (position, asset) in release.assets.iter().enumerate() {
            tx.execute(
                "INSERT INTO release_assets (release_id, asset_id, name, is_archive, position) \
                 VALUES (?, ?, ?, ?, ?)",
                params![id, asset.id, asset.name, asset.is_archive, position as i64],
            )
            .map_err(db_err)?;

            for (url_position, url) in asset.urls.iter().enumerate() {
                tx.execute(
                    "INSERT INTO release_asset_urls (release_id, asset_id, url_id, url, position) \
                     VALUES (?, ?, ?, ?, ?)",
                    params![id, asset.id, url.url_id, url.url, url_position as i64],
                )
                .map_err(db_err)?;
            }
        }

        for (position, link) in release.links.iter().enumerate() {
            tx.execute(
                "INSERT INTO release_links \
                 (release_id, link_id, name, src, dest, dest_root, installed_path, position) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    id,
                    link.id,
                    link.name,
                    path_text(&link.src),
                    path_text(&link.dest),
                    link.dest_root.as_str(),
                    link.installed_path.as_deref().map(path_text),
                    position as i64,
                ],
            )
            .map_err(db_err)?;
        }

        for (position, script) in release.scripts.iter().enumerate() {
            tx.execute(
                "INSERT INTO release_scripts \
                 (release_id, script_id, name, purpose, path, root, run_on, installed_path, position) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    id,
                    script.id,
                    script.name,
                    script.purpose,
                    path_text(&script.path),
                    script.root.as_str(),
                    script.run_on.as_str(),
                    script.installed_path.as_deref().map(path_text),
                    position as i64,
                ],
            )
            .map_err(db_err)?;
        }

        Ok(())
    }

    fn row_to_script(row: &rusqlite::Row, offset: usize) -> rusqlite::Result<MissionScript> {
        let root: String = row.get(offset + 4)?;
        let run_on: String = row.get(offset + 5)?;
        Ok(MissionScript {
            id: row.get(offset)?,
            name: row.get(offset + 1)?,
            purpose: row.get(offset + 2)?,
            path: PathBuf::from(row.get::<_, String>(offset + 3)?),
            root: DestRoot::parse(&root).ok_or_else(|| invalid_column(offset + 4, "root"))?,
            run_on: RunOn::parse(&run_on).ok_or_else(|| invalid_column(offset + 5, "run_on"))?,
            installed_path: row.get::<_, Option<String>>(offset + 6)?.map(PathBuf::from),
        })
    }

    fn load_children(conn: &Connection, release: &mut Release) -> Result<(), ReleaseError> {
        let id = release.release_id.clone();

        let mut stmt = conn
            .prepare(
                "SELECT asset_id, name, is_archive FROM release_assets \
                 WHERE release_id = ? ORDER BY position",
            )
            .map_err(db_err)?;
        let assets = stmt
            .query_map(params![id], |row| {
                Ok(ReleaseAsset {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    is_archive: row.get(2)?,
                    urls: Vec::new(),
                })
            })
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;

        let mut url_stmt = conn
            .prepare(
                "SELECT url_id, url FROM release_asset_urls \
                 WHERE release_id = ? AND asset_id = ? ORDER BY position",
            )
            .map_err(db_err)?;
        release.assets = Vec::with_capacity(assets.len());
        for mut asset in assets {
            asset.urls = url_stmt
                .query_map(params![id, asset.id], |row| {
                    Ok(AssetUrl {
                        url_id: row.get(0)?,
                        url: row.get(1)?,
                    })
                })
                .map_err(db_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(db_err)?;
            release.assets.push(asset);
        }

        let mut link_stmt = conn
            .prepare(
                "SELECT link_id, name, src, dest, dest_root, installed_path FROM release_links \
                 WHERE release_id = ? ORDER BY position",
            )
            .map_err(db_err)?;
        release.links = link_stmt
            .query_map(params![id], |row| {
                let dest_root: String = row.get(4)?;
                Ok(SymbolicLink {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    src: PathBuf::from(row.get::<_, String>(2)?),
                    dest: PathBuf::from(row.get::<_, String>(3)?),
                    dest_root: DestRoot::parse(&dest_root)
                        .ok_or_else(|| invalid_column(4, "dest_root"))?,
                    installed_path: row.get::<_, Option<String>>(5)?.map(PathBuf::from),
                })
            })
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;

        let mut script_stmt = conn
            .prepare(
                "SELECT script_id, name, purpose, path, root, run_on, installed_path \
                 FROM release_scripts WHERE release_id = ? ORDER BY position",
            )
            .map_err(db_err)?;
        release.scripts = script_stmt
            .query_map(params![id], |row| Self::row_to_script(row, 0))
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;

        Ok(())
    }

    fn row_to_release(row: &rusqlite::Row) -> rusqlite::Result<(Release, String)> {
        Ok((
            Release {
                release_id: row.get(0)?,
                mod_id: row.get(1)?,
                mod_name: row.get(2)?,
                version: row.get(3)?,
                version_hash: row.get(4)?,
                dependencies: Vec::new(),
                assets: Vec::new(),
                links: Vec::new(),
                scripts: Vec::new(),
            },
            row.get(5)?,
        ))
    }

    fn finish_release(
        conn: &Connection,
        (mut release, dependencies): (Release, String),
    ) -> Result<Release, ReleaseError> {
        release.dependencies = serde_json::from_str(&dependencies)
            .map_err(|e| ReleaseError::Serialization(e.to_string()))?;
        Self::load_children(conn, &mut release)?;
        Ok(release)
    }

    fn update_installed_path(
        conn: &Connection,
        table: &str,
        id_column: &str,
        release_id: &str,
        id: &str,
        installed_path: Option<&Path>,
    ) -> Result<(), ReleaseError> {
        let changed = conn
            .execute(
                &format!(
                    "UPDATE {} SET installed_path = ? WHERE release_id = ? AND {} = ?",
                    table, id_column
                ),
                params![installed_path.map(path_text), release_id, id],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(ReleaseError::NotFound(format!("{}/{}", release_id, id)));
        }
        Ok(())
    }
}

const RELEASE_COLUMNS: &str = "release_id, mod_id, mod_name, version, version_hash, dependencies";

impl ReleaseStore for SqliteReleaseStore {
    fn insert(&self, release: &Release) -> Result<(), ReleaseError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(db_err)?;

        let exists: bool = tx
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM releases WHERE release_id = ?)",
                params![release.release_id],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        if exists {
            return Err(ReleaseError::AlreadyExists(release.release_id.clone()));
        }

        let dependencies = serde_json::to_string(&release.dependencies)
            .map_err(|e| ReleaseError::Serialization(e.to_string()))?;
        tx.execute(
            "INSERT INTO releases (release_id, mod_id, mod_name, version, version_hash, dependencies, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                release.release_id,
                release.mod_id,
                release.mod_name,
                release.version,
                release.version_hash,
                dependencies,
                Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            ],
        )
        .map_err(db_err)?;

        Self::insert_children(&tx, release)?;
        tx.commit().map_err(db_err)
    }

    fn get(&self, release_id: &str) -> Result<Option<Release>, ReleaseError> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                &format!("SELECT {} FROM releases WHERE release_id = ?", RELEASE_COLUMNS),
                params![release_id],
                Self::row_to_release,
            )
            .optional()
            .map_err(db_err)?;

        row.map(|row| Self::finish_release(&conn, row)).transpose()
    }

    fn list(&self) -> Result<Vec<Release>, ReleaseError> {
        let conn = self.conn.lock().unwrap();
        let rows = {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM releases ORDER BY created_at, rowid",
                    RELEASE_COLUMNS
                ))
                .map_err(db_err)?;
            let rows = stmt
                .query_map([], Self::row_to_release)
                .map_err(db_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(db_err)?;
            rows
        };

        rows.into_iter()
            .map(|row| Self::finish_release(&conn, row))
            .collect()
    }

    fn delete(&self, release_id: &str) -> Result<(), ReleaseError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(db_err)?;
        tx.execute(
            "DELETE FROM release_jobs WHERE release_id = ?",
            params![release_id],
        )
        .map_err(db_err)?;
        let deleted = tx
            .execute(
                "DELETE FROM releases WHERE release_id = ?",
                params![release_id],
            )
            .map_err(db_err)?;
        if deleted == 0 {
            return Err(ReleaseError::NotFound(release_id.to_string()));
        }
        tx.commit().map_err(db_err)
    }

    fn add_release_jobs(&self, release_id: &str, job_ids: &[String]) -> Result<(), ReleaseError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(db_err)?;
        let next: i64 = tx
            .query_row(
                "SELECT COALESCE(MAX(position) + 1, 0) FROM release_jobs WHERE release_id = ?",
                params![release_id],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        for (offset, job_id) in job_ids.iter().enumerate() {
            tx.execute(
                "INSERT OR IGNORE INTO release_jobs (release_id, job_id, position) VALUES (?, ?, ?)",
                params![release_id, job_id, next + offset as i64],
            )
            .map_err(db_err)?;
        }
        tx.commit().map_err(db_err)
    }

    fn release_job_ids(&self, release_id: &str) -> Result<Vec<String>, ReleaseError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT job_id FROM release_jobs WHERE release_id = ? ORDER BY position")
            .map_err(db_err)?;
        let ids = stmt
            .query_map(params![release_id], |row| row.get(0))
            .map_err(db_err)?
            .collect::<Result<Vec<String>, _>>()
            .map_err(db_err)?;
        Ok(ids)
    }

    fn clear_release_jobs(&self, release_id: &str) -> Result<(), ReleaseError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM release_jobs WHERE release_id = ?",
            params![release_id],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn set_link_installed_path(
        &self,
        release_id: &str,
        link_id: &str,
        installed_path: Option<&Path>,
    ) -> Result<(), ReleaseError> {
        let conn = self.conn.lock().unwrap();
        Self::update_installed_path(
            &conn,
            "release_links",
            "link_id",
            release_id,
            link_id,
            installed_path,
        )
    }

    fn set_script_installed_path(
        &self,
        release_id: &str,
        script_id: &str,
        installed_path: Option<&Path>,
    ) -> Result<(), ReleaseError> {
        let conn = self.conn.lock().unwrap();
        Self::update_installed_path(
            &conn,
            "release_scripts",
            "script_id",
            release_id,
            script_id,
            installed_path,
        )
    }

    fn installed_scripts(&self, run_on: RunOn) -> Result<Vec<InstalledScript>, ReleaseError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT s.script_id, s.name, s.purpose, s.path, s.root, s.run_on, s.installed_path, \
                        r.release_id, r.mod_name, r.version \
                 FROM release_scripts s JOIN releases r ON r.release_id = s.release_id \
                 WHERE s.run_on = ? AND s.installed_path IS NOT NULL \
                 ORDER BY r.created_at, r.rowid, s.position",
            )
            .map_err(db_err)?;
        let scripts = stmt
            .query_map(params![run_on.as_str()], |row| {
                Ok(InstalledScript {
                    script: Self::row_to_script(row, 0)?,
                    release_id: row.get(7)?,
                    mod_name: row.get(8)?,
                    version: row.get(9)?,
                })
            })
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;
        Ok(scripts)
    }
}
