//! SQLite schema and connection handling.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection};

use argent_core::{DevelopError, ImageId, ImageInfo, Result};

/// Wrap a rusqlite error into the develop taxonomy.
pub(crate) fn db_err(e: rusqlite::Error) -> DevelopError {
    DevelopError::Database(e.to_string())
}

/// The relational store. The connection sits behind a mutex so the store
/// can be shared across the controller and autosave.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(db_err)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(init_schema)?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(init_schema)?;
        Ok(db)
    }

    /// Run `f` with the connection locked.
    pub fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock().unwrap();
        f(&mut conn)
    }

    /// Insert or replace an image record.
    pub fn upsert_image(&self, image: &ImageInfo) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO images (id, width, height, maker, model, camera_alias, lens,
                                     iso, exposure, aperture, focal_length, history_end,
                                     change_timestamp, flags, iop_order_blob, content_hash)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11,
                         COALESCE((SELECT history_end FROM images WHERE id = ?1), 0),
                         ?12, ?13,
                         (SELECT iop_order_blob FROM images WHERE id = ?1),
                         (SELECT content_hash FROM images WHERE id = ?1))
                 ON CONFLICT(id) DO UPDATE SET
                     width = ?2, height = ?3, maker = ?4, model = ?5, camera_alias = ?6,
                     lens = ?7, iso = ?8, exposure = ?9, aperture = ?10, focal_length = ?11,
                     change_timestamp = ?12, flags = ?13",
                params![
                    image.id.0,
                    image.width,
                    image.height,
                    image.maker,
                    image.model,
                    image.camera_alias,
                    image.lens,
                    image.iso,
                    image.exposure,
                    image.aperture,
                    image.focal_length,
                    image.change_timestamp,
                    image.flags,
                ],
            )
            .map_err(db_err)?;
            Ok(())
        })
    }

    /// Load an image record.
    pub fn load_image(&self, id: ImageId) -> Result<ImageInfo> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, width, height, maker, model, camera_alias, lens, iso,
                        exposure, aperture, focal_length, flags, change_timestamp
                 FROM images WHERE id = ?1",
                params![id.0],
                |row| {
                    Ok(ImageInfo {
                        id: ImageId(row.get(0)?),
                        width: row.get(1)?,
                        height: row.get(2)?,
                        maker: row.get(3)?,
                        model: row.get(4)?,
                        camera_alias: row.get(5)?,
                        lens: row.get(6)?,
                        iso: row.get(7)?,
                        exposure: row.get(8)?,
                        aperture: row.get(9)?,
                        focal_length: row.get(10)?,
                        flags: row.get(11)?,
                        change_timestamp: row.get(12)?,
                    })
                },
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => DevelopError::InvalidImage(id),
                other => db_err(other),
            })
        })
    }

    /// Persist only the flag word of an image.
    pub fn update_image_flags(&self, id: ImageId, flags: u32) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE images SET flags = ?2 WHERE id = ?1",
                params![id.0, flags],
            )
            .map_err(db_err)?;
            Ok(())
        })
    }
}

/// Create all tables. Idempotent.
pub fn init_schema(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS images (
             id INTEGER PRIMARY KEY,
             width INTEGER NOT NULL,
             height INTEGER NOT NULL,
             maker TEXT NOT NULL DEFAULT '',
             model TEXT NOT NULL DEFAULT '',
             camera_alias TEXT NOT NULL DEFAULT '',
             lens TEXT NOT NULL DEFAULT '',
             iso REAL NOT NULL DEFAULT 0,
             exposure REAL NOT NULL DEFAULT 0,
             aperture REAL NOT NULL DEFAULT 0,
             focal_length REAL NOT NULL DEFAULT 0,
             history_end INTEGER NOT NULL DEFAULT 0,
             change_timestamp INTEGER NOT NULL DEFAULT 0,
             flags INTEGER NOT NULL DEFAULT 0,
             iop_order_blob TEXT,
             content_hash INTEGER
         );
         CREATE TABLE IF NOT EXISTS history (
             imgid INTEGER NOT NULL,
             num INTEGER NOT NULL,
             operation TEXT NOT NULL,
             op_params BLOB,
             module INTEGER NOT NULL,
             enabled INTEGER NOT NULL,
             blendop_params BLOB,
             blendop_version INTEGER NOT NULL,
             multi_priority INTEGER NOT NULL,
             multi_name TEXT NOT NULL DEFAULT '',
             multi_name_hand_edited INTEGER NOT NULL DEFAULT 0,
             iop_order INTEGER NOT NULL DEFAULT 0,
             focus_hash INTEGER NOT NULL DEFAULT 0,
             PRIMARY KEY (imgid, num)
         );
         CREATE TABLE IF NOT EXISTS masks_history (
             imgid INTEGER NOT NULL,
             num INTEGER NOT NULL,
             formid INTEGER NOT NULL,
             form_kind TEXT NOT NULL,
             name TEXT NOT NULL DEFAULT '',
             points TEXT NOT NULL DEFAULT '[]'
         );
         CREATE INDEX IF NOT EXISTS masks_history_imgid ON masks_history (imgid, num);
         CREATE TABLE IF NOT EXISTS presets (
             name TEXT NOT NULL,
             operation TEXT NOT NULL,
             op_version INTEGER NOT NULL,
             op_params BLOB,
             blendop_params BLOB,
             blendop_version INTEGER NOT NULL DEFAULT 0,
             enabled INTEGER NOT NULL DEFAULT 1,
             autoapply INTEGER NOT NULL DEFAULT 0,
             writeprotect INTEGER NOT NULL DEFAULT 0,
             model TEXT NOT NULL DEFAULT '%',
             maker TEXT NOT NULL DEFAULT '%',
             lens TEXT NOT NULL DEFAULT '%',
             iso_min REAL NOT NULL DEFAULT 0,
             iso_max REAL NOT NULL DEFAULT 340282346638528859811704183484516925440,
             exposure_min REAL NOT NULL DEFAULT 0,
             exposure_max REAL NOT NULL DEFAULT 340282346638528859811704183484516925440,
             aperture_min REAL NOT NULL DEFAULT 0,
             aperture_max REAL NOT NULL DEFAULT 340282346638528859811704183484516925440,
             focal_length_min REAL NOT NULL DEFAULT 0,
             focal_length_max REAL NOT NULL DEFAULT 1000000,
             format INTEGER NOT NULL DEFAULT 0,
             multi_name TEXT NOT NULL DEFAULT '',
             multi_name_hand_edited INTEGER NOT NULL DEFAULT 0,
             PRIMARY KEY (name, operation)
         );
         CREATE TABLE IF NOT EXISTS memory_history (
             imgid INTEGER NOT NULL,
             num INTEGER NOT NULL,
             operation TEXT NOT NULL,
             op_params BLOB,
             module INTEGER NOT NULL,
             enabled INTEGER NOT NULL,
             blendop_params BLOB,
             blendop_version INTEGER NOT NULL,
             multi_priority INTEGER NOT NULL,
             multi_name TEXT NOT NULL DEFAULT '',
             multi_name_hand_edited INTEGER NOT NULL DEFAULT 0,
             iop_order INTEGER NOT NULL DEFAULT 0,
             focus_hash INTEGER NOT NULL DEFAULT 0
         );",
    )
    .map_err(db_err)
}
