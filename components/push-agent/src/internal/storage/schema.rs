/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use std::path::Path;

use rusqlite::{Connection, OpenFlags, Transaction};

use crate::error::{debug, warn, Error, Result};

const CREATE_TABLES_SQL: &str = include_str!("schema.sql");

pub struct AgentConnectionInitializer;

impl AgentConnectionInitializer {
    pub const NAME: &'static str = "push agent db";
    pub const END_VERSION: u32 = 1;

    // A tiny database: a handful of tables, no foreign keys, no SQL functions and a small set
    // of statements. Init and upgrade are all there is.
    fn init(&self, db: &Transaction<'_>) -> Result<()> {
        db.execute_batch(CREATE_TABLES_SQL)?;
        Ok(())
    }

    fn upgrade_from(&self, db: &Transaction<'_>, version: u32) -> Result<()> {
        match version {
            0 => db.execute_batch(CREATE_TABLES_SQL)?,
            other => {
                warn!(
                    "{}: no upgrade path from version {} (we only understand version {})",
                    Self::NAME,
                    other,
                    Self::END_VERSION
                )
            }
        };
        Ok(())
    }
}

pub fn open_database(path: &Path, initializer: &AgentConnectionInitializer) -> Result<Connection> {
    let initializing = !path.exists();
    let conn = Connection::open_with_flags(path, OpenFlags::default())?;
    run_initializer(&conn, initializer, initializing)?;
    Ok(conn)
}

pub fn open_memory_database(initializer: &AgentConnectionInitializer) -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    run_initializer(&conn, initializer, true)?;
    Ok(conn)
}

fn run_initializer(
    conn: &Connection,
    initializer: &AgentConnectionInitializer,
    initializing: bool,
) -> Result<()> {
    let name = AgentConnectionInitializer::NAME;
    debug!("{}: opening database", name);
    let tx = conn.unchecked_transaction()?;
    if initializing {
        debug!("{}: initializing new database", name);
        initializer.init(&tx)?;
    } else {
        let mut current_version = get_schema_version(&tx)?;
        if current_version > AgentConnectionInitializer::END_VERSION {
            return Err(Error::StorageError(format!(
                "{}: database version too new: {}",
                name, current_version
            )));
        }
        while current_version < AgentConnectionInitializer::END_VERSION {
            debug!("{}: upgrading database to {}", name, current_version + 1);
            initializer.upgrade_from(&tx, current_version)?;
            current_version += 1;
        }
    }
    set_schema_version(&tx, AgentConnectionInitializer::END_VERSION)?;
    tx.commit()?;
    debug!("{}: database open successful", name);
    Ok(())
}

fn get_schema_version(conn: &Connection) -> Result<u32> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

fn set_schema_version(conn: &Connection, version: u32) -> Result<()> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}
