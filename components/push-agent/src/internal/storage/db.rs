/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */
use std::{ops::Deref, path::Path};

use rusqlite::{named_params, Connection, OptionalExtension};

use crate::error::{debug, info, Error, Result};
use crate::internal::http::{RequestKey, Response};

use super::{
    record::{response_from_row, DeviceIdentity, Timestamp, PRIMARY_IDENTITY},
    schema,
};

pub trait CacheStorage {
    /// Make sure a snapshot with this name exists. Opening an existing snapshot is a no-op.
    fn open_cache(&self, name: &str) -> Result<()>;

    fn cache_names(&self) -> Result<Vec<String>>;

    /// Delete a snapshot and everything in it. Returns false if there was no such snapshot.
    fn delete_cache(&self, name: &str) -> Result<bool>;

    fn match_request(&self, cache: &str, key: &RequestKey) -> Result<Option<Response>>;

    /// Store a response, replacing anything already stored under the same key.
    fn put_response(&self, cache: &str, key: &RequestKey, response: &Response) -> Result<()>;
}

pub trait IdentityStorage {
    fn get_device_identity(&self) -> Result<Option<DeviceIdentity>>;

    /// Return the stored identity, storing `candidate_id` first only if there is none. When two
    /// callers race, the first writer wins and both get its id back.
    fn get_or_create_device_identity(&self, candidate_id: &str) -> Result<DeviceIdentity>;

    /// Forget the device identity. Only the explicit unpairing flow does this.
    fn delete_device_identity(&self) -> Result<bool>;

    fn get_meta(&self, key: &str) -> Result<Option<String>>;
    fn set_meta(&self, key: &str, value: &str) -> Result<()>;
}

impl<T: CacheStorage + ?Sized> CacheStorage for Box<T> {
    fn open_cache(&self, name: &str) -> Result<()> {
        (**self).open_cache(name)
    }

    fn cache_names(&self) -> Result<Vec<String>> {
        (**self).cache_names()
    }

    fn delete_cache(&self, name: &str) -> Result<bool> {
        (**self).delete_cache(name)
    }

    fn match_request(&self, cache: &str, key: &RequestKey) -> Result<Option<Response>> {
        (**self).match_request(cache, key)
    }

    fn put_response(&self, cache: &str, key: &RequestKey, response: &Response) -> Result<()> {
        (**self).put_response(cache, key, response)
    }
}

pub struct PushAgentDb {
    pub db: Connection,
}

impl PushAgentDb {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        // By default, file open errors are StorageSqlErrors and aren't super helpful.
        // Instead, remap to StorageError and provide the path to the file that couldn't be opened.
        let initializer = schema::AgentConnectionInitializer;
        let db = schema::open_database(path, &initializer).map_err(|orig| {
            Error::StorageError(format!(
                "Could not open database file {:?} - {}",
                &path.as_os_str(),
                orig,
            ))
        })?;
        Ok(Self { db })
    }

    pub fn open_in_memory() -> Result<Self> {
        let initializer = schema::AgentConnectionInitializer;
        let db = schema::open_memory_database(&initializer)?;
        Ok(Self { db })
    }
}

impl Deref for PushAgentDb {
    type Target = Connection;
    fn deref(&self) -> &Connection {
        &self.db
    }
}

impl CacheStorage for PushAgentDb {
    fn open_cache(&self, name: &str) -> Result<()> {
        self.execute(
            "INSERT OR IGNORE INTO cache_snapshot (name, ctime) VALUES (:name, :ctime)",
            named_params! { ":name": name, ":ctime": Timestamp::now() },
        )?;
        Ok(())
    }

    fn cache_names(&self) -> Result<Vec<String>> {
        let mut stmt = self.prepare("SELECT name FROM cache_snapshot ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    fn delete_cache(&self, name: &str) -> Result<bool> {
        let tx = self.unchecked_transaction()?;
        let entries = tx.execute(
            "DELETE FROM cache_entry WHERE cache_name = :name",
            named_params! { ":name": name },
        )?;
        let affected_rows = tx.execute(
            "DELETE FROM cache_snapshot WHERE name = :name",
            named_params! { ":name": name },
        )?;
        tx.commit()?;
        if affected_rows == 1 {
            info!("deleted cache snapshot '{}' ({} entries)", name, entries);
        }
        Ok(affected_rows == 1)
    }

    fn match_request(&self, cache: &str, key: &RequestKey) -> Result<Option<Response>> {
        let mut stmt = self.prepare_cached(
            "SELECT url, status, headers, body
             FROM cache_entry
             WHERE cache_name = :cache AND request_key = :key",
        )?;
        let mut rows = stmt.query(named_params! { ":cache": cache, ":key": key.as_str() })?;
        match rows.next()? {
            Some(row) => Ok(Some(response_from_row(row)?)),
            None => Ok(None),
        }
    }

    fn put_response(&self, cache: &str, key: &RequestKey, response: &Response) -> Result<()> {
        debug!("caching '{}' in '{}'", key.as_str(), cache);
        let headers = serde_json::to_string(&response.headers)?;
        let tx = self.unchecked_transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO cache_snapshot (name, ctime) VALUES (:name, :ctime)",
            named_params! { ":name": cache, ":ctime": Timestamp::now() },
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO cache_entry
                 (cache_name, request_key, url, status, headers, body, ctime)
             VALUES
                 (:cache, :key, :url, :status, :headers, :body, :ctime)",
            named_params! {
                ":cache": cache,
                ":key": key.as_str(),
                ":url": response.url.as_str(),
                ":status": response.status,
                ":headers": headers,
                ":body": response.body,
                ":ctime": Timestamp::now(),
            },
        )?;
        tx.commit()?;
        Ok(())
    }
}

impl IdentityStorage for PushAgentDb {
    fn get_device_identity(&self) -> Result<Option<DeviceIdentity>> {
        let mut stmt =
            self.prepare_cached("SELECT id, kind, ctime FROM device_identity WHERE kind = :kind")?;
        let mut rows = stmt.query(named_params! { ":kind": PRIMARY_IDENTITY })?;
        match rows.next()? {
            Some(row) => Ok(Some(DeviceIdentity::from_row(row)?)),
            None => Ok(None),
        }
    }

    fn get_or_create_device_identity(&self, candidate_id: &str) -> Result<DeviceIdentity> {
        let tx = self.unchecked_transaction()?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO device_identity (kind, id, ctime) VALUES (:kind, :id, :ctime)",
            named_params! {
                ":kind": PRIMARY_IDENTITY,
                ":id": candidate_id,
                ":ctime": Timestamp::now(),
            },
        )?;
        tx.commit()?;
        if inserted == 1 {
            info!("created new device identity '{}'", candidate_id);
        }
        self.get_device_identity()?
            .ok_or_else(|| Error::StorageError("device identity vanished after insert".into()))
    }

    fn delete_device_identity(&self) -> Result<bool> {
        info!("deleting device identity");
        let affected_rows = self.execute(
            "DELETE FROM device_identity WHERE kind = :kind",
            named_params! { ":kind": PRIMARY_IDENTITY },
        )?;
        Ok(affected_rows == 1)
    }

    fn get_meta(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .query_row(
                "SELECT value FROM meta_data WHERE key = :key LIMIT 1",
                named_params! { ":key": key },
                |row| row.get(0),
            )
            .optional()?)
    }

    fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        let mut stmt = self
            .prepare_cached("INSERT OR REPLACE INTO meta_data (key, value) VALUES (:k, :v)")?;
        stmt.execute(named_params! { ":k": key, ":v": value })?;
        Ok(())
    }
}
