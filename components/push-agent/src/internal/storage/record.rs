/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{
    types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef},
    Row,
};
use url::Url;

use crate::error::{Error, Result};
use crate::internal::http::Response;

/// Milliseconds since the unix epoch.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub fn now() -> Self {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| Timestamp(d.as_millis() as u64))
            .unwrap_or_default()
    }
}

impl ToSql for Timestamp {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0 as i64))
    }
}

impl FromSql for Timestamp {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value.as_i64().map(|v| Timestamp(v.max(0) as u64))
    }
}

pub const PRIMARY_IDENTITY: &str = "primary";

/// The one durable identifier for this device/browser pairing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub id: String,

    /// Always [`PRIMARY_IDENTITY`].
    pub kind: String,

    /// Time the identity was first created.
    pub ctime: Timestamp,
}

impl DeviceIdentity {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self> {
        Ok(DeviceIdentity {
            id: row.get("id")?,
            kind: row.get("kind")?,
            ctime: row.get("ctime")?,
        })
    }
}

pub(crate) fn response_from_row(row: &Row<'_>) -> Result<Response> {
    let url: String = row.get("url")?;
    let headers: String = row.get("headers")?;
    Ok(Response {
        url: Url::parse(&url)
            .map_err(|e| Error::StorageError(format!("bad cached url {:?}: {}", url, e)))?,
        status: row.get("status")?,
        headers: serde_json::from_str(&headers)?,
        body: row.get("body")?,
    })
}
