//! # Snapshots
//!
//! Immutable views of the data an event carried.
//!
//! A snapshot pairs a JSON value with the path it was read from and the
//! connection it arrived on. Navigating into a snapshot never touches the
//! network: `child("a/b")` walks the value that is already here, and a
//! missing location reads as `null`.
//!
//! ```text
//!   Snapshot @ /users          val = { "ada": { "age": 36 }, "bob": 7 }
//!      │
//!      ├── child("ada")        @ /users/ada       val = { "age": 36 }
//!      ├── child("ada/age")    @ /users/ada/age   val = 36
//!      └── child("eve")        @ /users/eve       val = null
//! ```

use std::fmt;

use serde::de::DeserializeOwned;
use serde_json::Value;
use turbo_core::Path;

use crate::client::Client;
use crate::connection::Connection;
use crate::error::ClientResult;

/// Data at a path, as delivered to a listener.
#[derive(Clone)]
pub struct Snapshot {
    value: Value,
    path: Path,
    conn: Connection,
}

impl Snapshot {
    pub(crate) fn new(value: Value, path: Path, conn: Connection) -> Self {
        Snapshot { value, path, conn }
    }

    /// The data. `null` means nothing exists here.
    pub fn val(&self) -> &Value {
        &self.value
    }

    /// Deserializes the data into `T`.
    pub fn val_as<T: DeserializeOwned>(&self) -> ClientResult<T> {
        Ok(T::deserialize(&self.value)?)
    }

    /// Same as [`val`](Self::val); priorities are not stored.
    pub fn export_val(&self) -> Value {
        self.value.clone()
    }

    /// Returns true unless the data is `null`.
    pub fn exists(&self) -> bool {
        !self.value.is_null()
    }

    /// Snapshot of a location below this one.
    pub fn child(&self, relative: &str) -> ClientResult<Snapshot> {
        let path = self.path.child(relative)?;
        let depth = self.path.depth();

        let value = path
            .segments()
            .skip(depth)
            .try_fold(&self.value, |value, segment| child_value(value, segment))
            .cloned()
            .unwrap_or(Value::Null);

        Ok(Snapshot::new(value, path, self.conn.clone()))
    }

    /// Returns true if `relative` holds non-null data.
    pub fn has_child(&self, relative: &str) -> ClientResult<bool> {
        Ok(self.child(relative)?.exists())
    }

    /// Returns true for a non-empty object.
    pub fn has_children(&self) -> bool {
        self.num_children() > 0
    }

    /// Number of immediate children. Scalars have none.
    pub fn num_children(&self) -> usize {
        self.value.as_object().map(|o| o.len()).unwrap_or(0)
    }

    /// Calls `action` with each immediate child in key order.
    ///
    /// Stops as soon as `action` returns true, and returns whether it did.
    pub fn for_each<F>(&self, mut action: F) -> bool
    where
        F: FnMut(Snapshot) -> bool,
    {
        let Some(object) = self.value.as_object() else {
            return false;
        };

        for (key, value) in object {
            let Ok(path) = self.path.child(key) else {
                continue;
            };
            if action(Snapshot::new(value.clone(), path, self.conn.clone())) {
                return true;
            }
        }
        false
    }

    /// The last segment of the path, or `/` at the root.
    pub fn name(&self) -> &str {
        self.path.name()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A client handle pointing at this snapshot's location.
    pub fn reference(&self) -> Client {
        Client::at(&self.conn, self.path.clone())
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("path", &self.path.as_str())
            .field("value", &self.value)
            .finish()
    }
}

/// Looks up one path segment. Arrays are indexed by decimal position.
fn child_value<'a>(value: &'a Value, segment: &str) -> Option<&'a Value> {
    match value {
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|index| items.get(index)),
        other => other.get(segment),
    }
}
