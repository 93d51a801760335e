//! CBOR encoding of persisted blobs.
//!
//! Every durable blob (entity collection, pending operations, sync
//! metadata) is a serde value encoded with CBOR. A blob that fails to
//! decode is treated as empty and overwritten, trading strict correctness
//! for availability.

use crate::error::{CoreError, CoreResult};
use larder_storage::KvStore;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes a value to CBOR bytes.
///
/// # Errors
///
/// Returns [`CoreError::Codec`] if serialization fails.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> CoreResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(value, &mut bytes).map_err(|e| CoreError::codec(e.to_string()))?;
    Ok(bytes)
}

/// Decodes a value from CBOR bytes.
///
/// # Errors
///
/// Returns [`CoreError::Codec`] if the bytes are not a valid encoding of `T`.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> CoreResult<T> {
    ciborium::de::from_reader(bytes).map_err(|e| CoreError::codec(e.to_string()))
}

/// Loads the blob under `key`, falling back to `T::default()`.
///
/// A missing blob yields the default. A corrupted blob is logged, replaced
/// by the encoded default, and the default is returned.
///
/// # Errors
///
/// Returns an error only if the store itself fails.
pub fn load_or_reset<T>(store: &dyn KvStore, key: &str) -> CoreResult<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    let Some(bytes) = store.get(key)? else {
        return Ok(T::default());
    };

    match decode(&bytes) {
        Ok(value) => Ok(value),
        Err(err) => {
            tracing::warn!(key, error = %err, len = bytes.len(), "resetting corrupted blob");
            let value = T::default();
            save(store, key, &value)?;
            Ok(value)
        }
    }
}

/// Encodes `value` and replaces the blob under `key`.
///
/// # Errors
///
/// Returns an error if encoding or the store write fails.
pub fn save<T: Serialize + ?Sized>(store: &dyn KvStore, key: &str, value: &T) -> CoreResult<()> {
    let bytes = encode(value)?;
    store.set(key, &bytes)?;
    Ok(())
}
