//! Per-topic key/value codecs.
//!
//! The host owns the wire format. The engine only needs to turn a record into
//! bytes once (to capture it in an attempt) and back again (to invoke the
//! action and to describe a dead-lettered record). Implementations must
//! round-trip: `deserialize(serialize(x)) == x`.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::CodecError;

pub trait Codec<T>: Send + Sync {
    fn serialize(&self, topic: &str, value: &T) -> Result<Vec<u8>, CodecError>;

    fn deserialize(&self, topic: &str, bytes: &[u8]) -> Result<T, CodecError>;
}

impl<T, C> Codec<T> for Arc<C>
where
    C: Codec<T> + ?Sized,
{
    fn serialize(&self, topic: &str, value: &T) -> Result<Vec<u8>, CodecError> {
        (**self).serialize(topic, value)
    }

    fn deserialize(&self, topic: &str, bytes: &[u8]) -> Result<T, CodecError> {
        (**self).deserialize(topic, bytes)
    }
}

/// UTF-8 strings.
#[derive(Debug, Default, Copy, Clone)]
pub struct StringCodec;

impl Codec<String> for StringCodec {
    fn serialize(&self, _topic: &str, value: &String) -> Result<Vec<u8>, CodecError> {
        Ok(value.as_bytes().to_vec())
    }

    fn deserialize(&self, topic: &str, bytes: &[u8]) -> Result<String, CodecError> {
        String::from_utf8(bytes.to_vec()).map_err(|e| CodecError::deserialize(topic, e.to_string()))
    }
}

/// Raw bytes, passed through untouched.
#[derive(Debug, Default, Copy, Clone)]
pub struct BytesCodec;

impl Codec<Vec<u8>> for BytesCodec {
    fn serialize(&self, _topic: &str, value: &Vec<u8>) -> Result<Vec<u8>, CodecError> {
        Ok(value.clone())
    }

    fn deserialize(&self, _topic: &str, bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(bytes.to_vec())
    }
}

/// JSON via serde.
#[derive(Debug)]
pub struct JsonCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> Codec<T> for JsonCodec<T>
where
    T: Serialize + DeserializeOwned,
{
    fn serialize(&self, topic: &str, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::serialize(topic, e.to_string()))
    }

    fn deserialize(&self, topic: &str, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::deserialize(topic, e.to_string()))
    }
}
