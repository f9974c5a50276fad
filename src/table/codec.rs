use super::error::CodecError;

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;

/// Translates between rows and the `(key bytes, value bytes)` pair stored in
/// the keeper. The key bytes become the node name (after base64), the value
/// bytes become the node data.
pub trait RowCodec: Send + Sync + 'static {
    /// Primary key type used by typed lookups.
    type Key: Ord + Clone + Send + Sync + 'static;
    type Row: Clone + Send + Sync + 'static;

    fn serialize_key(&self, key: &Self::Key) -> Result<Vec<u8>, CodecError>;

    fn encode_row(&self, row: &Self::Row) -> Result<(Vec<u8>, Vec<u8>), CodecError>;

    fn decode_row(&self, key: &[u8], value: &[u8]) -> Result<Self::Row, CodecError>;

    /// Row emitted for missing keys when the caller asks for presence info.
    fn default_row(&self) -> Self::Row;
}

/// Stores `(K, V)` rows with bincode encodings for both halves.
pub struct BincodeCodec<K, V> {
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> BincodeCodec<K, V> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<K, V> Default for BincodeCodec<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> RowCodec for BincodeCodec<K, V>
where
    K: Serialize + DeserializeOwned + Ord + Clone + Default + Send + Sync + 'static,
    V: Serialize + DeserializeOwned + Clone + Default + Send + Sync + 'static,
{
    type Key = K;
    type Row = (K, V);

    fn serialize_key(&self, key: &K) -> Result<Vec<u8>, CodecError> {
        bincode::serialize(key).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn encode_row(&self, row: &(K, V)) -> Result<(Vec<u8>, Vec<u8>), CodecError> {
        let key = self.serialize_key(&row.0)?;
        let value = bincode::serialize(&row.1).map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok((key, value))
    }

    fn decode_row(&self, key: &[u8], value: &[u8]) -> Result<(K, V), CodecError> {
        let key = bincode::deserialize(key).map_err(|e| CodecError::Decode(e.to_string()))?;
        let value = bincode::deserialize(value).map_err(|e| CodecError::Decode(e.to_string()))?;
        Ok((key, value))
    }

    fn default_row(&self) -> (K, V) {
        (K::default(), V::default())
    }
}
