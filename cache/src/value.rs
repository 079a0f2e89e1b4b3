use crate::error::PersistError;

use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::sync::Arc;

use ahash::HashMap;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A value that can be written to and revived from a durable store.
///
/// Implemented automatically for every `Serialize + DeserializeOwned` type
/// that can be shared across threads.
pub trait Persistable: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Persistable for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

type EncodeFn = fn(&(dyn Any + Send + Sync)) -> Result<serde_json::Value, PersistError>;
type DecodeFn = fn(serde_json::Value) -> Result<CachedValue, PersistError>;

/// The serializer pair captured when a persistable value is erased.
#[derive(Clone, Copy)]
struct Codec {
  encode: EncodeFn,
  decode: DecodeFn,
}

fn encode_erased<T: Persistable>(
  value: &(dyn Any + Send + Sync),
) -> Result<serde_json::Value, PersistError> {
  match value.downcast_ref::<T>() {
    Some(typed) => Ok(serde_json::to_value(typed)?),
    None => Err(PersistError::UnknownType {
      type_name: type_name::<T>().to_string(),
    }),
  }
}

fn decode_erased<T: Persistable>(value: serde_json::Value) -> Result<CachedValue, PersistError> {
  let typed: T = serde_json::from_value(value)?;
  Ok(CachedValue::new(typed))
}

/// A type-erased, cheaply cloneable cache value.
///
/// The payload lives behind an `Arc<dyn Any>`, so reading a value never
/// clones it. Values created through [`CachedValue::new`] remember how to
/// serialize themselves and may be persisted; values created through
/// [`CachedValue::opaque`] live in memory only.
#[derive(Clone)]
pub struct CachedValue {
  inner: Arc<dyn Any + Send + Sync>,
  type_id: TypeId,
  type_name: &'static str,
  stable_name: Option<Arc<str>>,
  codec: Option<Codec>,
}

impl CachedValue {
  /// Wraps a serializable value.
  pub fn new<T: Persistable>(value: T) -> Self {
    Self::from_arc(Arc::new(value))
  }

  /// Wraps an already shared serializable value.
  pub fn from_arc<T: Persistable>(value: Arc<T>) -> Self {
    Self {
      inner: value,
      type_id: TypeId::of::<T>(),
      type_name: type_name::<T>(),
      stable_name: None,
      codec: Some(Codec {
        encode: encode_erased::<T>,
        decode: decode_erased::<T>,
      }),
    }
  }

  /// Wraps a value that has no serialized form.
  pub fn opaque<T: Any + Send + Sync>(value: T) -> Self {
    Self {
      inner: Arc::new(value),
      type_id: TypeId::of::<T>(),
      type_name: type_name::<T>(),
      stable_name: None,
      codec: None,
    }
  }

  /// The Rust type name of the payload.
  #[inline]
  pub fn type_name(&self) -> &'static str {
    self.type_name
  }

  /// The descriptor recorded alongside the value in a durable store.
  ///
  /// This is the name the type was registered under, if any, and the Rust
  /// type name otherwise.
  pub fn descriptor(&self) -> &str {
    self.stable_name.as_deref().unwrap_or(self.type_name)
  }

  /// Returns `true` if this value can be mirrored to a durable store.
  #[inline]
  pub fn is_persistable(&self) -> bool {
    self.codec.is_some()
  }

  /// Returns `true` if the payload is a `T`.
  #[inline]
  pub fn is<T: Any>(&self) -> bool {
    self.inner.is::<T>()
  }

  /// Borrows the payload as a `T`.
  #[inline]
  pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
    self.inner.downcast_ref::<T>()
  }

  /// Returns a shared handle to the payload if it is a `T`.
  pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
    self.inner.clone().downcast::<T>().ok()
  }

  /// Serializes the payload, or returns `None` for opaque values.
  pub(crate) fn encode(&self) -> Option<Result<serde_json::Value, PersistError>> {
    self
      .codec
      .map(|codec| (codec.encode)(self.inner.as_ref()))
  }
}

impl fmt::Debug for CachedValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CachedValue")
      .field("type_name", &self.type_name)
      .field("descriptor", &self.descriptor())
      .field("persistable", &self.is_persistable())
      .finish_non_exhaustive()
  }
}

/// Maps persisted type descriptors back to concrete Rust types.
///
/// A durable record only carries its descriptor string, so a type must have
/// been registered before a record of that type can be revived. Types are
/// registered automatically whenever a persistable value is added, and can be
/// registered up front through the builder for values written by a previous
/// process.
///
/// The default descriptor is `std::any::type_name`, which may change between
/// compiler versions. A type registered with an explicit name is written and
/// read under that name instead.
pub(crate) struct TypeRegistry {
  decoders: RwLock<HashMap<String, DecodeFn>>,
  stable_names: RwLock<HashMap<TypeId, Arc<str>>>,
}

impl TypeRegistry {
  /// Creates a registry pre-populated with common scalar and collection types.
  pub(crate) fn with_defaults() -> Self {
    let registry = Self {
      decoders: RwLock::new(HashMap::default()),
      stable_names: RwLock::new(HashMap::default()),
    };
    registry.register::<String>();
    registry.register::<bool>();
    registry.register::<i32>();
    registry.register::<i64>();
    registry.register::<u32>();
    registry.register::<u64>();
    registry.register::<usize>();
    registry.register::<f32>();
    registry.register::<f64>();
    registry.register::<Vec<String>>();
    registry.register::<Vec<i64>>();
    registry.register::<Vec<u8>>();
    registry.register::<serde_json::Value>();
    registry
  }

  pub(crate) fn register<T: Persistable>(&self) {
    let name = type_name::<T>();
    if self.decoders.read().contains_key(name) {
      return;
    }
    self
      .decoders
      .write()
      .insert(name.to_string(), decode_erased::<T>);
  }

  /// Registers `T` under `name` as well as its Rust type name. Values of
  /// type `T` are then persisted under `name`.
  pub(crate) fn register_as<T: Persistable>(&self, name: &str) {
    self.register::<T>();
    self
      .decoders
      .write()
      .insert(name.to_string(), decode_erased::<T>);
    self
      .stable_names
      .write()
      .insert(TypeId::of::<T>(), Arc::from(name));
  }

  /// Registers the decoder carried by an erased value, if it has one, and
  /// returns the value tagged with its registered name.
  pub(crate) fn register_value(&self, value: CachedValue) -> CachedValue {
    let Some(codec) = value.codec else {
      return value;
    };
    if !self.decoders.read().contains_key(value.type_name) {
      self
        .decoders
        .write()
        .insert(value.type_name.to_string(), codec.decode);
    }
    self.with_stable_name(value)
  }

  pub(crate) fn decode(
    &self,
    type_name: &str,
    payload: serde_json::Value,
  ) -> Result<CachedValue, PersistError> {
    let decoder = self.decoders.read().get(type_name).copied();
    match decoder {
      Some(decode) => decode(payload).map(|value| self.with_stable_name(value)),
      None => Err(PersistError::UnknownType {
        type_name: type_name.to_string(),
      }),
    }
  }

  fn with_stable_name(&self, mut value: CachedValue) -> CachedValue {
    if let Some(name) = self.stable_names.read().get(&value.type_id) {
      value.stable_name = Some(name.clone());
    }
    value
  }

  #[cfg(test)]
  pub(crate) fn len(&self) -> usize {
    self.decoders.read().len()
  }
}

impl fmt::Debug for TypeRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TypeRegistry")
      .field("types", &self.decoders.read().len())
      .finish()
  }
}
