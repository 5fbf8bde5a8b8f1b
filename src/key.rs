//! Tagged key/value payloads and the witness registry that lets
//! heterogeneous user types share a single map.
//!
//! A [`Key`] or [`Value`] is a type-tag paired with an encoded payload
//! (`# 3` "Key"/"Value"/"Witness"). Equality and hashing operate on the
//! `(tag, bytes)` pair directly, so no registry is needed just to compare
//! two keys. The registry (`Witness`) is only consulted when something
//! needs to *display* a key or value without knowing its concrete Rust
//! type statically -- e.g. a cycle-detection message naming the key at
//! the top of the call stack.

use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Implemented by every concrete type a caller wants to use as a key or
/// a value. `TAG` must be unique per concrete type within a process;
/// colliding tags for distinct Rust types is a caller bug, not something
/// this crate can detect.
pub trait Payload: Serialize + DeserializeOwned + fmt::Debug {
    /// Stable tag identifying this type's encoding among all registered
    /// payload types.
    const TAG: &'static str;
}

/// An externally-supplied identifier for a value the build should
/// produce (`# 3` "Key"). Distinct concrete types with coincidentally
/// equal encoded payloads are still distinct keys, because the tag is
/// part of the equality.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Key {
    tag: Box<str>,
    payload: Arc<[u8]>,
}

impl Key {
    /// Interns `value` as a `Key` by tagging it with its concrete type
    /// and encoding it with the crate's wire format (MessagePack via
    /// `rmp-serde`, matching the encoding used for the on-disk journal).
    pub fn of<T: Payload>(value: &T) -> Self {
        let payload = rmp_serde::to_vec(value).expect("key payload must encode");
        Key {
            tag: T::TAG.into(),
            payload: Arc::from(payload),
        }
    }

    /// The type tag this key was constructed with.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub(crate) fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Decodes this key back to `T`, returning `None` if it was
    /// constructed from a different concrete type.
    pub fn decode<T: Payload>(&self) -> Option<T> {
        if self.tag.as_ref() != T::TAG {
            return None;
        }
        rmp_serde::from_slice(&self.payload).ok()
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("tag", &self.tag)
            .field("bytes", &self.payload.len())
            .finish()
    }
}

/// An opaque user-produced payload (`# 3` "Value"). Carries its own
/// equality (tag + encoded bytes) so the scheduler can tell whether a
/// freshly produced value differs from a prior one without knowing its
/// Rust type.
#[derive(Clone, Serialize, Deserialize)]
pub struct Value {
    tag: Box<str>,
    payload: Arc<[u8]>,
}

impl Value {
    /// Encodes `value` as a `Value`.
    pub fn of<T: Payload>(value: &T) -> Self {
        let payload = rmp_serde::to_vec(value).expect("value payload must encode");
        Value {
            tag: T::TAG.into(),
            payload: Arc::from(payload),
        }
    }

    /// Decodes this value back to `T`, returning `None` if it was
    /// produced from a different concrete type.
    pub fn decode<T: Payload>(&self) -> Option<T> {
        if self.tag.as_ref() != T::TAG {
            return None;
        }
        rmp_serde::from_slice(&self.payload).ok()
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.tag == other.tag && self.payload == other.payload
    }
}
impl Eq for Value {}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Value")
            .field("tag", &self.tag)
            .field("bytes", &self.payload.len())
            .finish()
    }
}

/// Runtime registry mapping a type tag to a decoder able to produce a
/// human-readable form of its payload, without the caller needing to
/// know the concrete Rust type at the point of display (`# 3`
/// "Witness", `# 9` "heterogeneous key and value types").
#[derive(Default)]
pub struct Witness {
    decoders: FxHashMap<&'static str, fn(&[u8]) -> String>,
}

impl Witness {
    pub fn new() -> Self {
        Witness {
            decoders: FxHashMap::default(),
        }
    }

    /// Registers the decoder for `T`. Idempotent: registering the same
    /// tag twice just overwrites the decoder (useful when tests rebuild
    /// a witness from scratch per case).
    pub fn register<T: Payload>(&mut self) {
        self.decoders.insert(T::TAG, |bytes| {
            match rmp_serde::from_slice::<T>(bytes) {
                Ok(value) => format!("{:?}", value),
                Err(_) => "<undecodable>".to_string(),
            }
        });
    }

    /// Best-effort display form of a key: the decoded `Debug` output if
    /// a decoder is registered for its tag, else a placeholder naming
    /// the tag and payload size.
    pub fn display_key(&self, key: &Key) -> String {
        self.display(key.tag(), key.payload())
    }

    /// Best-effort display form of a value.
    pub fn display_value(&self, value: &Value) -> String {
        self.display(value.tag(), &value.payload)
    }

    fn display(&self, tag: &str, bytes: &[u8]) -> String {
        match self.decoders.get(tag) {
            Some(decode) => decode(bytes),
            None => format!("<{tag}:{}b>", bytes.len()),
        }
    }
}
