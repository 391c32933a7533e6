use std::fmt;

use nova_storage::{KeyCodec, StorageError};
use serde::{Deserialize, Serialize};

/// An interned id that can be stored as a raw `u32`.
pub trait RawId: Copy + Ord + fmt::Debug {
    fn from_raw(raw: u32) -> Self;
    fn to_raw(self) -> u32;
}

macro_rules! interned_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u32);

        impl $name {
            pub const fn from_raw(raw: u32) -> Self {
                $name(raw)
            }

            pub const fn to_raw(self) -> u32 {
                self.0
            }
        }

        impl RawId for $name {
            fn from_raw(raw: u32) -> Self {
                $name(raw)
            }

            fn to_raw(self) -> u32 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }
    };
}

interned_id!(
    /// Interned fully-qualified class name.
    ClassId
);
interned_id!(
    /// Interned method name (scoped by the class it is paired with).
    MethodId
);
interned_id!(
    /// Interned fully-qualified test name.
    TestId
);
interned_id!(
    /// Interned build module name.
    ModuleId
);

/// `(class, method)` packed as class id in the high 32 bits, method id in the low 32 bits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodKey(u64);

impl MethodKey {
    pub const fn new(class: ClassId, method: MethodId) -> Self {
        MethodKey(((class.0 as u64) << 32) | method.0 as u64)
    }

    pub const fn from_raw(raw: u64) -> Self {
        MethodKey(raw)
    }

    pub const fn to_raw(self) -> u64 {
        self.0
    }

    pub const fn class(self) -> ClassId {
        ClassId((self.0 >> 32) as u32)
    }

    pub const fn method(self) -> MethodId {
        MethodId(self.0 as u32)
    }
}

impl fmt::Debug for MethodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MethodKey")
            .field(&self.class())
            .field(&self.method())
            .finish()
    }
}

impl KeyCodec for MethodKey {
    fn encode_key(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.0.to_be_bytes());
    }

    fn decode_key(bytes: &[u8]) -> Result<Self, StorageError> {
        let bytes: [u8; 8] = bytes.try_into().map_err(|_| {
            StorageError::Decode(format!("method key must be 8 bytes, got {}", bytes.len()))
        })?;
        Ok(MethodKey(u64::from_be_bytes(bytes)))
    }
}

impl KeyCodec for TestId {
    fn encode_key(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.0.to_be_bytes());
    }

    fn decode_key(bytes: &[u8]) -> Result<Self, StorageError> {
        let bytes: [u8; 4] = bytes.try_into().map_err(|_| {
            StorageError::Decode(format!("test key must be 4 bytes, got {}", bytes.len()))
        })?;
        Ok(TestId(u32::from_be_bytes(bytes)))
    }
}
