//! Views of type-erased objects.

use super::constituent;
use super::element::Referent;
use super::string;
use crate::arena::Place;
use crate::collections::{array, join_map, join_pair_array, map, pair_array, vector};
use crate::error::{RelocError, Result};
use crate::types::{Constituent, ObjectKind, TypeDescriptor};
use std::fmt;

/// An object whose type is only known from its stored descriptor.
///
/// Operations dispatch on the descriptor each time they run, so a view
/// taken from a relocated block behaves exactly like one taken before the
/// move.
#[derive(Clone)]
pub struct ObjectView {
    place: Place,
    descriptor: TypeDescriptor,
}

impl ObjectView {
    pub(crate) fn new(place: Place, descriptor: TypeDescriptor) -> Self {
        Self { place, descriptor }
    }

    /// The stored descriptor.
    pub fn descriptor(&self) -> TypeDescriptor {
        self.descriptor
    }

    /// The object kind, `None` for plain data.
    pub fn kind(&self) -> Result<Option<ObjectKind>> {
        match self.descriptor.classify()? {
            Constituent::Plain(_) => Ok(None),
            Constituent::Object(kind) => Ok(Some(kind)),
        }
    }

    /// Size of the object's payload in bytes.
    pub fn byte_size(&self) -> Result<u64> {
        self.place
            .read(|memory, at| constituent::object_size(memory, self.descriptor, at))
    }

    /// Number of elements for containers and strings, `None` otherwise.
    ///
    /// Strings count bytes, maps and join maps count distinct keys.
    pub fn len(&self) -> Result<Option<u64>> {
        self.place.read(|memory, at| {
            let len = match self.descriptor.classify()? {
                Constituent::Plain(_) => return Ok(None),
                Constituent::Object(kind) => match kind {
                    ObjectKind::Handle => return Ok(None),
                    ObjectKind::String => string::text_bytes(memory, at)?.len() as u64,
                    ObjectKind::Bytes => string::bytes_size(memory, at)? - 8,
                    ObjectKind::Vector => vector::len(memory, at)? as u64,
                    ObjectKind::Array => array::header(memory, at)?.used as u64,
                    ObjectKind::Map => match map::table(memory, at)? {
                        Some(body) => pair_array::header(memory, body)?.used as u64,
                        None => 0,
                    },
                    ObjectKind::PairArray => pair_array::header(memory, at)?.used as u64,
                    ObjectKind::JoinMap => match join_map::table(memory, at)? {
                        Some(body) => join_pair_array::header(memory, body)?.used as u64,
                        None => 0,
                    },
                    ObjectKind::JoinPairArray => join_pair_array::header(memory, at)?.used as u64,
                },
            };
            Ok(Some(len))
        })
    }

    /// A one-line description of the object.
    pub fn describe(&self) -> Result<String> {
        let kind = match self.kind()? {
            None => return Ok(format!("{} bytes of plain data", self.byte_size()?)),
            Some(kind) => kind,
        };
        match (kind, self.len()?) {
            (ObjectKind::String, _) => {
                let text = self.place.read(|memory, at| {
                    let bytes = string::text_bytes(memory, at)?;
                    Ok(String::from_utf8_lossy(bytes).into_owned())
                })?;
                Ok(format!("string {text:?}"))
            }
            (_, Some(len)) => Ok(format!("{kind} of {len}")),
            (_, None) => Ok(kind.to_string()),
        }
    }

    /// View the object as a `T`.
    ///
    /// # Errors
    /// `TypeMismatch` when the stored object is not a `T`.
    pub fn downcast<T: Referent>(&self) -> Result<T::Target> {
        self.place.read(|memory, at| {
            if !T::accepts(memory, self.descriptor, at)? {
                return Err(RelocError::TypeMismatch {
                    expected: T::expected(),
                    found: self.descriptor,
                });
            }
            T::target(self.place.block(), memory, at, self.descriptor)
        })
    }
}

impl fmt::Debug for ObjectView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectView")
            .field("place", &self.place)
            .field("descriptor", &self.descriptor)
            .finish()
    }
}
