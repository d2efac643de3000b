//! Relocatable strings.
//!
//! A string occupies 16 bytes in place. Short strings live entirely inside
//! them; longer ones point at a `Bytes` object in the same block.
//!
//! ```text
//! inline (len <= 12)            out of line
//! +0  len   i32                 +0  -1      i32
//! +4  bytes [u8; 12]            +4  reserved
//!                               +8  delta   i64  -> Bytes { len u32, reserved u32, data }
//! ```

use super::constituent::{self, Source};
use super::element::{self, Element, Store, element_referent, sealed};
use crate::arena::{Block, BlockMemory, Place};
use crate::error::{RelocError, Result};
use crate::types::{ArenaOffset, EMBEDDED_SIZE, ObjectKind, TypeDescriptor};
use std::fmt;

/// Longest string stored without a separate allocation.
pub const STR_INLINE_CAPACITY: usize = 12;

const OUT_OF_LINE: i32 = -1;
const BYTES_HEADER: u64 = 8;
const BYTES_DESCRIPTOR: TypeDescriptor = TypeDescriptor::object(ObjectKind::Bytes);

pub(crate) fn construct_empty(memory: &mut BlockMemory, at: ArenaOffset) {
    memory.fill_zero(at, EMBEDDED_SIZE as u64);
}

/// Payload size of the `Bytes` object at `at`.
pub(crate) fn bytes_size(memory: &BlockMemory, at: ArenaOffset) -> Result<u64> {
    memory.check_range(at, BYTES_HEADER)?;
    Ok(BYTES_HEADER + memory.read_u32(at) as u64)
}

/// The `Bytes` object behind an out-of-line string, if any.
fn out_of_line_target(memory: &BlockMemory, at: ArenaOffset) -> Result<Option<ArenaOffset>> {
    match memory.read_i32(at) {
        len if len >= 0 => {
            if len as usize > STR_INLINE_CAPACITY {
                return Err(memory.corruption(at, format!("inline string length {len}")));
            }
            Ok(None)
        }
        OUT_OF_LINE => {
            let field = at.add(8);
            let delta = memory.read_i64(field);
            let target = field
                .follow(delta)
                .ok_or_else(|| memory.corruption(at, "string bytes before the block"))?;
            memory.check_payload(target)?;
            Ok(Some(target))
        }
        code => Err(memory.corruption(at, format!("string code {code}"))),
    }
}

pub(crate) fn owned_bytes(memory: &BlockMemory, at: ArenaOffset) -> Result<Option<(TypeDescriptor, ArenaOffset)>> {
    Ok(out_of_line_target(memory, at)?.map(|target| (BYTES_DESCRIPTOR, target)))
}

fn point_at_bytes(memory: &mut BlockMemory, at: ArenaOffset, target: ArenaOffset) {
    memory.write_i32(at, OUT_OF_LINE);
    memory.write_u32(at.add(4), 0);
    let field = at.add(8);
    memory.write_i64(field, field.delta_to(target));
}

/// The UTF-8 bytes of the string at `at`.
pub(crate) fn text_bytes(memory: &BlockMemory, at: ArenaOffset) -> Result<&[u8]> {
    match out_of_line_target(memory, at)? {
        None => {
            let len = memory.read_i32(at) as u64;
            Ok(memory.bytes(at.add(4), len))
        }
        Some(target) => {
            let size = bytes_size(memory, target)?;
            memory.check_range(target, size)?;
            Ok(memory.bytes(target.add(BYTES_HEADER), size - BYTES_HEADER))
        }
    }
}

/// Build a string holding `text` in the uninitialized slot at `at`.
pub(crate) fn write_str(memory: &mut BlockMemory, at: ArenaOffset, text: &[u8]) -> Result<()> {
    construct_empty(memory, at);
    if text.len() <= STR_INLINE_CAPACITY {
        memory.write_i32(at, text.len() as i32);
        memory.bytes_mut(at.add(4), text.len() as u64).copy_from_slice(text);
        return Ok(());
    }

    let len = u32::try_from(text.len()).map_err(|_| RelocError::InvalidCapacity {
        requested: text.len() as u64,
        cause: "string longer than u32::MAX bytes".to_string(),
    })?;
    let target = memory.allocate(BYTES_HEADER + len as u64)?;
    memory.set_ref_count(target, 1);
    memory.write_u32(target, len);
    memory
        .bytes_mut(target.add(BYTES_HEADER), len as u64)
        .copy_from_slice(text);
    point_at_bytes(memory, at, target);
    Ok(())
}

pub(crate) fn copy_str(src: Source<'_>, src_at: ArenaOffset, dst: &mut BlockMemory, dst_at: ArenaOffset) -> Result<()> {
    let Some(target) = out_of_line_target(src.memory(dst), src_at)? else {
        constituent::copy_bytes(src, src_at, dst, dst_at, EMBEDDED_SIZE as u64);
        return Ok(());
    };

    match src {
        Source::Local => {
            dst.inc_ref(target);
            point_at_bytes(dst, dst_at, target);
        }
        Source::Remote(memory) => {
            construct_empty(dst, dst_at);
            let copied = constituent::deep_copy(memory, BYTES_DESCRIPTOR, target, dst)?;
            point_at_bytes(dst, dst_at, copied);
        }
    }
    Ok(())
}

pub(crate) fn destroy_str(memory: &mut BlockMemory, at: ArenaOffset) -> Result<()> {
    if let Some(target) = out_of_line_target(memory, at)? {
        construct_empty(memory, at);
        constituent::release(memory, BYTES_DESCRIPTOR, target)?;
    }
    Ok(())
}

fn as_utf8<'m>(memory: &BlockMemory, at: ArenaOffset, bytes: &'m [u8]) -> Result<&'m str> {
    std::str::from_utf8(bytes).map_err(|e| memory.corruption(at, e.to_string()))
}

/// A string stored in a block.
#[derive(Clone)]
pub struct Str {
    place: Place,
}

impl Str {
    /// Length in bytes.
    pub fn len(&self) -> Result<usize> {
        self.place.read(|memory, at| Ok(text_bytes(memory, at)?.len()))
    }

    /// Check if the string is empty.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Whether the string is stored inside its 16 bytes.
    pub fn is_inline(&self) -> Result<bool> {
        self.place
            .read(|memory, at| Ok(out_of_line_target(memory, at)?.is_none()))
    }

    /// Run `f` on the string contents without copying them out.
    pub fn with_str<R>(&self, f: impl FnOnce(&str) -> R) -> Result<R> {
        self.place.read(|memory, at| {
            let text = as_utf8(memory, at, text_bytes(memory, at)?)?;
            Ok(f(text))
        })
    }

    /// Copy the contents into an owned `String`.
    pub fn text(&self) -> Result<String> {
        self.with_str(str::to_owned)
    }

    /// Replace the contents.
    pub fn set(&self, text: &str) -> Result<()> {
        self.place.write(|memory, at| {
            constituent::assign(memory, Self::DESCRIPTOR, at, |memory| {
                write_str(memory, at, text.as_bytes())
            })
        })
    }

    /// Offset of the string in its block.
    pub fn offset(&self) -> ArenaOffset {
        self.place.at()
    }
}

impl fmt::Debug for Str {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.text() {
            Ok(text) => write!(f, "Str({:?})@{:?}", text, self.place),
            Err(e) => write!(f, "Str(<{}>)@{:?}", e, self.place),
        }
    }
}

impl sealed::Sealed for Str {}

impl Element for Str {
    const DESCRIPTOR: TypeDescriptor = TypeDescriptor::object(ObjectKind::String);
    type View = Str;

    fn view(block: &Block, memory: &BlockMemory, at: ArenaOffset) -> Result<Str> {
        Ok(Str {
            place: Place::new(block, memory, at),
        })
    }
}

impl<'a> Store<&'a str> for Str {
    fn store(memory: &mut BlockMemory, at: ArenaOffset, value: &'a str) -> Result<()> {
        write_str(memory, at, value.as_bytes())
    }
}

impl<'a> Store<&'a String> for Str {
    fn store(memory: &mut BlockMemory, at: ArenaOffset, value: &'a String) -> Result<()> {
        write_str(memory, at, value.as_bytes())
    }
}

impl Store<String> for Str {
    fn store(memory: &mut BlockMemory, at: ArenaOffset, value: String) -> Result<()> {
        write_str(memory, at, value.as_bytes())
    }
}

impl<'a> Store<&'a Str> for Str {
    fn store(memory: &mut BlockMemory, at: ArenaOffset, value: &'a Str) -> Result<()> {
        element::store_from_place(memory, at, &value.place, Self::DESCRIPTOR)
    }
}

element_referent! { impl[] Str; }

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::AllocationPolicy;

    fn slot(block: &Block) -> Str {
        let mut memory = block.write();
        let at = memory.allocate(16).unwrap();
        Str::view(block, &memory, at).unwrap()
    }

    #[test]
    fn short_strings_stay_inline() {
        let block = Block::create(1024, AllocationPolicy::Reuse, false);
        let s = slot(&block);
        let live = block.live_objects();

        s.set("hello world!").unwrap();
        assert!(s.is_inline().unwrap());
        assert_eq!(s.text().unwrap(), "hello world!");
        assert_eq!(s.len().unwrap(), 12);
        assert_eq!(block.live_objects(), live);
    }

    #[test]
    fn long_strings_use_a_bytes_object() {
        let block = Block::create(1024, AllocationPolicy::Reuse, false);
        let s = slot(&block);
        let live = block.live_objects();

        s.set("a considerably longer string").unwrap();
        assert!(!s.is_inline().unwrap());
        assert_eq!(s.text().unwrap(), "a considerably longer string");
        assert_eq!(block.live_objects(), live + 1);

        s.set("short").unwrap();
        assert!(s.is_inline().unwrap());
        assert_eq!(block.live_objects(), live, "old bytes are released");
    }

    #[test]
    fn empty_string() {
        let block = Block::create(1024, AllocationPolicy::Reuse, false);
        let s = slot(&block);
        assert!(s.is_empty().unwrap());
        assert_eq!(s.text().unwrap(), "");
    }

    #[test]
    fn copies_share_bytes_locally_and_rebuild_remotely() {
        let home = Block::create(1024, AllocationPolicy::Reuse, false);
        let away = Block::create(1024, AllocationPolicy::Reuse, false);
        let original = slot(&home);
        original.set("shared between two slots").unwrap();

        let local = slot(&home);
        local
            .place
            .write(|memory, at| <Str as Store<&Str>>::store(memory, at, &original))
            .unwrap();
        let bytes = out_of_line_target(&home.read(), original.offset())
            .unwrap()
            .unwrap();
        assert_eq!(home.read().ref_count(bytes), 2);

        let remote = slot(&away);
        remote
            .place
            .write(|memory, at| <Str as Store<&Str>>::store(memory, at, &original))
            .unwrap();
        assert_eq!(remote.text().unwrap(), "shared between two slots");
        assert_eq!(home.read().ref_count(bytes), 2);
    }

    #[test]
    fn corrupt_code_is_detected() {
        let block = Block::create(1024, AllocationPolicy::Reuse, false);
        let s = slot(&block);
        block.write().write_i32(s.offset(), -7);
        assert!(s.text().unwrap_err().is_invariant_violation());
    }
}
