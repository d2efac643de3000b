//! The object model: elements, references and strings.
//!
//! Everything stored in a block is described by a
//! [`TypeDescriptor`](crate::types::TypeDescriptor). Rust types map onto
//! descriptors through the [`Element`] and [`Referent`] traits; the
//! descriptor-driven engine in `constituent` does the copying and tearing
//! down once the static type is gone.

pub(crate) mod constituent;
pub(crate) mod element;
mod handle;
pub(crate) mod string;
mod view;

pub use element::{Element, Referent, Slot, Store};
pub use handle::{Handle, Object, RelPtr};
pub use string::{STR_INLINE_CAPACITY, Str};
pub use view::ObjectView;

pub(crate) use handle::HANDLE_DESCRIPTOR;
