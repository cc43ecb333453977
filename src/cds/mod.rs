//! Catalog object model: the typed CDS object graph and its wire codecs.

pub mod dictionary;
pub mod object;
pub mod resource;

pub use dictionary::Dictionary;
pub use object::{CdsObject, ContainerData, ItemData, ItemKind, ObjectVariant};
pub use resource::Resource;
