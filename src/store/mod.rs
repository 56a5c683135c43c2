pub mod codec;
pub mod layout;
pub mod reader;
pub mod varint;
pub mod writer;

/// Binary container for a sealed index: dictionary, metadata, and both
/// posting maps in one magic-tagged, sectioned `.rwdx` file.
///
/// `save` lives in [`writer`], `load` in [`reader`].
pub struct IndexStore;
