pub mod factory;
pub mod ops;
pub mod posting;
