pub mod asset;
pub mod fingerprint;
pub mod library;
pub mod similarity;
pub mod size_cache;
pub mod sort;
pub mod store;
