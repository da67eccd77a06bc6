pub mod checkpoint;
pub mod feeds;
pub mod fuzzy;
pub mod gateway;
pub mod index;
pub mod pipeline;
pub mod resolution;
pub mod signals;
pub mod store;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;
