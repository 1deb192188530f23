//! Storage-layer components.

pub mod cache_store {
    pub use crate::cache_store::*;
}

pub mod metrics {
    pub use crate::metrics::*;
}

pub mod db {
    pub use crate::db::*;
}
