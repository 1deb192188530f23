//! External DGII integrations.

pub mod form_client {
    pub use crate::form_client::*;
}

pub mod importer {
    pub use crate::importer::*;
}
