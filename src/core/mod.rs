// Domain-layer modules and shared errors/models
pub mod lookup {
    pub use crate::lookup::*;
}

pub mod parser {
    pub use crate::parser::*;
}

pub mod models {
    pub use crate::models::*;
}

pub mod errors {
    pub use crate::errors::*;
}
