// Domain-layer modules and shared errors/models
pub mod availability {
    pub use crate::availability::*;
}

pub mod lifecycle {
    pub use crate::lifecycle::*;
}

pub mod models {
    pub use crate::models::*;
}

pub mod money {
    pub use crate::money::*;
}

pub mod validation {
    pub use crate::validation::*;
}

pub mod errors {
    pub use crate::errors::*;
}
