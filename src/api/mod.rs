// Thin namespace wrapper for API-layer components
pub mod handlers {
    pub use crate::handlers::*;
}

pub mod staff_handler {
    pub use crate::staff_handler::*;
}

pub mod customer_handler {
    pub use crate::customer_handler::*;
}

pub mod appointment_handler {
    pub use crate::appointment_handler::*;
}

pub mod package_handler {
    pub use crate::package_handler::*;
}

pub mod dashboard_handler {
    pub use crate::dashboard_handler::*;
}

pub mod storefront_handler {
    pub use crate::storefront_handler::*;
}

pub mod auth {
    pub use crate::auth::*;
}

pub use crate::app::build_router;
