// Tenement - multi-tenant database connection routing
//
// Facade over the workspace crates: configuration lives in `tenement-config`,
// the connection pool and switching protocol in `tenement-core`.

pub use tenement_config as config;
pub use tenement_core::*;

#[cfg(feature = "logging")]
pub mod logging;

// Prelude for common imports
pub mod prelude {
    pub use tenement_core::prelude::*;
    pub use tenement_core::{
        ConnectionKey, ConnectionName, EnvironmentPolicy, Isolation, IsolationMode, TenantName,
    };
}
