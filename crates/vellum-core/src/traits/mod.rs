pub mod backend;
pub mod credential;
pub mod factory;
pub mod health;

pub use backend::{
    check_precondition, BackendAdapter, BackendKind, Page, QueryMode, QueryRequest, WriteIntent,
    WriteKind,
};
pub use credential::{AccessToken, StaticTokenSource, TokenSource};
pub use factory::ProviderFactory;
pub use health::{HealthCheck, HealthStatus};
