pub mod auth;
pub mod error;
pub mod routes;
pub mod server;
pub mod state;


pub use auth::MEMBER_HEADER;
pub use error::{ApiError, ApiResult};
pub use server::{build_router, serve};
pub use state::AppState;
