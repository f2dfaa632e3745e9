pub mod error;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod service;

pub use error::RepoError;
pub use service::ImageRepoService;
