mod database {
    pub mod actions;
    pub mod error;
    pub mod form;
    pub mod pagination;
    pub mod schema;
}
mod authentication {
    pub mod cryptography;
    pub mod jwt;
    pub mod middleware;
    pub mod permissions;
}
pub mod shopping_list {
    pub mod aggregate;
    pub mod document;
}
pub mod config;
mod constants;
pub mod error;
mod handlers;
pub mod media;
pub mod routes;
pub mod state;
pub mod views;

pub use authentication::*;
pub use constants::*;
pub use database::*;
