//! casmir-storage: OpenDAL abstraction over the S3-compatible blob store

pub mod blob;
pub mod health;
pub mod operator;

pub use blob::{blob_exists, delete_blob, put_blob};
pub use health::{check_health, is_healthy};
pub use operator::build_operator;
