pub mod database;
pub mod store;

pub use database::ChatDb;
pub use store::{ChatStore, InMemoryChatStore};
