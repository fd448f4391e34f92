pub mod connection;
pub mod consulting;
pub mod migrations;
pub mod repositories;

pub use connection::{connect_with_settings, DbPool};
pub use consulting::ConsultingStore;
