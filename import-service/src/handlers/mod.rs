pub mod entries;
pub mod health;
pub mod mappings;
pub mod sessions;
