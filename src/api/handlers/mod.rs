//! API request handlers

pub mod docs;
pub mod health;
pub mod media;
pub mod proxy;
pub mod video;
