pub mod area;
pub mod client;
pub mod districts;
pub mod fields;
pub mod traits;
pub mod types;

pub use client::DivarClient;
