pub mod client;
pub mod provider;

pub use client::MegaSenaApi;
pub use provider::DrawSource;
