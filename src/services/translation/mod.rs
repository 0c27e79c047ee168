pub mod api_client;
pub mod cache;
pub mod catalog;
pub mod service;

pub use api_client::{GoogleTranslateClient, TranslationProvider};
pub use cache::TranslationCache;
pub use service::TranslationService;
