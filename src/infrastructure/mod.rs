// Infrastructure layer - External dependencies and adapters
pub mod chunked_json;
pub mod config;
pub mod file_feed_repository;
pub mod http_feed_repository;
pub mod http_response;
