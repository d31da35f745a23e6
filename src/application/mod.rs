// Application layer - Use cases and ports
pub mod feed_repository;
pub mod overlay_controller;
