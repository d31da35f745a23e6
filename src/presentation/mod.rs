// Presentation layer - HTTP surface for the map widget
pub mod app_state;
pub mod handlers;
pub mod router;
