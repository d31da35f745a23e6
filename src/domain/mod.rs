// Domain layer - Timeline correlation and delta computation
pub mod delta;
pub mod feed;
pub mod history;
pub mod observation;
pub mod overlay;
pub mod timeline;
