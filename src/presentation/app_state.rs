// Application state for HTTP handlers
use crate::application::overlay_controller::OverlayController;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<OverlayController>,
}
