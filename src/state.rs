use crate::services::SessionHandle;

#[derive(Clone)]
pub struct AppState {
    pub session: SessionHandle,
}
