use std::sync::Arc;
use skybook_saga::BookingSaga;

#[derive(Clone)]
pub struct AppState {
    pub saga: Arc<BookingSaga>,
}
