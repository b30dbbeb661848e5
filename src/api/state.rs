use std::sync::Arc;

use crate::batch::TradeBuffer;

#[derive(Clone)]
pub struct AppState {
    pub buffer: Arc<dyn TradeBuffer>,
}

impl AppState {
    pub fn new(buffer: Arc<dyn TradeBuffer>) -> Self {
        Self { buffer }
    }
}
