use sqlx::PgPool;
use std::sync::Arc;

use crate::services::mpesa_service::MpesaService;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub jwt_secret: String,
    pub mpesa_service: Option<Arc<MpesaService>>,
}

impl AppState {
    pub fn new(pool: PgPool, jwt_secret: String) -> Self {
        AppState {
            pool,
            jwt_secret,
            mpesa_service: None,
        }
    }

    pub fn with_mpesa(mut self, mpesa_service: Arc<MpesaService>) -> Self {
        self.mpesa_service = Some(mpesa_service);
        self
    }
}
