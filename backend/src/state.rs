use std::sync::Arc;

use crate::{auth::jwt::JwtService, automation::Automation, config::AppConfig, store::CrmStore};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn CrmStore>,
    pub config: Arc<AppConfig>,
    pub jwt: JwtService,
    pub automation: Arc<Automation>,
}

impl AppState {
    pub fn new(store: Arc<dyn CrmStore>, config: AppConfig, jwt: JwtService) -> Self {
        let automation = Automation::new(config.automation_actor.clone());
        Self {
            store,
            config: Arc::new(config),
            jwt,
            automation: Arc::new(automation),
        }
    }

    pub fn store(&self) -> &dyn CrmStore {
        self.store.as_ref()
    }
}
