use once_cell::sync::OnceCell;
use std::sync::Arc;

use crate::domain::a001_group::{invite::InviteService, join::JoinService, service::GroupService};

static APP_CONTEXT: OnceCell<AppContext> = OnceCell::new();

/// Сервисы, собранные при старте и доступные обработчикам
pub struct AppContext {
    pub groups: Arc<GroupService>,
    pub invites: Arc<InviteService>,
    pub joins: Arc<JoinService>,
}

impl AppContext {
    pub fn new(groups: GroupService, invites: InviteService) -> Self {
        let groups = Arc::new(groups);
        let invites = Arc::new(invites);
        let joins = Arc::new(JoinService::new(groups.clone(), invites.clone()));
        Self {
            groups,
            invites,
            joins,
        }
    }
}

pub fn initialize(context: AppContext) -> anyhow::Result<()> {
    APP_CONTEXT
        .set(context)
        .map_err(|_| anyhow::anyhow!("Application context is already initialized"))
}

pub fn get() -> &'static AppContext {
    APP_CONTEXT
        .get()
        .expect("Application context has not been initialized")
}
