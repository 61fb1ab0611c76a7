use std::sync::Arc;

use serenity::{async_trait, client};
use tokio::sync::Mutex;

use crate::{config::Config, events::CheckLock};

#[async_trait]
pub trait ClientContextExt {
    async fn get_config(&self) -> Arc<Config>;
    async fn get_check_lock(&self) -> Arc<Mutex<()>>;
}

#[async_trait]
impl ClientContextExt for client::Context {
    async fn get_config(&self) -> Arc<Config> {
        self.data.read().await.get::<Config>().unwrap().clone()
    }

    async fn get_check_lock(&self) -> Arc<Mutex<()>> {
        self.data.read().await.get::<CheckLock>().unwrap().clone()
    }
}
