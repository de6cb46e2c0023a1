use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use rust_box::task_exec_queue::{Builder, TaskExecQueue};

use crate::conf::Settings;
use crate::logger::Logger;
use crate::metastore::DefaultMetaStore;
use crate::vhost::VirtualHost;
use crate::Result;

#[derive(Clone)]
pub struct ServerContext {
    inner: Arc<ServerContextInner>,
}

pub struct ServerContextInner {
    pub settings: Settings,
    pub logger: Logger,
    pub global_exec: TaskExecQueue,
    pub default_vhost: VirtualHost,
}

impl Deref for ServerContext {
    type Target = ServerContextInner;
    #[inline]
    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl ServerContext {
    pub fn new(settings: Settings, logger: Logger) -> Self {
        let (global_exec, task_runner) = Builder::default()
            .workers(settings.task.exec_workers)
            .queue_max(settings.task.exec_queue_max)
            .build();

        tokio::spawn(async move {
            task_runner.await;
        });

        let data_dir = &settings.storage.data_dir;
        let default_vhost = VirtualHost::new(
            "default",
            data_dir,
            Box::new(DefaultMetaStore::new(data_dir)),
            global_exec.clone(),
        );

        ServerContext {
            inner: Arc::new(ServerContextInner { settings, logger, global_exec, default_vhost }),
        }
    }

    /// Recovers the default virtual host from disk and starts its dispatch
    /// loop. Listeners must not accept connections before this completes.
    pub async fn build(self) -> Result<Self> {
        self.default_vhost.recover().await?;
        self.default_vhost.start_dispatch();
        Ok(self)
    }
}

impl fmt::Debug for ServerContext {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ServerContext ...")?;
        Ok(())
    }
}
