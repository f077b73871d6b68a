use async_trait::async_trait;
use tracing::info;

use crate::{
    engine::RoutingEngine,
    error::TaskError,
    models::{
        event::Event,
        task::{DispatchTask, NotificationArgs, ROUTE_TASK_NAME},
    },
    worker::TaskHandler,
};

/// Master-queue handler: decodes the inbound event and hands it to the routing engine.
pub struct RouteTaskHandler {
    engine: RoutingEngine,
}

impl RouteTaskHandler {
    pub fn new(engine: RoutingEngine) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl TaskHandler for RouteTaskHandler {
    fn task_name(&self) -> String {
        ROUTE_TASK_NAME.to_string()
    }

    async fn handle(&self, task: &DispatchTask) -> Result<(), TaskError> {
        let args = NotificationArgs::from_task(task)?;
        let payload = args.data_map()?;

        let event = Event::new(
            args.subject.clone(),
            args.account().map(str::to_string),
            args.event_type,
            payload,
        );

        let report = self.engine.route(&event).await?;

        info!(
            task_id = %task.uuid,
            tenant_id = %event.tenant_id,
            event_type = %event.event_type,
            dispatched = report.dispatched.len(),
            skipped = report.skipped.len(),
            "Event routed"
        );

        Ok(())
    }
}
