use std::collections::HashMap;
use std::ops::Add;
use std::sync::{Arc, RwLock};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use time::{Duration, OffsetDateTime};
use tracing::warn;

/// Liveness tracking for the asynchronous parts of the service.
///
/// The process contains several background loops and can only be
/// trusted with events while all of them keep running. Each loop
/// registers itself with a reporting deadline and must report healthy
/// more often than that deadline. A component that stops reporting
/// turns the whole process unhealthy, failing the probe so that the
/// orchestrator restarts it.

#[derive(Default, Debug)]
pub struct HealthStatus {
    /// True if every registered component reported within its deadline.
    pub healthy: bool,
    /// Last known status of each component, printed in the probe body.
    pub components: HashMap<String, ComponentStatus>,
}

impl IntoResponse for HealthStatus {
    /// Maps the overall status to the probe status code and prints each
    /// component status in the body for debugging.
    fn into_response(self) -> Response {
        let body = format!("{self:?}");
        match self.healthy {
            true => (StatusCode::OK, body),
            false => (StatusCode::INTERNAL_SERVER_ERROR, body),
        }
        .into_response()
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ComponentStatus {
    /// Set when a component is registered, before its first report.
    Starting,
    /// Recently reported healthy, must report again before the date.
    HealthyUntil(OffsetDateTime),
    /// Reported unhealthy.
    Unhealthy,
    /// The HealthyUntil deadline passed without a fresh report.
    Stalled,
}

#[derive(Clone)]
pub struct HealthHandle {
    component: String,
    deadline: Duration,
    components: Arc<RwLock<HashMap<String, ComponentStatus>>>,
}

impl HealthHandle {
    /// Report healthy until the component's deadline. Must be called more
    /// frequently than the deadline. Does not block and does not need a
    /// runtime, so it is safe from librdkafka callback threads too.
    pub fn report_healthy(&self) {
        self.report_status(ComponentStatus::HealthyUntil(
            OffsetDateTime::now_utc().add(self.deadline),
        ))
    }

    pub fn report_status(&self, status: ComponentStatus) {
        match self.components.write() {
            Ok(mut map) => {
                map.insert(self.component.clone(), status);
            }
            // Poisoned lock: leave the stale entry, the probe will stall out.
            Err(err) => warn!("failed to report {} status: {}", self.component, err),
        }
    }
}

#[derive(Clone, Default)]
pub struct HealthRegistry {
    name: String,
    components: Arc<RwLock<HashMap<String, ComponentStatus>>>,
}

impl HealthRegistry {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            components: Default::default(),
        }
    }

    /// Registers a new component. The returned handle should be passed to
    /// the component, to allow it to frequently report its health status.
    /// Until its first report the component counts as Starting, which is
    /// not healthy.
    pub fn register(&self, component: String, deadline: Duration) -> HealthHandle {
        let handle = HealthHandle {
            component,
            deadline,
            components: self.components.clone(),
        };
        handle.report_status(ComponentStatus::Starting);
        handle
    }

    /// Returns the overall process status, computed from the status of
    /// every registered component. Can be used as an axum handler.
    pub fn get_status(&self) -> HealthStatus {
        let components = self.components.read().expect("poisoned HealthRegistry lock");

        // An empty registry is unhealthy: nothing registered yet means
        // startup has not finished.
        let mut result = HealthStatus {
            healthy: !components.is_empty(),
            components: HashMap::with_capacity(components.len()),
        };
        let now = OffsetDateTime::now_utc();

        for (name, status) in components.iter() {
            match status {
                ComponentStatus::HealthyUntil(until) if until.gt(&now) => {
                    result.components.insert(name.clone(), status.clone());
                }
                ComponentStatus::HealthyUntil(_) => {
                    result.healthy = false;
                    result
                        .components
                        .insert(name.clone(), ComponentStatus::Stalled);
                }
                _ => {
                    result.healthy = false;
                    result.components.insert(name.clone(), status.clone());
                }
            }
        }

        if !result.healthy {
            warn!("{} health check failed: {:?}", self.name, result.components);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use crate::{ComponentStatus, HealthRegistry, HealthStatus};
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use std::ops::Sub;
    use time::{Duration, OffsetDateTime};

    #[test]
    fn defaults_to_unhealthy() {
        let registry = HealthRegistry::new("liveness");
        assert!(!registry.get_status().healthy);
    }

    #[test]
    fn one_component() {
        let registry = HealthRegistry::new("liveness");

        // New components are registered in Starting
        let handle = registry.register("one".to_string(), Duration::seconds(30));
        let status = registry.get_status();
        assert!(!status.healthy);
        assert_eq!(
            status.components.get("one"),
            Some(&ComponentStatus::Starting)
        );

        // Status goes healthy once the component reports
        handle.report_healthy();
        assert!(registry.get_status().healthy);

        // Status goes unhealthy if the component says so
        handle.report_status(ComponentStatus::Unhealthy);
        let status = registry.get_status();
        assert!(!status.healthy);
        assert_eq!(
            status.components.get("one"),
            Some(&ComponentStatus::Unhealthy)
        );
    }

    #[test]
    fn staleness_check() {
        let registry = HealthRegistry::new("liveness");
        let handle = registry.register("one".to_string(), Duration::seconds(30));

        handle.report_healthy();
        assert!(registry.get_status().healthy);

        // If the component's ping is too old, it is considered stalled
        // and the healthcheck fails
        handle.report_status(ComponentStatus::HealthyUntil(
            OffsetDateTime::now_utc().sub(Duration::seconds(1)),
        ));
        let status = registry.get_status();
        assert!(!status.healthy);
        assert_eq!(
            status.components.get("one"),
            Some(&ComponentStatus::Stalled)
        );
    }

    #[test]
    fn several_components() {
        let registry = HealthRegistry::new("liveness");
        let handle1 = registry.register("one".to_string(), Duration::seconds(30));
        let handle2 = registry.register("two".to_string(), Duration::seconds(30));

        // First component going healthy is not enough
        handle1.report_healthy();
        assert!(!registry.get_status().healthy);

        // Second component going healthy brings the health to green
        handle2.report_healthy();
        assert!(registry.get_status().healthy);

        // Any component going unhealthy takes the health down
        handle1.report_status(ComponentStatus::Unhealthy);
        assert!(!registry.get_status().healthy);

        // And recovering returns it to green
        handle1.report_healthy();
        assert!(registry.get_status().healthy);
    }

    #[test]
    fn into_response() {
        let nok = HealthStatus::default().into_response();
        assert_eq!(nok.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let ok = HealthStatus {
            healthy: true,
            components: Default::default(),
        }
        .into_response();
        assert_eq!(ok.status(), StatusCode::OK);
    }
}
