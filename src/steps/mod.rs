//! Concrete provisioning steps, one module per step.

pub mod agent;
pub mod media;
pub mod overlay;
pub mod timezone;
pub mod usb_monitor;

pub use agent::AgentStep;
pub use media::{MediaChoice, MediaStep};
pub use overlay::OverlayStep;
pub use timezone::TimezoneStep;
pub use usb_monitor::UsbMonitorStep;

use crate::config::ProvisionConfig;
use crate::step::Step;

/// The declared step list, in run and summary order.
pub fn default_plan(config: &ProvisionConfig) -> Vec<Box<dyn Step>> {
    vec![
        Box::new(TimezoneStep::new(config)),
        Box::new(AgentStep::new(config.agent.clone())),
        Box::new(MediaStep::new(config.media.clone())),
        Box::new(UsbMonitorStep::new(config.usb_monitor.clone())),
        Box::new(OverlayStep::new(config.overlay.clone())),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FailurePolicy, StepId};
    use strum::IntoEnumIterator;

    #[test]
    fn test_default_plan_order_and_policies() {
        let plan = default_plan(&ProvisionConfig::default());
        let ids: Vec<StepId> = plan.iter().map(|s| s.id()).collect();
        assert_eq!(ids, StepId::iter().collect::<Vec<_>>());

        let fatal: Vec<StepId> = plan
            .iter()
            .filter(|s| s.policy() == FailurePolicy::Fatal)
            .map(|s| s.id())
            .collect();
        assert_eq!(fatal, vec![StepId::Agent]);
    }
}
