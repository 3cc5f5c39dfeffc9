//! Built-in standalone step kinds.

pub mod exec;
pub mod static_step;

use crate::registry::{standalone_step_factory, Registry};

pub use exec::{ExecStep, ExecStepConfig, EXEC_STEP_KIND};
pub use static_step::{StaticStep, StaticStepConfig, STATIC_STEP_KIND};

/// Registers the built-in standalone step factories.
pub fn register(registry: &Registry) {
    registry.register_step(
        STATIC_STEP_KIND,
        standalone_step_factory(
            STATIC_STEP_KIND,
            |_ctx, id, spec: quarry_types::StaticStepSpec| {
                StaticStep::new(id, StaticStepConfig::from_spec(&spec))
                    .map(|step| Box::new(step) as Box<dyn crate::core::Step>)
            },
        ),
    );

    registry.register_step(
        EXEC_STEP_KIND,
        standalone_step_factory(
            EXEC_STEP_KIND,
            |_ctx, id, spec: quarry_types::ExecStepSpec| {
                ExecStep::new(id, ExecStepConfig::from_spec(&spec))
                    .map(|step| Box::new(step) as Box<dyn crate::core::Step>)
            },
        ),
    );
}
