//! Hardware bindings for scripts.
//!
//! Scripts never touch a [`PowerActuator`] directly; they go through a
//! cloneable [`MotorHandle`] registered as a rhai type and pushed into each
//! context's scope under the port's binding name:
//!
//! ```rhai
//! motor.set_power(50);
//! let p = motor.power();
//! motor.power_off();
//! ```
//!
//! The handle closes only over the shared driver reference; it carries none
//! of the interpreter's own state, so it is safe to hand to every context the
//! runner creates. Power requests are clamped into the driver's control
//! range before the mandatory constrained setter is called.

use std::sync::Arc;

use rhai::{Engine, EvalAltResult};

use crate::actuator::PowerActuator;

/// Script-side handle to one actuator driver.
#[derive(Clone)]
pub struct MotorHandle {
    inner: Arc<PowerActuator>,
}

impl MotorHandle {
    pub fn new(inner: Arc<PowerActuator>) -> Self {
        Self { inner }
    }
}

/// Registers the motor handle type and its methods into an engine.
pub fn register_motor_api(engine: &mut Engine) {
    engine
        .register_type_with_name::<MotorHandle>("Motor")
        .register_fn(
            "set_power",
            |handle: &mut MotorHandle, power: i64| -> Result<(), Box<EvalAltResult>> {
                // Clamp before narrowing so huge requests saturate instead
                // of wrapping.
                let clamped = power.clamp(
                    i64::from(handle.inner.min_control()),
                    i64::from(handle.inner.max_control()),
                ) as i32;
                handle
                    .inner
                    .set_power(clamped, true)
                    .map_err(|e| -> Box<EvalAltResult> { e.to_string().into() })
            },
        )
        .register_fn("power", |handle: &mut MotorHandle| -> i64 {
            i64::from(handle.inner.power())
        })
        .register_fn(
            "power_off",
            |handle: &mut MotorHandle| -> Result<(), Box<EvalAltResult>> {
                handle
                    .inner
                    .power_off()
                    .map_err(|e| -> Box<EvalAltResult> { e.to_string().into() })
            },
        )
        .register_fn("status", |handle: &mut MotorHandle| -> String {
            format!("{:?}", handle.inner.status())
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PortConfig, Settings};
    use crate::scripting::context::{EvalOutcome, ExecutionContext, ScriptBindings};
    use crate::transport::mock::MockCommunicator;
    use rhai::Dynamic;

    fn motor() -> (Arc<PowerActuator>, MockCommunicator) {
        let mut settings = Settings::default();
        settings.ports.insert(
            "M1".into(),
            PortConfig {
                invert: "false".into(),
                i2c_command_number: 0x14,
                period: 5000,
                measures: "(0;0)(50;50)(100;100)".into(),
            },
        );
        let mock = MockCommunicator::new();
        let actuator =
            PowerActuator::new("M1", &settings, Arc::new(mock.clone())).unwrap();
        (Arc::new(actuator), mock)
    }

    fn bound_context(actuator: Arc<PowerActuator>) -> ExecutionContext {
        let mut bindings = ScriptBindings::new();
        bindings.add_init_step(register_motor_api);
        bindings.add_global("motor", Dynamic::from(MotorHandle::new(actuator)));
        ExecutionContext::new(&bindings)
    }

    #[test]
    fn test_script_drives_motor() {
        let (actuator, mock) = motor();
        let mut context = bound_context(Arc::clone(&actuator));
        assert_eq!(
            context.eval("motor.set_power(50);"),
            EvalOutcome::Finished
        );
        assert_eq!(mock.last_frame(), Some(vec![0x14, 0x00, 50]));
        assert_eq!(actuator.power(), 50);
    }

    #[test]
    fn test_script_reads_power_back() {
        let (actuator, _mock) = motor();
        let mut context = bound_context(actuator);
        assert_eq!(
            context.eval(
                r#"
                motor.set_power(30);
                if motor.power() != 30 { throw "mismatch" }
                "#,
            ),
            EvalOutcome::Finished
        );
    }

    #[test]
    fn test_out_of_range_request_is_clamped() {
        let (actuator, _mock) = motor();
        let mut context = bound_context(Arc::clone(&actuator));
        assert_eq!(
            context.eval("motor.set_power(250);"),
            EvalOutcome::Finished
        );
        assert_eq!(actuator.power(), 100);
    }

    #[test]
    fn test_huge_request_saturates_instead_of_wrapping() {
        let (actuator, _mock) = motor();
        let mut context = bound_context(Arc::clone(&actuator));
        // 2^32 + 80 would wrap to 80 if narrowed before clamping.
        assert_eq!(
            context.eval("motor.set_power(4294967376);"),
            EvalOutcome::Finished
        );
        assert_eq!(actuator.power(), 100);
        assert_eq!(
            context.eval("motor.set_power(-4294967376);"),
            EvalOutcome::Finished
        );
        assert_eq!(actuator.power(), -100);
    }

    #[test]
    fn test_power_off_from_script() {
        let (actuator, mock) = motor();
        let mut context = bound_context(actuator);
        assert_eq!(
            context.eval("motor.set_power(80); motor.power_off();"),
            EvalOutcome::Finished
        );
        assert_eq!(mock.last_frame(), Some(vec![0x14, 0x00, 0]));
    }

    #[test]
    fn test_status_string() {
        let (actuator, _mock) = motor();
        let mut context = bound_context(actuator);
        assert_eq!(
            context.eval(r#"if motor.status() != "Ready" { throw "status" }"#),
            EvalOutcome::Finished
        );
    }
}
