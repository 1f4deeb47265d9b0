use skein_plugin::{
    CallbackRequest, CallbackResponse, CallbackTarget, ScriptEngine, ScriptError, SpinControl,
};
use tracing::info;

/// Stand-in for a real scripting engine
///
/// Topic callbacks are logged, service callbacks answer with the request
/// reversed. Once `stop_after` callbacks have run, the spin that delivered
/// them is asked to stop.
#[derive(Debug, Default)]
pub struct LoggingEngine {
    pub handled: usize,
    pub stop_after: Option<usize>,
}

impl LoggingEngine {
    pub fn stopping_after(count: usize) -> Self {
        Self {
            handled: 0,
            stop_after: Some(count),
        }
    }
}

impl ScriptEngine for LoggingEngine {
    fn invoke(
        &mut self,
        target: &CallbackTarget,
        request: CallbackRequest,
        control: &SpinControl,
    ) -> Result<CallbackResponse, ScriptError> {
        self.handled += 1;
        if self.stop_after.is_some_and(|limit| self.handled >= limit) {
            control.request_stop();
        }

        match request {
            CallbackRequest::Topic { topic, payload } => {
                info!(
                    "[{}] {}({}): {}",
                    target.owner,
                    target.handler,
                    topic,
                    String::from_utf8_lossy(&payload)
                );
                Ok(CallbackResponse::default())
            }
            CallbackRequest::Service { service, mut payload } => {
                info!(
                    "[{}] {}({}): {}",
                    target.owner,
                    target.handler,
                    service,
                    String::from_utf8_lossy(&payload)
                );
                payload.reverse();
                Ok(CallbackResponse::new(payload))
            }
        }
    }
}
