//! Shared state handed to every handler.

use foamrun_runner::CaseRunner;
use foamrun_telemetry::Metrics;

pub(crate) struct ApiState {
    pub(crate) runner: CaseRunner,
    pub(crate) telemetry: Metrics,
}

impl ApiState {
    pub(crate) const fn new(runner: CaseRunner, telemetry: Metrics) -> Self {
        Self { runner, telemetry }
    }
}
