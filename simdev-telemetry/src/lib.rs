mod reading;
mod telemetry;

pub use reading::{FanMode, OVERHEAT, Reading, TelemetryMessage};
pub use telemetry::{RunningTelemetry, TelemetryConfig, TelemetryLoop, TelemetrySummary};

use simdev_remote as remote;
use simdev_state as state;
use simdev_util as util;
