/*
This module is home to everything related to the cloud endpoint the
simulated device talks to.

The device core only ever sees the `Transport` trait: it opens the
channel, reads the twin, pushes reported properties, sends telemetry and
receives desired property changes and direct method calls as inbound
events. The loopback hub is an in-process stand-in for the cloud side so
the simulator can run (and be tested) without a real endpoint.
*/

mod loopback;
mod methods;
mod transport;

pub use loopback::{Hub, HubError, Loopback};
pub use methods::{MethodHandler, MethodTable, OFF, off_handler};
pub use transport::{
    EventReceiver, EventSender, InboundEvent, Message, MethodCall, MethodInvocation,
    MethodResponse, Transport, TransportError, Twin, event_channel,
};

use simdev_util as util;
