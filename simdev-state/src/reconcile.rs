use serde_json::Value;
use thiserror::Error;
use tracing::{Span, debug, field, info, instrument, warn};

use crate::remote::{Transport, TransportError};

use super::models::{
    Acknowledgment, DesiredPatch, Interval, InvalidSetting, Reported, ReportedProperty, Setting,
};
use super::store::TwinStore;

const DIE_NUMBER: &str = "dieNumber";

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("malformed desired patch: {0}")]
    MalformedPatch(#[from] serde_json::Error),

    #[error("failed to update reported properties: {0}")]
    Report(#[from] TransportError),
}

/// Changes resulting from reconciling a desired patch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciliation {
    /// Settings acknowledged on the reported properties, in processing order
    pub acknowledged: Vec<Setting>,

    /// Settings whose value could not be applied
    pub rejected: Vec<InvalidSetting>,

    /// New telemetry interval, if the patch changed it
    pub interval: Option<Interval>,
}

/// Result of applying a desired patch
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    /// Reported properties after the patch
    pub reported: Reported,
    pub changes: Reconciliation,

    /// Whether the reported properties were pushed to the remote
    pub pushed: bool,
}

/// Acknowledge every recognized setting in `patch` on `reported`.
///
/// Settings with an invalid value are skipped and returned in
/// `Reconciliation::rejected`. Unknown keys and removed (`null`) settings
/// are ignored.
pub fn reconcile(reported: &mut Reported, patch: &DesiredPatch) -> Reconciliation {
    let mut changes = Reconciliation::default();
    for setting in Setting::ALL {
        // null is how a setting gets removed from the desired properties
        let Some(value) = patch.value(setting).filter(|value| !value.is_null()) else {
            continue;
        };

        // Interval is the only setting with an effect on the simulator
        if setting == Setting::Interval {
            match Interval::from_setting(value) {
                Ok(interval) => changes.interval = Some(interval),
                Err(e) => {
                    warn!("{e}");
                    changes.rejected.push(e);
                    continue;
                }
            }
        }

        reported.insert(
            setting.as_str(),
            Acknowledgment::completed(value.clone(), patch.version),
        );
        debug!("reported properties update for {setting}");
        changes.acknowledged.push(setting);
    }

    changes
}

/// Apply a desired properties patch to the twin and report the result.
///
/// The whole reported document is pushed after the patch is processed, and
/// only if at least one setting was acknowledged. The reported properties
/// stay locked until the push completes, so concurrent patches are pushed
/// in the order they were applied.
#[instrument(name = "reconcile", skip_all, fields(version = field::Empty), err)]
pub async fn apply_desired_patch<T: Transport>(
    store: &TwinStore,
    transport: &T,
    desired: Value,
) -> Result<Reconciled, ReconcileError> {
    debug!("desired property change: {desired}");
    let patch = DesiredPatch::try_from(desired)?;
    Span::current().record("version", patch.version);

    let mut reported = store.lock_reported().await;
    let changes = reconcile(&mut reported, &patch);

    if let Some(interval) = changes.interval {
        store.set_interval(interval);
        info!("telemetry interval set to {interval}");
    }

    if changes.acknowledged.is_empty() {
        debug!("no recognized settings in patch");
        return Ok(Reconciled {
            reported: reported.clone(),
            changes,
            pushed: false,
        });
    }

    let snapshot = reported.clone();
    transport.update_reported(snapshot.clone().into()).await?;
    info!(acknowledged = changes.acknowledged.len(), "reported properties updated");

    Ok(Reconciled {
        reported: snapshot,
        changes,
        pushed: true,
    })
}

/// Pick the device die number
pub fn roll_die() -> u8 {
    rand::random_range(1..=6)
}

/// Report the device die number as a plain reported property
#[instrument(name = "identity", skip_all, fields(die = die), err)]
pub async fn report_identity<T: Transport>(
    store: &TwinStore,
    transport: &T,
    die: u8,
) -> Result<Reported, TransportError> {
    let mut reported = store.lock_reported().await;
    reported.insert(DIE_NUMBER, ReportedProperty::Scalar(die.into()));

    let snapshot = reported.clone();
    transport.update_reported(snapshot.clone().into()).await?;
    info!("device reported properties sent");

    Ok(snapshot)
}
