mod reconcile;
mod store;

pub mod models;
pub use reconcile::{
    Reconciled, Reconciliation, ReconcileError, apply_desired_patch, reconcile, report_identity,
    roll_die,
};
pub use store::TwinStore;

use simdev_remote as remote;
