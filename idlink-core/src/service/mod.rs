pub mod reconcile;

pub use reconcile::{CallbackOutcome, LoginRedirect, ReconciliationEngine, RefreshedToken};
