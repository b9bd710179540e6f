//! Account lifecycle for trial and weekly quota enforcement.
//!
//! Accounts move between Trial, Quota and Disabled only through a sweep, a
//! staff control command, or import from the ftpd userfiles. Side effects
//! outside the database (flag edits, farewell files) go through
//! [`RecordService`].

pub mod clock;
pub mod config;
pub mod ledger;
pub mod locks;
pub mod report;
pub mod store;
pub mod userfile;

pub use clock::{Clock, FixedClock, MAX_TRIAL_DAYS, SystemClock};
pub use config::{LedgerConfig, QuotaPolicy, TrialPolicy};
pub use ledger::{ExtendOutcome, Ledger, SweepSummary, Transition};
pub use store::{AccountStore, RecordService};
pub use userfile::{ImportOptions, ImportSummary, UserFiles};
