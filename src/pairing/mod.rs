//! Pair-Setup and Pair-Verify state machines.
//!
//! Both machines are driven the way `SlaveSecurityManager::process_command` drives SMP: an
//! explicit numbered state plus a `process(tlv) -> Result<TlvSet, Error>` entry point, one per
//! incoming message, with any per-attempt secret material dropped as soon as the attempt
//! concludes (successfully or not).

mod setup;
mod verify;

pub use setup::{PairSetupMachine, PairSetupOutcome};
pub use verify::{ControllerLookup, PairVerifyMachine, PairVerifyOutcome};
