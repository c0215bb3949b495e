//! Browser side of the probe: Chrome lifecycle, CDP plumbing, page
//! perception, and action execution.

pub mod cdp;
pub mod executor;
pub mod perception;
pub mod safety;
pub mod session;

pub use executor::{execute, ExecOutcome};
pub use perception::{perceive, PageSnapshot};
pub use session::{Browser, LaunchOptions};
