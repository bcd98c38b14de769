//! CLI command implementations.
//!
//! | Module    | Commands handled                                              |
//! |-----------|---------------------------------------------------------------|
//! | `config`  | `Config`                                                      |
//! | `report`  | `Create`, `Submit`, `Approve`, `Reject`, `ForceSubmit`,       |
//! |           | `Show`, `Retry`, `Resend`, `Digest`, `Sweep`                  |
//! | `ops`     | `Analyze`                                                     |

pub mod config;
pub mod ops;
pub mod report;

pub use config::{cmd_config, load_config};
pub use ops::cmd_analyze;
pub use report::run_review_command;
