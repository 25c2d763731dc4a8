//! CLI command implementations.
//!
//! Each submodule owns one `Commands` variant:
//!
//! | Module   | Commands handled                                |
//! |----------|-------------------------------------------------|
//! | `run`    | `Run` (full pipeline over a workspace)          |
//! | `status` | `Status` (backlog, completion, and track state) |
//! | `smoke`  | `Smoke` (gateway write probe)                   |
//! | `reset`  | `Reset` (clear completion state)                |

pub mod reset;
pub mod run;
pub mod smoke;
pub mod status;

pub use reset::cmd_reset;
pub use run::cmd_run;
pub use smoke::cmd_smoke;
pub use status::cmd_status;
