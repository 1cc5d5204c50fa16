//! CLI command implementations.
//!
//! | Module   | Commands handled  |
//! |----------|-------------------|
//! | `run`    | `Run`, `Resume`   |
//! | `status` | `Status`          |
//! | `tools`  | `Tools`           |

pub mod run;
pub mod status;
pub mod tools;

pub use run::{cmd_resume, cmd_run};
pub use status::cmd_status;
pub use tools::cmd_tools;
