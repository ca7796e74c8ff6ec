//! CLI command implementations.
//!
//! | Module     | Commands handled |
//! |------------|------------------|
//! | `validate` | `Validate`       |
//! | `run`      | `Run`            |
//! | `config`   | `Config`         |

pub mod config;
pub mod run;
pub mod validate;

pub use config::cmd_config;
pub use run::cmd_run;
pub use validate::cmd_validate;
