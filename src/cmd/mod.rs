//! CLI command implementations.
//!
//! | Module   | Commands handled  |
//! |----------|-------------------|
//! | `serve`  | `Serve`, `Init`   |
//! | `config` | `Config`          |

pub mod config;
pub mod serve;

pub use config::cmd_config;
pub use serve::{ServeOverrides, cmd_init, cmd_serve};
