pub mod init;
pub mod knowledge;
pub mod run;
pub mod validate;

use crate::cli::args::{Cli, Command};
use tokio_util::sync::CancellationToken;

pub mod exit_codes {
    pub const OK: i32 = 0;
    /// `validate` found the SQL invalid.
    pub const INVALID: i32 = 1;
    /// Configuration or engine connectivity failure.
    pub const FATAL: i32 = 2;
    pub const INTERRUPTED: i32 = 130;
}

pub async fn dispatch(cli: Cli, cancel: CancellationToken) -> anyhow::Result<i32> {
    match cli.cmd {
        Command::Run(args) => run::run(args, cancel).await,
        Command::Validate(args) => validate::run(args).await,
        Command::Knowledge(args) => knowledge::run(args),
        Command::Init(args) => init::run(args),
        Command::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(exit_codes::OK)
        }
    }
}
