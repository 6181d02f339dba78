use clap::CommandFactory;
use clap_complete::generate;
use eyre::Result;
use std::io;

use crate::cli::Cli;

pub fn run(shell: clap_complete::Shell) -> Result<i32> {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "spoor", &mut io::stdout());
    Ok(0)
}
