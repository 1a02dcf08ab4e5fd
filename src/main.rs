//! cssmc command line front-end

use cssmc::{CompilerError, CssmcCli};
use std::process;

fn main() {
    let mut cli = CssmcCli::new();

    match cli.run() {
        Ok(()) => {}
        Err(CompilerError::Io(e)) => {
            eprintln!("IO Error: {}", e);
            process::exit(1);
        }
        Err(e) => {
            eprintln!("Build failed: {}", e);
            process::exit(1);
        }
    }
}
