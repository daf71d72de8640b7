use std::{env, fs::File, path::Path};

use glulx_vm::glulx_terp::glk::StdioGlk;
use glulx_vm::{Errors, GlulxTerp};
use log::info;

#[derive(Debug)]
pub enum MainError {
    TargetArgNotFound,
    TargetLoading(std::io::Error),
    Interpreter(Errors),
}

fn main() -> Result<(), MainError> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    let Some(path) = args.get(1) else {
        eprintln!("usage: glulx-vm <game-file>");
        return Err(MainError::TargetArgNotFound);
    };

    let path = Path::new(path);
    let mut file = File::open(path).map_err(MainError::TargetLoading)?;

    let mut terp = GlulxTerp::from_reader(&mut file, Box::new(StdioGlk::new()))
        .map_err(MainError::Interpreter)?;
    info!("loaded {path:?}");

    terp.run().map_err(MainError::Interpreter)
}
