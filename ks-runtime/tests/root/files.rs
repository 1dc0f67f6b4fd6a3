use std::fs;
use std::path::PathBuf;

use byteorder::{LittleEndian, WriteBytesExt};
use tempfile::TempDir;

/// A description and weight file pair written into a temporary directory.
pub struct NetFiles {
    // keeps the directory alive
    _dir: TempDir,
    pub param: PathBuf,
    pub weights: PathBuf,
}

pub fn write_net(json: &str, weights: &[f32]) -> NetFiles {
    let dir = TempDir::new().unwrap();
    let param = dir.path().join("net.json");
    let weight_path = dir.path().join("net.bin");

    let mut bytes = vec![];
    for &w in weights {
        bytes.write_f32::<LittleEndian>(w).unwrap();
    }
    fs::write(&param, json).unwrap();
    fs::write(&weight_path, bytes).unwrap();

    NetFiles {
        _dir: dir,
        param,
        weights: weight_path,
    }
}
