use flate2::read::GzDecoder;
use sigma_core::{Result, SigmaError};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Read a model file as UTF-8 text, transparently decompressing `.gz` files.
pub(crate) fn read_model_text(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(SigmaError::ModelLoad(format!(
            "file not found: {}",
            path.display()
        )));
    }

    let is_gzip = path.extension().and_then(|e| e.to_str()) == Some("gz");
    let bytes = if is_gzip {
        let file = File::open(path)
            .map_err(|e| SigmaError::ModelLoad(format!("failed to open file: {}", e)))?;
        let mut out = Vec::new();
        GzDecoder::new(file)
            .read_to_end(&mut out)
            .map_err(|e| SigmaError::ModelLoad(format!("failed to decode gzip: {}", e)))?;
        out
    } else {
        std::fs::read(path)
            .map_err(|e| SigmaError::ModelLoad(format!("failed to read file: {}", e)))?
    };

    String::from_utf8(bytes)
        .map_err(|e| SigmaError::ModelLoad(format!("failed to decode UTF-8: {}", e)))
}
