use std::io;

use tracing::{debug, warn};

/// Loads `DIFFER_*` defaults from a local `.env`, if there is one.
///
/// Any IO error is treated as the file not existing.
pub fn load_dotenv_if_present() {
    match dotenvy::dotenv() {
        Ok(path) => debug!(path = %path.display(), "loaded environment file"),
        Err(dotenvy::Error::Io(io::Error { .. })) => (),
        Err(e) => warn!("found a local `.env` file but was unable to parse it (err: {e})"),
    }
}
