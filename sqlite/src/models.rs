//! Registers model descriptors from a setup directory on a handle.

use std::path::Path;

use dbstrap_setup::SetupDir;
use tracing::info;

use crate::error::Result;
use crate::handle::ConnectionHandle;

/// Loads every `<Name>.model.<ext>` file under `setup_dir/models` and
/// defines the models on `handle`.
///
/// Loading is all-or-nothing: if any descriptor fails to parse or
/// validate, no model from this call is registered. Returns the names of
/// the registered models in directory listing order.
pub fn load_models(setup_dir: impl AsRef<Path>, handle: &ConnectionHandle) -> Result<Vec<String>> {
    let setup_dir = setup_dir.as_ref();
    let models = SetupDir::new(setup_dir).load_models(handle.types())?;
    let names: Vec<String> = models.iter().map(|m| m.name.clone()).collect();

    handle.define_all(models)?;
    info!(
        connection = %handle.name(),
        dir = %setup_dir.display(),
        count = names.len(),
        "models loaded"
    );
    Ok(names)
}
