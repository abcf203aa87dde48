//! `kiln clean` command

use anyhow::Result;

use crate::cli::CleanArgs;
use crate::commands::load_manifest;
use kiln::ops::kiln_build::{build_dir, BuildOptions};
use kiln::ops::kiln_clean::clean;
use kiln::util::config::{global_config_path, load_config, project_config_path};

pub fn execute(args: CleanArgs) -> Result<()> {
    let (manifest, root) = load_manifest(args.manifest_path.as_deref())?;
    let config = load_config(global_config_path().as_deref(), &project_config_path(&root));
    let opts = BuildOptions::from_config(&config);

    let profile = if args.release {
        Some("release")
    } else if args.debug {
        Some("debug")
    } else {
        None
    };

    let result = clean(&build_dir(&manifest, &root, &opts), profile)?;
    eprintln!(
        "     Removed {} files from {}",
        result.files_removed,
        result.path.display()
    );

    Ok(())
}
