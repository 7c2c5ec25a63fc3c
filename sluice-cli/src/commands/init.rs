//! `sluice init`: starter pipeline and Lua development files
//!
//! Writes `pipeline.lua`, a `.luarc.json` for the Lua Language Server and
//! one stub file per pipeline module under `.sluice/stubs`.

use anyhow::{Context, Result};
use clap::Args;
use colored::*;
use std::fs;
use std::path::Path;

const STARTER_PIPELINE: &str = include_str!("starter.lua");

const LUARC: &str = r#"{
  "$schema": "https://raw.githubusercontent.com/sumneko/vscode-lua/master/setting/schema.json",
  "runtime": {
    "version": "Lua 5.4"
  },
  "diagnostics": {
    "globals": ["pipeline", "when", "env"]
  },
  "workspace": {
    "library": [".sluice/stubs"],
    "checkThirdParty": false
  },
  "completion": {
    "callSnippet": "Both"
  }
}
"#;

#[derive(Args)]
pub struct InitArgs {
    /// Output directory for generated files
    #[arg(short, long, default_value = ".")]
    output: String,

    /// Overwrite an existing pipeline.lua
    #[arg(long)]
    force: bool,

    /// Generate only .luarc.json and stubs
    #[arg(long)]
    stubs_only: bool,
}

pub fn init(args: &InitArgs) -> Result<()> {
    let output_path = Path::new(&args.output);
    fs::create_dir_all(output_path)
        .with_context(|| format!("Failed to create {}", output_path.display()))?;

    if !args.stubs_only {
        write_starter_pipeline(output_path, args.force)?;
    }
    write_luarc(output_path)?;
    write_stubs(output_path)?;

    println!("{}", "✓ Sluice files generated!".green().bold());
    println!();
    println!("{}", "Next steps:".bold());
    println!("  1. Adjust the commands in pipeline.lua to your project");
    println!("  2. Check it with {}", "sluice validate".cyan());
    println!("  3. Preview an event with {}", "sluice plan --event push".cyan());

    Ok(())
}

fn write_starter_pipeline(output_path: &Path, force: bool) -> Result<()> {
    let path = output_path.join("pipeline.lua");
    if path.exists() && !force {
        println!("  {} pipeline.lua (use --force to overwrite)", "Kept".yellow());
        return Ok(());
    }

    fs::write(&path, STARTER_PIPELINE)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("  {} pipeline.lua", "Created".green());
    Ok(())
}

fn write_luarc(output_path: &Path) -> Result<()> {
    let path = output_path.join(".luarc.json");
    fs::write(&path, LUARC).with_context(|| format!("Failed to write {}", path.display()))?;
    println!("  {} .luarc.json", "Created".green());
    Ok(())
}

/// Stubs come from the module implementations, so they never drift
fn write_stubs(output_path: &Path) -> Result<()> {
    let stubs_dir = output_path.join(".sluice").join("stubs");
    fs::create_dir_all(&stubs_dir)
        .with_context(|| format!("Failed to create stubs directory at {}", stubs_dir.display()))?;

    for (name, content) in sluice_lua::stubs() {
        let path = stubs_dir.join(format!("{}.lua", name));
        fs::write(&path, content).with_context(|| format!("Failed to write stub file {}", path.display()))?;
        println!("  {} {}.lua", "Created".green(), name);
    }

    Ok(())
}
