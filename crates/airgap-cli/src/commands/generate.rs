//! Shell completions and man pages derived from the clap definition.

use super::EXIT_SUCCESS;
use clap::CommandFactory;
use clap_complete::Shell;
use std::io::Write;
use std::path::Path;

pub fn completions<C: CommandFactory>(shell: Shell) -> Result<u8, String> {
    let mut cmd = C::command();
    let bin = cmd.get_name().to_owned();
    let mut script = Vec::new();
    clap_complete::generate(shell, &mut cmd, bin, &mut script);
    std::io::stdout()
        .lock()
        .write_all(&script)
        .map_err(|e| format!("failed to write completions: {e}"))?;
    Ok(EXIT_SUCCESS)
}

/// One page for the binary plus `<bin>-<sub>.1` per subcommand.
pub fn man_pages<C: CommandFactory>(dir: &Path) -> Result<u8, String> {
    std::fs::create_dir_all(dir).map_err(|e| format!("failed to create {}: {e}", dir.display()))?;
    let cmd = C::command();
    let bin = cmd.get_name().to_owned();
    let mut pages = vec![(bin.clone(), cmd.clone())];
    pages.extend(
        cmd.get_subcommands()
            .map(|sub| (format!("{bin}-{}", sub.get_name()), sub.clone())),
    );
    for (name, page) in pages {
        let mut buf = Vec::new();
        clap_mangen::Man::new(page)
            .render(&mut buf)
            .map_err(|e| format!("man page render failed for {name}: {e}"))?;
        let path = dir.join(format!("{name}.1"));
        std::fs::write(&path, &buf).map_err(|e| format!("failed to write {}: {e}", path.display()))?;
    }
    println!("man pages written to {}", dir.display());
    Ok(EXIT_SUCCESS)
}
